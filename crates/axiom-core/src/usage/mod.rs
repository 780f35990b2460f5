//! Usage table discovery and classification.

pub mod policy;
pub mod table;

pub use policy::UsagePolicy;
pub use table::{UsageTable, UsageTableEntry, compute_length};
