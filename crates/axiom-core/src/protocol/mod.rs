//! Protocol module - aXiom host interface definitions.

pub mod constants;
pub mod header;

pub use constants::*;
pub use header::{Direction, HeaderError, PageHeader};
