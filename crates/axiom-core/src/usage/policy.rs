//! Usage classification used by verified configuration writes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Which usages a configuration write skips and which go through the
/// command driven (CDU) sub-protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsagePolicy {
    /// Informational or read-only usages.
    pub ignore: BTreeSet<u8>,
    /// Usages whose contents are reached through CDU commands.
    pub command_driven: BTreeSet<u8>,
}

impl Default for UsagePolicy {
    fn default() -> Self {
        Self {
            // u31 device info, u32 capabilities, u33 CRC data,
            // u36 factory calibration, u82 AE controls
            ignore: [0x31, 0x32, 0x33, 0x36, 0x82].into_iter().collect(),
            // u05 comments, u22 sequence data, u43 haptic hotspots,
            // u77 dial on display, u93 AE profile, u94 delta scale map
            command_driven: [0x05, 0x22, 0x43, 0x77, 0x93, 0x94].into_iter().collect(),
        }
    }
}

impl UsagePolicy {
    pub fn is_ignored(&self, usage: u8) -> bool {
        self.ignore.contains(&usage)
    }

    pub fn is_command_driven(&self, usage: u8) -> bool {
        self.command_driven.contains(&usage)
    }
}
