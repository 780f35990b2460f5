//! Binary layouts of individual usages.
//!
//! Each usage decoder is a closed enum over the revisions it understands.
//! Construction with any other revision fails with
//! `DecodeError::UnsupportedRevision`.

pub mod u02;
pub mod u06;
pub mod u31;
pub mod u32;
pub mod u33;

use thiserror::Error;

pub use u02::{SystemCommand, SystemManager, SystemManagerRegs};
pub use u06::{SelfTest, SelfTestRegs};
pub use u31::DeviceInformation;
pub use u32::DeviceCapabilities;
pub use u33::{CrcData, CrcDataRegs};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported revision of u{usage:02X}: {revision}")]
    UnsupportedRevision { usage: u8, revision: u8 },

    #[error("u{usage:02X} buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall {
        usage: u8,
        expected: usize,
        actual: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) fn ensure_len(usage: u8, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            usage,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
