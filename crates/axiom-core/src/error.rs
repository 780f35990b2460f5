//! Driver error types.

use thiserror::Error;

use crate::cdu::{CduErrorKind, CduState};
use crate::transport::TransportError;
use crate::usages::DecodeError;

#[derive(Error, Debug)]
pub enum AxiomError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Usage table not populated, cannot address u{usage:02X}")]
    TableNotPopulated { usage: u8 },

    #[error("Usage u{usage:02X} is not present on this device")]
    UnknownUsage { usage: u8 },

    #[error("Page {page} is beyond the address space of u{usage:02X}")]
    AddressOutOfRange { usage: u8, page: u8 },

    #[error("u{usage:02X} needs {expected} bytes, buffer holds {actual}")]
    InvalidLength {
        usage: u8,
        expected: usize,
        actual: usize,
    },

    #[error("u{usage:02X} failed with code 0x{code:04X}")]
    CommandFailed { usage: u8, code: u16 },

    #[error("u{usage:02X} still busy after {retries} polls (last status 0x{last_status:04X})")]
    WriteTimeout {
        usage: u8,
        retries: u32,
        last_status: u16,
    },

    #[error("CDU {kind} on u{usage:02X} failed with status 0x{status:04X}")]
    Cdu {
        usage: u8,
        kind: CduErrorKind,
        status: u16,
    },

    #[error("CDU on u{usage:02X} timed out in {state} after {retries} polls")]
    CduTimeout {
        usage: u8,
        state: CduState,
        retries: u32,
    },

    #[error("CDU data of {length} bytes does not fit the 16-bit offset field")]
    CduOffsetOverflow { length: usize },

    #[error("Bootloader still busy after {retries} polls")]
    BusyTimeout { retries: u32 },

    #[error(
        "Read back of u{usage:02X} differs from what was written ({} bytes written, {} read)",
        .expected.len(),
        .actual.len()
    )]
    VerifyMismatch {
        usage: u8,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, AxiomError>;
