//! Page transport abstraction.
//!
//! Defines the `PageTransport` trait every physical link implements
//! (I2C, SPI, USB bridge, TCP bridge, mock).

use std::fmt;

use crate::protocol::HeaderError;
use crate::protocol::constants::{
    AX_HEADER_LEN, AX_TBP_I2C_DEV_HEAD_LEN, AX_TBP_NOACK_ADDR, AX_TBP_NOACK_DATA, PAGE_SIZE,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X}")]
    DeviceNotFound { vid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Short read at 0x{address:04X}: expected {expected} bytes, got {actual}")]
    ShortRead {
        address: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Bridge reported status 0x{status:02X}")]
    BridgeStatus { status: u8 },

    #[error("Device did not acknowledge its address (access at 0x{address:04X})")]
    NoAckAddress { address: u16 },

    #[error("Device did not acknowledge data at 0x{address:04X}")]
    NoAckData { address: u16 },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Error for a bridge status byte other than success.
    pub fn from_bridge_status(address: u16, status: u8) -> Self {
        match status {
            AX_TBP_NOACK_ADDR => Self::NoAckAddress { address },
            AX_TBP_NOACK_DATA => Self::NoAckData { address },
            status => Self::BridgeStatus { status },
        }
    }
}

/// Physical link behind a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    I2c,
    Spi,
    UsbBridge,
    TcpBridge,
    Mock,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::I2c => write!(f, "I2C"),
            TransportKind::Spi => write!(f, "SPI"),
            TransportKind::UsbBridge => write!(f, "USB bridge"),
            TransportKind::TcpBridge => write!(f, "TCP bridge"),
            TransportKind::Mock => write!(f, "mock"),
        }
    }
}

/// Bootloader FIFO chunk size for a link.
///
/// Direct buses move up to `PAGE_SIZE - 1` bytes. Bridges lose the page
/// header, and on small packets the bridge framing too.
pub fn bootloader_chunk_size(max_packet_size: Option<usize>) -> usize {
    match max_packet_size {
        None => PAGE_SIZE - 1,
        Some(packet) if packet > PAGE_SIZE => (PAGE_SIZE - 1) - AX_HEADER_LEN,
        Some(packet) => (packet - 1)
            .saturating_sub(AX_TBP_I2C_DEV_HEAD_LEN)
            .saturating_sub(AX_HEADER_LEN),
    }
}

/// Abstract page-addressed transport.
///
/// This trait enables:
/// - Bus implementations (I2C, SPI) over `embedded-hal`
/// - Protocol bridge implementations (USB via nusb, TCP)
/// - Mock implementation for unit testing
pub trait PageTransport {
    /// Read `length` bytes starting at `address`.
    fn read_page(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError>;

    /// Write `payload` starting at `address`.
    fn write_page(&mut self, address: u16, payload: &[u8]) -> Result<(), TransportError>;

    /// Release the link.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Physical link kind.
    fn kind(&self) -> TransportKind;

    /// Largest packet the link moves in one transfer, if it is packetised.
    fn max_packet_size(&self) -> Option<usize> {
        None
    }

    /// Bytes per bootloader FIFO write.
    fn bootloader_chunk_size(&self) -> usize {
        bootloader_chunk_size(self.max_packet_size())
    }
}

impl<T: PageTransport + ?Sized> PageTransport for Box<T> {
    fn read_page(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError> {
        (**self).read_page(address, length)
    }

    fn write_page(&mut self, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        (**self).write_page(address, payload)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn max_packet_size(&self) -> Option<usize> {
        (**self).max_packet_size()
    }

    fn bootloader_chunk_size(&self) -> usize {
        (**self).bootloader_chunk_size()
    }
}
