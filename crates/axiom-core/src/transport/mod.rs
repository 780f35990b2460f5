//! Transport layer for aXiom page access.

pub mod i2c;
pub mod mock;
pub mod spi;
pub mod tcp;
pub mod traits;
pub mod usb;

pub use i2c::I2cTransport;
pub use mock::{MockTransport, MockUsage};
pub use spi::SpiTransport;
pub use tcp::TcpTransport;
pub use traits::{PageTransport, TransportError, TransportKind, bootloader_chunk_size};
pub use usb::UsbBridgeTransport;
