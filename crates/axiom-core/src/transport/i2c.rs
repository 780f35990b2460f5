//! I2C transport over any `embedded-hal` 1.0 bus.

use embedded_hal::i2c::{I2c, SevenBitAddress};
use tracing::{instrument, trace};

use super::traits::{PageTransport, TransportError, TransportKind};
use crate::protocol::PageHeader;

/// aXiom attached to an I2C bus.
///
/// Reads are a single write-then-read transaction. Writes send the header
/// and payload in one transfer.
pub struct I2cTransport<I> {
    bus: I,
    address: SevenBitAddress,
}

impl<I: I2c> I2cTransport<I> {
    pub fn new(bus: I, address: SevenBitAddress) -> Self {
        Self { bus, address }
    }

    /// Give the bus back.
    pub fn release(self) -> I {
        self.bus
    }
}

fn bus_error<E: embedded_hal::i2c::Error>(e: E) -> TransportError {
    TransportError::Bus(format!("{:?}", e.kind()))
}

impl<I: I2c> PageTransport for I2cTransport<I> {
    #[instrument(level = "trace", skip(self), fields(address = %format!("0x{:04X}", address)))]
    fn read_page(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError> {
        let header = PageHeader::read(address, length as usize)?;
        let mut data = vec![0u8; length as usize];
        self.bus
            .write_read(self.address, &header.to_bytes(), &mut data)
            .map_err(bus_error)?;
        trace!(bytes_read = data.len(), "I2C read complete");
        Ok(data)
    }

    #[instrument(level = "trace", skip(self, payload), fields(address = %format!("0x{:04X}", address), len = payload.len()))]
    fn write_page(&mut self, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        let header = PageHeader::write(address, payload.len())?;
        let mut frame = Vec::with_capacity(PageHeader::SIZE + payload.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(payload);
        self.bus.write(self.address, &frame).map_err(bus_error)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::I2c
    }
}
