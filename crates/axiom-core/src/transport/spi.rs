//! SPI transport over any `embedded-hal` 1.0 `SpiDevice`.

use std::thread;
use std::time::Duration;

use embedded_hal::spi::SpiDevice;
use tracing::{instrument, trace};

use super::traits::{PageTransport, TransportError, TransportKind};
use crate::protocol::PageHeader;

/// Padding clocked between the header and the body.
const SPI_PADDING_LEN: usize = 32;

/// Offset of the body inside a full-duplex SPI frame.
const SPI_BODY_OFFSET: usize = PageHeader::SIZE + SPI_PADDING_LEN;

/// Dwell after every transaction.
const SPI_DWELL: Duration = Duration::from_millis(1);

/// aXiom attached to an SPI bus.
///
/// Every transaction is `header, 32 padding bytes, body` as one chip-select
/// frame.
pub struct SpiTransport<S> {
    spi: S,
}

impl<S: SpiDevice> SpiTransport<S> {
    pub fn new(spi: S) -> Self {
        Self { spi }
    }

    pub fn release(self) -> S {
        self.spi
    }
}

fn spi_frame(header: &PageHeader, body: &[u8], body_len: usize) -> Vec<u8> {
    let mut frame = vec![0u8; SPI_BODY_OFFSET + body_len];
    frame[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
    frame[SPI_BODY_OFFSET..SPI_BODY_OFFSET + body.len()].copy_from_slice(body);
    frame
}

fn bus_error<E: embedded_hal::spi::Error>(e: E) -> TransportError {
    TransportError::Bus(format!("{:?}", e.kind()))
}

impl<S: SpiDevice> PageTransport for SpiTransport<S> {
    #[instrument(level = "trace", skip(self), fields(address = %format!("0x{:04X}", address)))]
    fn read_page(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError> {
        let header = PageHeader::read(address, length as usize)?;
        let mut frame = spi_frame(&header, &[], length as usize);
        self.spi.transfer_in_place(&mut frame).map_err(bus_error)?;
        thread::sleep(SPI_DWELL);
        trace!(bytes_read = length, "SPI read complete");
        Ok(frame.split_off(SPI_BODY_OFFSET))
    }

    #[instrument(level = "trace", skip(self, payload), fields(address = %format!("0x{:04X}", address), len = payload.len()))]
    fn write_page(&mut self, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        let header = PageHeader::write(address, payload.len())?;
        let frame = spi_frame(&header, payload, payload.len());
        self.spi.write(&frame).map_err(bus_error)?;
        thread::sleep(SPI_DWELL);
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Spi
    }
}
