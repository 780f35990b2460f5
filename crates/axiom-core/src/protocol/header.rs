//! Page header framing shared by every transport.

use thiserror::Error;

use super::constants::{AX_COMMS_READ, AX_HEADER_LEN, MAX_TRANSFER_LEN};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Transfer length {length} exceeds the 15-bit header field (max {max})")]
    LengthTooLarge { length: usize, max: u16 },
}

/// Transfer direction encoded in bit 7 of the length MSB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// 4-byte page header: `[addr_lsb, addr_msb, len_lsb, len_msb]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub address: u16,
    pub length: u16,
    pub direction: Direction,
}

impl PageHeader {
    pub const SIZE: usize = AX_HEADER_LEN;

    pub fn read(address: u16, length: usize) -> Result<Self, HeaderError> {
        Self::new(address, length, Direction::Read)
    }

    pub fn write(address: u16, length: usize) -> Result<Self, HeaderError> {
        Self::new(address, length, Direction::Write)
    }

    fn new(address: u16, length: usize, direction: Direction) -> Result<Self, HeaderError> {
        let length = u16::try_from(length)
            .ok()
            .filter(|&l| l <= MAX_TRANSFER_LEN)
            .ok_or(HeaderError::LengthTooLarge {
                length,
                max: MAX_TRANSFER_LEN,
            })?;
        Ok(Self {
            address,
            length,
            direction,
        })
    }

    pub fn to_bytes(&self) -> [u8; AX_HEADER_LEN] {
        let [addr_lsb, addr_msb] = self.address.to_le_bytes();
        let [len_lsb, len_msb] = self.length.to_le_bytes();
        let len_msb = match self.direction {
            Direction::Read => len_msb | AX_COMMS_READ,
            Direction::Write => len_msb & !AX_COMMS_READ,
        };
        [addr_lsb, addr_msb, len_lsb, len_msb]
    }
}
