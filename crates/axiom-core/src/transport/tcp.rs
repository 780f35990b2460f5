//! TCP protocol bridge transport.
//!
//! The bridge tunnels page transactions:
//! - read request `[0x51, 4, n] + header`, answered by `status + n bytes`
//! - write request `[0x51, 4 + n, 0] + header + payload`, answered by one ack byte
//! - `0xFF` ends the session

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use tracing::{debug, info, instrument};

use super::traits::{PageTransport, TransportError, TransportKind};
use crate::protocol::PageHeader;
use crate::protocol::constants::{
    AX_HEADER_LEN, AX_TBP_I2C_DEVICE1, AX_TBP_RDWR_OK, AX_TBP_WR_OK, TCP_CMD_EXIT,
    TCP_MAX_PACKET_SIZE,
};

/// Largest payload per write: the length byte carries `4 + n`.
const TCP_MAX_WRITE_CHUNK: usize = TCP_MAX_PACKET_SIZE - AX_HEADER_LEN;

/// Protocol bridge reached over TCP.
pub struct TcpTransport<S = TcpStream> {
    stream: S,
}

impl TcpTransport<TcpStream> {
    /// Connect to a bridge listening at `addr`.
    #[instrument(level = "info", skip(addr))]
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        info!(peer = %stream.peer_addr()?, "Connected to TCP bridge");
        Ok(Self { stream })
    }
}

impl<S: Read + Write> TcpTransport<S> {
    /// Wrap an already connected stream.
    pub fn from_stream(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn read_chunk(&mut self, address: u16, length: usize) -> Result<Vec<u8>, TransportError> {
        let header = PageHeader::read(address, length)?;
        let mut request = vec![AX_TBP_I2C_DEVICE1, AX_HEADER_LEN as u8, length as u8];
        request.extend_from_slice(&header.to_bytes());
        self.stream.write_all(&request)?;

        let mut response = vec![0u8; length + 1];
        self.stream.read_exact(&mut response)?;
        if response[0] != AX_TBP_RDWR_OK {
            return Err(TransportError::from_bridge_status(address, response[0]));
        }
        response.remove(0);
        Ok(response)
    }

    fn write_chunk(&mut self, address: u16, chunk: &[u8]) -> Result<(), TransportError> {
        let header = PageHeader::write(address, chunk.len())?;
        let mut request = vec![AX_TBP_I2C_DEVICE1, (AX_HEADER_LEN + chunk.len()) as u8, 0];
        request.extend_from_slice(&header.to_bytes());
        request.extend_from_slice(chunk);
        self.stream.write_all(&request)?;

        let mut ack = [0u8; 1];
        self.stream.read_exact(&mut ack)?;
        match ack[0] {
            AX_TBP_RDWR_OK | AX_TBP_WR_OK => Ok(()),
            status => Err(TransportError::from_bridge_status(address, status)),
        }
    }
}

impl<S: Read + Write> PageTransport for TcpTransport<S> {
    #[instrument(level = "trace", skip(self), fields(address = %format!("0x{:04X}", address)))]
    fn read_page(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError> {
        let mut data = Vec::with_capacity(length as usize);
        let mut current = address;
        let mut remaining = length as usize;
        while remaining > 0 {
            let chunk = remaining.min(TCP_MAX_PACKET_SIZE);
            data.extend(self.read_chunk(current, chunk)?);
            current = current.wrapping_add(chunk as u16);
            remaining -= chunk;
        }
        Ok(data)
    }

    #[instrument(level = "trace", skip(self, payload), fields(address = %format!("0x{:04X}", address), len = payload.len()))]
    fn write_page(&mut self, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        let mut current = address;
        for chunk in payload.chunks(TCP_MAX_WRITE_CHUNK) {
            self.write_chunk(current, chunk)?;
            current = current.wrapping_add(chunk.len() as u16);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        debug!("Closing TCP bridge session");
        self.stream.write_all(&[TCP_CMD_EXIT])?;
        self.stream.flush()?;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::TcpBridge
    }

    fn max_packet_size(&self) -> Option<usize> {
        Some(TCP_MAX_PACKET_SIZE)
    }
}
