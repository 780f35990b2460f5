//! nusb-based USB protocol bridge transport.
//!
//! The bridge exposes its control channel on interface 0 as fixed size
//! interrupt reports. Each page transaction is wrapped in a
//! `AX_TBP_I2C_DEVICE1` request and answered by one report.

use std::time::Duration;

use nusb::transfer::{Buffer, In, Interrupt, Out};
use nusb::{Endpoint, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{PageTransport, TransportError, TransportKind};
use crate::protocol::PageHeader;
use crate::protocol::constants::*;

/// Report read timeout.
const RD_TIMEOUT: Duration = Duration::from_millis(100);

/// Attempts to see the stop acknowledgement.
const MAX_TBP_STOP_RETRY: usize = 2;

/// Packet size of full-speed bridges.
const SMALL_PACKET: usize = 64;

/// Bytes the bridge returns per read on a small packet bridge.
fn max_read_len(packet: usize) -> usize {
    if packet == SMALL_PACKET {
        SMALL_PACKET - AX_RX_HEADER_LEN
    } else {
        TCP_MAX_PACKET_SIZE
    }
}

/// Bytes the bridge accepts per write.
fn max_write_len(packet: usize) -> usize {
    if packet == SMALL_PACKET {
        SMALL_PACKET - AX_HEADER_LEN - AX_TBP_I2C_DEV_HEAD_LEN
    } else {
        TCP_MAX_PACKET_SIZE - AX_HEADER_LEN
    }
}

/// Build a report padded to `packet` bytes.
fn report(packet: usize, bytes: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; packet];
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

fn read_request(packet: usize, address: u16, length: usize) -> Result<Vec<u8>, TransportError> {
    let header = PageHeader::read(address, length)?;
    let mut msg = vec![AX_TBP_I2C_DEVICE1, AX_HEADER_LEN as u8, length as u8];
    msg.extend_from_slice(&header.to_bytes());
    Ok(report(packet, &msg))
}

fn write_request(packet: usize, address: u16, chunk: &[u8]) -> Result<Vec<u8>, TransportError> {
    let header = PageHeader::write(address, chunk.len())?;
    let mut msg = vec![AX_TBP_I2C_DEVICE1, (chunk.len() + AX_HEADER_LEN) as u8, 0];
    msg.extend_from_slice(&header.to_bytes());
    msg.extend_from_slice(chunk);
    Ok(report(packet, &msg))
}

/// Check a read completion `[status, length, data..]` and borrow its data.
fn read_response(address: u16, response: &[u8], expected: usize) -> Result<&[u8], TransportError> {
    let short = |actual| TransportError::ShortRead {
        address,
        expected,
        actual,
    };
    let status = *response.first().ok_or_else(|| short(0))?;
    if status != AX_TBP_RDWR_OK {
        return Err(TransportError::from_bridge_status(address, status));
    }
    let declared = response.get(1).map_or(0, |&n| n as usize);
    let returned = declared.min(response.len().saturating_sub(AX_RX_HEADER_LEN));
    if returned != expected {
        return Err(short(returned));
    }
    response
        .get(AX_RX_HEADER_LEN..AX_RX_HEADER_LEN + expected)
        .ok_or_else(|| short(returned))
}

/// Check the status byte of a write completion.
fn write_ack(address: u16, response: &[u8]) -> Result<(), TransportError> {
    match response.first() {
        Some(&AX_TBP_WR_OK) => Ok(()),
        Some(&status) => Err(TransportError::from_bridge_status(address, status)),
        None => Err(TransportError::ShortRead {
            address,
            expected: 1,
            actual: 0,
        }),
    }
}

fn proxy_request(packet: usize, report_address: u16, max_report_len: u8) -> Vec<u8> {
    let [lsb, msb] = report_address.to_le_bytes();
    report(
        packet,
        &[
            AX_TBP_REPEAT,
            0x58,
            0x04,
            max_report_len,
            lsb,
            msb,
            max_report_len,
            AX_COMMS_READ,
        ],
    )
}

/// Where the bridge should stream reports from once the session ends.
#[derive(Debug, Clone, Copy)]
struct ProxyTarget {
    report_address: u16,
    max_report_len: u8,
}

/// TNx USB protocol bridge.
pub struct UsbBridgeTransport {
    in_ep: Endpoint<Interrupt, In>,
    out_ep: Endpoint<Interrupt, Out>,
    packet_size: usize,
    vid: u16,
    pid: u16,
    proxy_on_close: Option<ProxyTarget>,
}

impl UsbBridgeTransport {
    /// Open the first bridge found, probing Atmel, ST then GD vendor IDs.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let devices: Vec<nusb::DeviceInfo> = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .collect();

        for &vid in BRIDGE_VENDOR_IDS {
            if let Some(info) = devices.iter().find(|d| d.vendor_id() == vid) {
                return Self::open_device_info(info);
            }
        }

        Err(TransportError::DeviceNotFound {
            vid: ATMEL_VENDOR_ID,
        })
    }

    /// Open a bridge with a specific vendor ID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid)))]
    pub fn open_with_vendor(vid: u16) -> Result<Self, TransportError> {
        let info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid)
            .ok_or(TransportError::DeviceNotFound { vid })?;

        Self::open_device_info(&info)
    }

    fn open_device_info(info: &nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = info.vendor_id();
        let pid = info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            product = info.product_string().unwrap_or("?"),
            "Found protocol bridge"
        );

        let device = info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface = device
            .detach_and_claim_interface(AX_IF_TBPCTRL)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: AX_IF_TBPCTRL,
                message: e.to_string(),
            })?;

        let mut in_address: u8 = 0;
        let mut out_address: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != AX_IF_TBPCTRL {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Interrupt {
                            if ep.direction() == nusb::transfer::Direction::In {
                                in_address = ep.address();
                            } else {
                                out_address = ep.address();
                            }
                        }
                    }
                }
            }
        }

        if in_address == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Interrupt".into(),
                direction: "In".into(),
            });
        }
        if out_address == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Interrupt".into(),
                direction: "Out".into(),
            });
        }

        let in_ep = interface
            .endpoint::<Interrupt, In>(in_address)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let out_ep = interface
            .endpoint::<Interrupt, Out>(out_address)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let packet_size = out_ep.max_packet_size();

        info!(
            in_ep = %format!("0x{:02X}", in_address),
            out_ep = %format!("0x{:02X}", out_address),
            packet_size,
            max_read = max_read_len(packet_size),
            max_write = max_write_len(packet_size),
            "Bridge opened"
        );

        let mut transport = Self {
            in_ep,
            out_ep,
            packet_size,
            vid,
            pid,
            proxy_on_close: None,
        };
        transport.stop_bridge()?;
        Ok(transport)
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    /// Whether the bridge speaks the touch bridge protocol and can proxy reports.
    pub fn supports_proxy(&self) -> bool {
        self.pid == BRIDGE_TBP_PID
    }

    fn send(&mut self, report: Vec<u8>) -> Result<(), TransportError> {
        self.out_ep.submit(Buffer::from(report));
        let completion = self
            .out_ep
            .wait_next_complete(RD_TIMEOUT)
            .ok_or_else(|| TransportError::WriteFailed("report write timed out".into()))?;
        completion
            .status
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let buf = self.in_ep.allocate(self.packet_size);
        self.in_ep.submit(buf);
        match self.in_ep.wait_next_complete(RD_TIMEOUT) {
            Some(completion) => {
                completion
                    .status
                    .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
                Ok(Some(completion.buffer.to_vec()))
            }
            None => {
                self.in_ep.cancel_all();
                let _ = self.in_ep.wait_next_complete(RD_TIMEOUT);
                Ok(None)
            }
        }
    }

    fn transact(&mut self, report: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.send(report)?;
        self.receive()?
            .ok_or_else(|| TransportError::ReadFailed("no response from bridge".into()))
    }

    /// Leave proxy mode and flush queued reports.
    #[instrument(level = "debug", skip(self))]
    pub fn stop_bridge(&mut self) -> Result<(), TransportError> {
        self.send(report(self.packet_size, &[AX_TBP_CMD_NULL]))?;
        debug!("Bridge stop requested");

        let mut last = 0;
        for _ in 0..MAX_TBP_STOP_RETRY {
            let Some(response) = self.receive()? else {
                continue;
            };
            last = response.first().copied().unwrap_or(0);
            if last == AX_TBP_CMD_NULL {
                while self.receive()?.is_some_and(|r| !r.is_empty()) {}
                debug!("Bridge flushed");
                return Ok(());
            }
        }
        Err(TransportError::BridgeStatus { status: last })
    }

    /// Stream `max_report_len` bytes from `report_address` to the host.
    #[instrument(level = "info", skip(self), fields(report_address = %format!("0x{:04X}", report_address)))]
    pub fn set_proxy_mode(
        &mut self,
        report_address: u16,
        max_report_len: u8,
    ) -> Result<(), TransportError> {
        let response = self.transact(proxy_request(
            self.packet_size,
            report_address,
            max_report_len,
        ))?;
        match (response.first(), response.get(1)) {
            (Some(&AX_TBP_REPEAT), Some(&AX_TBP_RDWR_OK))
            | (Some(&AX_TBP_USBID_UNSOLICITED), Some(&AX_TBP_WR_OK)) => {
                info!("Bridge is in proxy mode");
                Ok(())
            }
            (status, _) => Err(TransportError::BridgeStatus {
                status: status.copied().unwrap_or(0),
            }),
        }
    }

    /// Put the bridge in proxy mode when the session is closed.
    pub fn proxy_on_close(&mut self, report_address: u16, max_report_len: u8) {
        self.proxy_on_close = Some(ProxyTarget {
            report_address,
            max_report_len,
        });
    }

    /// Soft reset the bridge. It re-enumerates and sends no response.
    pub fn reset_bridge(&mut self) -> Result<(), TransportError> {
        warn!("Resetting USB bridge");
        self.send(report(self.packet_size, &[AX_CMD_RESET]))
    }

    pub fn send_null(&mut self) -> Result<(), TransportError> {
        self.send(report(self.packet_size, &[0x00]))
    }
}

impl PageTransport for UsbBridgeTransport {
    #[instrument(level = "trace", skip(self), fields(address = %format!("0x{:04X}", address)))]
    fn read_page(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError> {
        let chunk_max = max_read_len(self.packet_size);
        let mut data = Vec::with_capacity(length as usize);
        let mut current = address;
        let mut remaining = length as usize;

        while remaining > 0 {
            let chunk = remaining.min(chunk_max);
            let response = self.transact(read_request(self.packet_size, current, chunk)?)?;
            data.extend_from_slice(read_response(current, &response, chunk)?);
            current = current.wrapping_add(chunk as u16);
            remaining -= chunk;
        }
        Ok(data)
    }

    #[instrument(level = "trace", skip(self, payload), fields(address = %format!("0x{:04X}", address), len = payload.len()))]
    fn write_page(&mut self, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        let mut current = address;
        for chunk in payload.chunks(max_write_len(self.packet_size)) {
            let response = self.transact(write_request(self.packet_size, current, chunk)?)?;
            write_ack(current, &response)?;
            current = current.wrapping_add(chunk.len() as u16);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.proxy_on_close.take() {
            Some(target) if self.supports_proxy() => {
                self.set_proxy_mode(target.report_address, target.max_report_len)
            }
            _ => self.send_null(),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UsbBridge
    }

    fn max_packet_size(&self) -> Option<usize> {
        Some(self.packet_size)
    }
}
