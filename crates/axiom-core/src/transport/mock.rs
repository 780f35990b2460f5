//! Mock page transport for testing.
//!
//! Simulates an aXiom device behind the page interface: a 64 KiB address
//! space, a programmable usage table, u02 command handling, command driven
//! usages and the bootloader status register.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{PageTransport, TransportError, TransportKind};
use crate::protocol::constants::*;

const ADDRESS_SPACE: usize = 0x1_0000;

/// A usage table record reported by the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockUsage {
    pub id: u8,
    pub start_page: u8,
    pub num_pages: u8,
    pub max_offset: u8,
    pub revision: u8,
}

impl MockUsage {
    pub const fn new(id: u8, start_page: u8, num_pages: u8, max_offset: u8, revision: u8) -> Self {
        Self {
            id,
            start_page,
            num_pages,
            max_offset,
            revision,
        }
    }
}

/// Usage layout of `MockTransport::standard()`.
pub const STANDARD_USAGES: &[MockUsage] = &[
    MockUsage::new(0x31, 0, 2, 0x00, 1),
    MockUsage::new(0x02, 2, 1, 0x03, 1),
    MockUsage::new(0x22, 3, 1, 0x1B, 1),
    MockUsage::new(0x93, 4, 1, 0x1B, 1),
    MockUsage::new(0x34, 5, 0, 0x3F, 3),
    MockUsage::new(0x20, 6, 3, 0x13, 1),
    MockUsage::new(0x48, 9, 1, 0x7F, 1),
    MockUsage::new(0x40, 10, 2, 0x7F, 2),
    MockUsage::new(0x32, 12, 1, 0x0B, 1),
    MockUsage::new(0x33, 13, 1, 0x3F, 3),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusySim {
    Idle,
    For(u32),
    Always,
}

#[derive(Debug, Default)]
struct CduSim {
    params: [u16; 3],
    data: Vec<u8>,
    staged: Vec<u8>,
    busy_polls: u32,
    pending_busy: u32,
    error_status: Option<u16>,
    last_command: u16,
}

#[derive(Debug)]
struct MockDevice {
    memory: Vec<u8>,
    usages: Vec<MockUsage>,
    scripted: HashMap<u16, VecDeque<Option<Vec<u8>>>>,
    reads: Vec<(u16, u16)>,
    writes: Vec<(u16, Vec<u8>)>,
    connected: bool,
    closed: bool,
    cdus: HashMap<u16, CduSim>,
    enter_bootloader_after: Option<u32>,
    magic_step: usize,
    entry_sequences: u32,
    busy: BusySim,
    max_packet_size: Option<usize>,
}

impl MockDevice {
    fn new() -> Self {
        Self {
            memory: vec![0; ADDRESS_SPACE],
            usages: Vec::new(),
            scripted: HashMap::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            connected: true,
            closed: false,
            cdus: HashMap::new(),
            enter_bootloader_after: None,
            magic_step: 0,
            entry_sequences: 0,
            busy: BusySim::Idle,
            max_packet_size: None,
        }
    }

    fn in_bootloader(&self) -> bool {
        self.memory[1] & U31_BOOTLOADER_FLAG != 0
    }

    fn set_bootloader(&mut self, enabled: bool) {
        if enabled {
            self.memory[1] |= U31_BOOTLOADER_FLAG;
        } else {
            self.memory[1] &= !U31_BOOTLOADER_FLAG;
        }
    }

    fn usage_address(&self, id: u8) -> Option<u16> {
        self.usages
            .iter()
            .find(|u| u.id == id)
            .map(|u| (u.start_page as u16) << 8)
    }

    fn store(&mut self, address: u16, data: &[u8]) {
        let start = address as usize;
        let end = (start + data.len()).min(ADDRESS_SPACE);
        self.memory[start..end].copy_from_slice(&data[..end - start]);
    }

    fn load(&self, address: u16, length: usize) -> Vec<u8> {
        let start = address as usize;
        let end = (start + length).min(ADDRESS_SPACE);
        let mut data = self.memory[start..end].to_vec();
        data.resize(length, 0);
        data
    }

    fn read(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError> {
        self.reads.push((address, length));
        let length = length as usize;

        if let Some(queue) = self.scripted.get_mut(&address)
            && let Some(scripted) = queue.pop_front()
        {
            let mut data = scripted.ok_or_else(|| TransportError::Bus("NACK".into()))?;
            data.resize(length, 0);
            return Ok(data);
        }

        if self.in_bootloader() && address == BLP_REG_STATUS && length == BLP_STATUS_LEN as usize {
            let busy = match self.busy {
                BusySim::Idle => false,
                BusySim::Always => true,
                BusySim::For(0) => {
                    self.busy = BusySim::Idle;
                    false
                }
                BusySim::For(n) => {
                    self.busy = BusySim::For(n - 1);
                    true
                }
            };
            let mut status = vec![0u8; length];
            status[BLP_BUSY_BYTE] = if busy { BLP_BUSY_MASK } else { 0 };
            return Ok(status);
        }

        let mut data = self.load(address, length);
        if let Some(cdu) = self.cdus.get_mut(&address)
            && cdu.pending_busy > 0
            && data.len() >= 2
        {
            cdu.pending_busy -= 1;
            data[..2].copy_from_slice(&cdu.last_command.to_le_bytes());
        }
        Ok(data)
    }

    fn write(&mut self, address: u16, payload: &[u8]) {
        self.writes.push((address, payload.to_vec()));

        if self.in_bootloader() && (address == BLP_REG_COMMAND || address == BLP_FIFO_ADDRESS) {
            if address == BLP_REG_COMMAND && payload == BLP_CMD_RESET {
                self.set_bootloader(false);
            }
            return;
        }

        self.store(address, payload);

        if Some(address) == self.usage_address(USAGE_SYSTEM_MANAGER) {
            self.system_manager_write(address, payload);
        }
        if self.cdus.contains_key(&address) {
            self.cdu_write(address, payload);
        }
    }

    fn system_manager_write(&mut self, address: u16, payload: &[u8]) {
        if payload.len() < 4 {
            return;
        }
        let command = u16::from_le_bytes([payload[0], payload[1]]);
        let param0 = u16::from_le_bytes([payload[2], payload[3]]);

        if command == 11 {
            self.magic_step = match (self.magic_step, param0) {
                (0, 0x5555) => 1,
                (1, 0xAAAA) => 2,
                (2, 0xA55A) => {
                    self.entry_sequences += 1;
                    if self
                        .enter_bootloader_after
                        .is_some_and(|n| self.entry_sequences >= n)
                    {
                        self.set_bootloader(true);
                    }
                    0
                }
                _ => 0,
            };
        }

        // Commands complete instantly.
        self.store(address, &SYSMGR_IDLE.to_le_bytes());
    }

    fn cdu_write(&mut self, address: u16, payload: &[u8]) {
        if payload.len() < CDU_PAYLOAD_OFFSET {
            return;
        }
        let Some(cdu) = self.cdus.get_mut(&address) else {
            return;
        };
        let command = u16::from_le_bytes([payload[0], payload[1]]);
        let offset = u16::from_le_bytes([payload[4], payload[5]]) as usize;
        let window = payload.len().saturating_sub(CDU_PAYLOAD_OFFSET).min(CDU_XFER_SIZE);

        let mut response = payload.to_vec();
        let mut status = 0u16;
        match command {
            CDU_CMD_QUERY => {
                for (i, param) in cdu.params.iter().enumerate() {
                    response[2 + i * 2..4 + i * 2].copy_from_slice(&param.to_le_bytes());
                }
            }
            CDU_CMD_FETCH => {
                for i in 0..window {
                    response[CDU_PAYLOAD_OFFSET + i] = cdu.data.get(offset + i).copied().unwrap_or(0);
                }
            }
            CDU_CMD_STORE => {
                if cdu.staged.len() < offset + window {
                    cdu.staged.resize(offset + window, 0);
                }
                cdu.staged[offset..offset + window]
                    .copy_from_slice(&payload[CDU_PAYLOAD_OFFSET..CDU_PAYLOAD_OFFSET + window]);
            }
            CDU_CMD_COMMIT => {
                if payload[2..6] == CDU_COMMIT_MAGIC {
                    cdu.data = std::mem::take(&mut cdu.staged);
                } else {
                    status = CDU_ERROR_MASK | CDU_CMD_COMMIT;
                }
            }
            other => status = CDU_ERROR_MASK | other,
        }

        let status = cdu.error_status.unwrap_or(status);
        response[..2].copy_from_slice(&status.to_le_bytes());
        cdu.last_command = command;
        cdu.pending_busy = cdu.busy_polls;
        self.store(address, &response);
    }

    fn install_usage_table(&mut self, usages: &[MockUsage]) {
        // u31 page 0: AX112A, firmware 4.8.3-prod 3D, bootloader 1.02
        let num_usages = usages.len() as u8;
        let page0 = [
            0x70, 0x00, 0x08, 0x04, 0x80, 0x00, 0x02, 0x01, 0x46, 0x02, num_usages, 0x31,
        ];
        self.store(0, &page0);

        let mut table = Vec::with_capacity(usages.len() * USAGE_TABLE_ENTRY_SIZE);
        for u in usages {
            table.extend_from_slice(&[u.id, u.start_page, u.num_pages, u.max_offset, u.revision, 0]);
        }
        self.store(PAGE_SIZE as u16, &table);
        self.usages = usages.to_vec();
    }
}

/// Mock transport for unit testing protocol logic.
///
/// Clones share the same simulated device, so a test can keep a handle
/// after moving the transport into an `Axiom`.
#[derive(Clone)]
pub struct MockTransport {
    device: Arc<Mutex<MockDevice>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(MockDevice::new())),
        }
    }

    /// Device reporting the given usage table.
    pub fn with_usages(usages: &[MockUsage]) -> Self {
        let mock = Self::new();
        mock.device().install_usage_table(usages);
        mock
    }

    /// Device reporting `STANDARD_USAGES`.
    pub fn standard() -> Self {
        Self::with_usages(STANDARD_USAGES)
    }

    fn device(&self) -> MutexGuard<'_, MockDevice> {
        // A panicking test poisons the lock; later assertions still want the state.
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Force the bootloader flag in u31 page 0.
    pub fn set_bootloader_mode(&self, enabled: bool) {
        self.device().set_bootloader(enabled);
    }

    pub fn in_bootloader_mode(&self) -> bool {
        self.device().in_bootloader()
    }

    /// Queue a response returned by the next read at `address`.
    pub fn queue_read(&self, address: u16, data: &[u8]) {
        self.device()
            .scripted
            .entry(address)
            .or_default()
            .push_back(Some(data.to_vec()));
    }

    /// Fail the next read at `address` with a bus error.
    pub fn queue_read_failure(&self, address: u16) {
        self.device()
            .scripted
            .entry(address)
            .or_default()
            .push_back(None);
    }

    /// Queue a 16-bit status word for the next read at `address`.
    pub fn queue_status(&self, address: u16, status: u16) {
        self.queue_read(address, &status.to_le_bytes());
    }

    /// Write directly into device memory, bypassing the protocol.
    pub fn poke(&self, address: u16, data: &[u8]) {
        self.device().store(address, data);
    }

    /// Read directly from device memory, bypassing the protocol.
    pub fn peek(&self, address: u16, length: usize) -> Vec<u8> {
        self.device().load(address, length)
    }

    /// Page-0 address of a usage in the installed table.
    pub fn usage_address(&self, id: u8) -> Option<u16> {
        self.device().usage_address(id)
    }

    /// Set the bootloader flag after `sequences` complete entry sequences.
    pub fn enter_bootloader_after(&self, sequences: Option<u32>) {
        self.device().enter_bootloader_after = sequences;
    }

    /// Complete enter-bootloader magic sequences seen so far.
    pub fn entry_sequences(&self) -> u32 {
        self.device().entry_sequences
    }

    /// Report busy for the next `polls` bootloader status reads.
    pub fn set_busy_for(&self, polls: u32) {
        self.device().busy = BusySim::For(polls);
    }

    /// Report busy on every bootloader status read.
    pub fn set_always_busy(&self) {
        self.device().busy = BusySim::Always;
    }

    /// Emulate a command driven usage with the given QUERY parameters.
    pub fn add_cdu(&self, id: u8, params: [u16; 3]) {
        let mut device = self.device();
        if let Some(address) = device.usage_address(id) {
            device.cdus.insert(
                address,
                CduSim {
                    params,
                    ..Default::default()
                },
            );
        }
    }

    fn with_cdu<R>(&self, id: u8, f: impl FnOnce(&mut CduSim) -> R) -> Option<R> {
        let mut device = self.device();
        let address = device.usage_address(id)?;
        device.cdus.get_mut(&address).map(f)
    }

    /// Committed contents of a command driven usage.
    pub fn cdu_data(&self, id: u8) -> Vec<u8> {
        self.with_cdu(id, |cdu| cdu.data.clone()).unwrap_or_default()
    }

    pub fn set_cdu_data(&self, id: u8, data: &[u8]) {
        self.with_cdu(id, |cdu| cdu.data = data.to_vec());
    }

    /// Report "still processing" for `polls` reads after every command.
    pub fn set_cdu_busy_polls(&self, id: u8, polls: u32) {
        self.with_cdu(id, |cdu| cdu.busy_polls = polls);
    }

    /// Override the status word of every command response.
    pub fn set_cdu_error(&self, id: u8, status: Option<u16>) {
        self.with_cdu(id, |cdu| cdu.error_status = status);
    }

    /// All reads as `(address, length)`.
    pub fn reads(&self) -> Vec<(u16, u16)> {
        self.device().reads.clone()
    }

    /// Number of reads issued at `address`.
    pub fn reads_at(&self, address: u16) -> usize {
        self.device().reads.iter().filter(|(a, _)| *a == address).count()
    }

    /// All writes as `(address, payload)`.
    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.device().writes.clone()
    }

    /// Payloads written to `address`.
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.device()
            .writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Clear captured reads and writes.
    pub fn clear_log(&self) {
        let mut device = self.device();
        device.reads.clear();
        device.writes.clear();
    }

    pub fn set_max_packet_size(&self, size: Option<usize>) {
        self.device().max_packet_size = size;
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.device().connected = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        self.device().connected = true;
    }

    pub fn is_closed(&self) -> bool {
        self.device().closed
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTransport for MockTransport {
    fn read_page(&mut self, address: u16, length: u16) -> Result<Vec<u8>, TransportError> {
        let mut device = self.device();
        if !device.connected {
            return Err(TransportError::Disconnected);
        }
        device.read(address, length)
    }

    fn write_page(&mut self, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        let mut device = self.device();
        if !device.connected {
            return Err(TransportError::Disconnected);
        }
        device.write(address, payload);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.device().closed = true;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Mock
    }

    fn max_packet_size(&self) -> Option<usize> {
        self.device().max_packet_size
    }
}
