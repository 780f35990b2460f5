//! The aXiom device: usage table, paged usage I/O and u02 commands.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::bootloader::Bootloader;
use crate::cdu::Cdu;
use crate::config::{AxiomConfig, dwell};
use crate::error::{AxiomError, Result};
use crate::events::{AxiomEvent, AxiomObserver, AxiomPhase, TracingObserver};
use crate::monitor::wait_for_completion;
use crate::protocol::constants::*;
use crate::transport::PageTransport;
use crate::usage::UsageTable;
use crate::usages::{CrcData, DeviceCapabilities, DeviceInformation, SelfTest, SystemCommand, SystemManager};

/// What `config_write_usage` did with a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Read-only or informational usage, nothing written.
    Ignored,
    /// Written and verified through the CDU sub-protocol.
    Cdu,
    /// Written and verified page by page.
    Paged,
}

/// Host-side handle to one aXiom device.
pub struct Axiom<T: PageTransport, O: AxiomObserver = TracingObserver> {
    transport: T,
    config: AxiomConfig,
    table: UsageTable,
    observer: Arc<O>,
    phase: AxiomPhase,
}

impl<T: PageTransport> Axiom<T, TracingObserver> {
    /// Wrap a transport. The usage table starts unpopulated.
    pub fn new(transport: T, config: AxiomConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }

    /// Wrap a transport and discover the usage table unless the device
    /// sits in its bootloader.
    pub fn open(transport: T, config: AxiomConfig) -> Result<Self> {
        let mut axiom = Self::new(transport, config);
        axiom.connect()?;
        Ok(axiom)
    }
}

impl<T: PageTransport, O: AxiomObserver> Axiom<T, O> {
    pub fn with_observer(transport: T, config: AxiomConfig, observer: Arc<O>) -> Self {
        Self {
            transport,
            config,
            table: UsageTable::new(),
            observer,
            phase: AxiomPhase::Idle,
        }
    }

    /// Announce the link and build the usage table.
    pub fn connect(&mut self) -> Result<bool> {
        self.emit(AxiomEvent::DeviceConnected {
            transport: self.transport.kind(),
        });
        self.build_usage_table()
    }

    pub(crate) fn emit(&self, event: AxiomEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn set_phase(&mut self, to: AxiomPhase) {
        if self.phase != to {
            let from = self.phase;
            self.phase = to;
            self.emit(AxiomEvent::PhaseChanged { from, to });
        }
    }

    /// Move to `Error` when `result` failed, then hand it back.
    pub(crate) fn track<R>(&mut self, result: Result<R>) -> Result<R> {
        if result.is_err() {
            self.set_phase(AxiomPhase::Error);
        }
        result
    }

    /// Current driver phase.
    pub fn phase(&self) -> AxiomPhase {
        self.phase
    }

    pub fn config(&self) -> &AxiomConfig {
        &self.config
    }

    pub fn usage_table(&self) -> &UsageTable {
        &self.table
    }

    pub(crate) fn clear_usage_table(&mut self) {
        self.table = UsageTable::new();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read u31 page 0 directly, independent of the usage table.
    pub fn device_information(&mut self) -> Result<DeviceInformation> {
        let page0 = self.transport.read_page(0x0000, U31_PAGE0_LEN)?;
        Ok(DeviceInformation::decode(&page0)?)
    }

    /// Whether the bootloader flag in u31 page 0 is set.
    pub fn is_in_bootloader_mode(&mut self) -> Result<bool> {
        let page0 = self.transport.read_page(0x0000, U31_PAGE0_LEN)?;
        Ok(page0.get(1).is_some_and(|b| b & U31_BOOTLOADER_FLAG != 0))
    }

    /// Rebuild the usage table from u31.
    ///
    /// Returns `false`, leaving the table unpopulated, when the device is in
    /// bootloader mode.
    #[instrument(level = "info", skip(self))]
    pub fn build_usage_table(&mut self) -> Result<bool> {
        self.set_phase(AxiomPhase::Discovery);
        let result = self.discover();
        let built = self.track(result)?;
        self.set_phase(AxiomPhase::Idle);
        Ok(built)
    }

    fn discover(&mut self) -> Result<bool> {
        self.clear_usage_table();

        let info = self.device_information()?;
        if info.bootloader_mode {
            info!("Device is in bootloader mode, usage table not built");
            return Ok(false);
        }

        let address = self.table.target_address(USAGE_DEVICE_INFO, 1)?;
        let length = info.num_usages as u16 * USAGE_TABLE_ENTRY_SIZE as u16;
        let records = self.transport.read_page(address, length)?;
        self.table = UsageTable::from_records(info.num_usages, &records)?;

        info!(
            device = %info.short_string(),
            num_usages = info.num_usages,
            max_report_len = self.table.max_report_len(),
            "Usage table built"
        );
        self.emit(AxiomEvent::UsageTableBuilt {
            num_usages: info.num_usages,
        });
        Ok(true)
    }

    /// Read the whole usage.
    pub fn read_usage(&mut self, usage: u8) -> Result<Vec<u8>> {
        self.read_pages(usage, None)
    }

    /// Read the first `length` bytes of a usage, capped to its size.
    pub fn read_usage_len(&mut self, usage: u8, length: usize) -> Result<Vec<u8>> {
        self.read_pages(usage, Some(length))
    }

    fn read_pages(&mut self, usage: u8, requested: Option<usize>) -> Result<Vec<u8>> {
        let entry = *self.table.entry(usage)?;
        let total = entry.length();
        let mut content = Vec::with_capacity(requested.unwrap_or(total).min(total));

        for page in 0..entry.num_pages {
            let offset = PAGE_SIZE * page as usize;
            let mut read_length = if page == entry.num_pages - 1 {
                total - offset
            } else {
                PAGE_SIZE
            };
            if let Some(n) = requested
                && n <= total
                && offset + PAGE_SIZE > n
            {
                read_length = n - offset;
            }
            if read_length == 0 {
                break;
            }

            let address = self.table.target_address(usage, page)?;
            debug!(
                usage = %format!("u{:02X}", usage),
                address = %format!("0x{:04X}", address),
                len = read_length,
                "Read page"
            );
            content.extend(self.transport.read_page(address, read_length as u16)?);

            if read_length < PAGE_SIZE {
                break;
            }
        }
        Ok(content)
    }

    /// Write a usage page by page, waiting for the firmware to apply each page.
    ///
    /// `buffer` must hold at least the usage length; extra bytes are ignored.
    pub fn write_usage(&mut self, usage: u8, buffer: &[u8]) -> Result<()> {
        let entry = *self.table.entry(usage)?;
        let total = entry.length();
        if buffer.len() < total {
            return Err(AxiomError::InvalidLength {
                usage,
                expected: total,
                actual: buffer.len(),
            });
        }

        for page in 0..entry.num_pages {
            let offset = PAGE_SIZE * page as usize;
            let write_length = if page == entry.num_pages - 1 {
                total - offset
            } else {
                PAGE_SIZE
            };
            let address = self.table.target_address(usage, page)?;
            debug!(
                usage = %format!("u{:02X}", usage),
                address = %format!("0x{:04X}", address),
                len = write_length,
                "Write page"
            );
            self.transport
                .write_page(address, &buffer[offset..offset + write_length])?;
            self.check_usage_write_progress(usage)?;
        }
        Ok(())
    }

    fn read_system_manager_command(&mut self) -> Result<u16> {
        Ok(self.system_manager()?.regs().command)
    }

    /// Wait for the firmware to finish applying a usage write.
    ///
    /// Skipped for u02 itself and for command driven usages. Returns the
    /// number of polls that saw the write still in progress.
    pub fn check_usage_write_progress(&mut self, usage: u8) -> Result<u32> {
        if usage == USAGE_SYSTEM_MANAGER || self.config.policy.is_command_driven(usage) {
            return Ok(0);
        }
        let retries = self.config.write_monitor_retries;
        let interval = self.config.write_monitor_interval_ms;
        let result = wait_for_completion(usage, SYSMGR_WRITE_IN_PROGRESS, retries, interval, || {
            self.read_system_manager_command()
        });
        self.report_failure(result)
    }

    fn report_failure(&self, result: Result<u32>) -> Result<u32> {
        if let Err(AxiomError::CommandFailed { usage, code }) = &result {
            self.emit(AxiomEvent::CommandFailed {
                usage: *usage,
                code: *code,
            });
        }
        result
    }

    /// Read and decode u02.
    pub fn system_manager(&mut self) -> Result<SystemManager> {
        let revision = self.table.revision(USAGE_SYSTEM_MANAGER)?;
        let data = self.read_usage(USAGE_SYSTEM_MANAGER)?;
        Ok(SystemManager::decode(revision, &data)?)
    }

    /// Read and decode u32.
    pub fn device_capabilities(&mut self) -> Result<DeviceCapabilities> {
        let revision = self.table.revision(USAGE_DEVICE_CAPABILITIES)?;
        let data = self.read_usage(USAGE_DEVICE_CAPABILITIES)?;
        Ok(DeviceCapabilities::decode(revision, &data)?)
    }

    /// Read and decode u33. Run `SystemCommand::ComputeCrcs` first for
    /// current values.
    pub fn crc_data(&mut self) -> Result<CrcData> {
        let revision = self.table.revision(USAGE_CRC_DATA)?;
        let data = self.read_usage(USAGE_CRC_DATA)?;
        Ok(CrcData::decode(revision, &data)?)
    }

    /// Read and decode u06.
    pub fn self_test(&mut self) -> Result<SelfTest> {
        let revision = self.table.revision(USAGE_SELF_TEST)?;
        let data = self.read_usage(USAGE_SELF_TEST)?;
        Ok(SelfTest::decode(revision, &data)?)
    }

    fn write_system_manager(&mut self, u02: &SystemManager) -> Result<()> {
        let mut buffer = vec![0u8; self.table.length(USAGE_SYSTEM_MANAGER)?];
        u02.encode_into(&mut buffer)?;
        self.write_usage(USAGE_SYSTEM_MANAGER, &buffer)
    }

    /// Issue a u02 command and wait for it to complete.
    pub fn send_command(&mut self, command: SystemCommand) -> Result<()> {
        self.set_phase(AxiomPhase::Command);
        let result = self.issue_command(command);
        self.track(result)?;
        self.set_phase(AxiomPhase::Idle);
        Ok(())
    }

    /// `send_command` without phase changes, for callers running their own
    /// handshake.
    #[instrument(level = "info", skip_all, fields(command = %command))]
    pub(crate) fn issue_command(&mut self, command: SystemCommand) -> Result<()> {
        let revision = self.table.revision(USAGE_SYSTEM_MANAGER)?;
        let mut u02 = SystemManager::new(revision)?;
        let code = command.code();

        if command == SystemCommand::EnterBootloader {
            let sequence = SystemCommand::entry_sequence();
            for (step, magic) in sequence.iter().enumerate() {
                let regs = u02.regs_mut();
                regs.command = code;
                regs.parameters[0] = *magic;
                self.write_system_manager(&u02)?;
                if step + 1 < sequence.len() {
                    dwell(self.config.bootloader_magic_dwell_ms);
                } else {
                    dwell(self.config.bootloader_entry_dwell_ms);
                }
            }
            return Ok(());
        }

        let regs = u02.regs_mut();
        regs.command = code;
        if let Some(parameters) = command.parameters() {
            regs.parameters = parameters;
        }
        self.write_system_manager(&u02)?;
        dwell(self.config.command_dwell_ms);

        if !command.skips_verify() {
            let retries = self.config.command_retries;
            let interval = self.config.command_interval_ms;
            let result = wait_for_completion(USAGE_SYSTEM_MANAGER, code, retries, interval, || {
                self.read_system_manager_command()
            });
            let polls = self.report_failure(result)?;
            debug!(polls, "Command complete");
        }
        Ok(())
    }

    /// Write a configuration buffer to a usage and verify it by reading back.
    #[instrument(level = "info", skip_all, fields(usage = %format!("u{:02X}", usage), len = buffer.len()))]
    pub fn config_write_usage(&mut self, usage: u8, buffer: &[u8]) -> Result<WriteDisposition> {
        if self.config.policy.is_ignored(usage) {
            debug!("Read-only usage, skipped");
            return Ok(WriteDisposition::Ignored);
        }

        let (disposition, actual) = if self.config.policy.is_command_driven(usage) {
            let mut cdu = self.cdu();
            cdu.write(usage, buffer)?;
            (WriteDisposition::Cdu, cdu.read(usage)?)
        } else {
            self.set_phase(AxiomPhase::UsageTransfer);
            let result = self.write_usage(usage, buffer).and_then(|_| self.read_usage(usage));
            (WriteDisposition::Paged, self.track(result)?)
        };

        if actual != buffer {
            self.set_phase(AxiomPhase::Error);
            warn!(
                expected_len = buffer.len(),
                actual_len = actual.len(),
                "Read back does not match"
            );
            return Err(AxiomError::VerifyMismatch {
                usage,
                expected: buffer.to_vec(),
                actual,
            });
        }
        self.set_phase(AxiomPhase::Idle);
        Ok(disposition)
    }

    /// Command driven usage access.
    pub fn cdu(&mut self) -> Cdu<'_, T, O> {
        Cdu::new(self)
    }

    /// Bootloader entry and firmware upload.
    pub fn bootloader(&mut self) -> Bootloader<'_, T, O> {
        Bootloader::new(self)
    }

    pub fn close(&mut self) -> Result<()> {
        self.transport.close()?;
        Ok(())
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::events::NullObserver;
    use crate::events::tests::RecordingObserver;
    use crate::transport::{MockTransport, MockUsage};
    use crate::usages::DecodeError;

    fn axiom(mock: &MockTransport) -> Axiom<MockTransport, NullObserver> {
        axiom_with(mock, test_config())
    }

    fn axiom_with(mock: &MockTransport, config: AxiomConfig) -> Axiom<MockTransport, NullObserver> {
        let mut axiom = Axiom::with_observer(mock.clone(), config, Arc::new(NullObserver));
        assert!(axiom.build_usage_table().unwrap());
        mock.clear_log();
        axiom
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_build_usage_table() {
        let mock = MockTransport::standard();
        let axiom = axiom(&mock);
        let table = axiom.usage_table();
        assert!(table.is_populated());
        assert_eq!(table.len(), 10);
        assert_eq!(table.length(0x31).unwrap(), 256 + 60);
        assert_eq!(table.length(0x20).unwrap(), 552);
        assert_eq!(table.max_report_len(), 128);
    }

    #[test]
    fn test_build_usage_table_reads_records_at_page1() {
        let mock = MockTransport::standard();
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), Arc::new(NullObserver));
        axiom.build_usage_table().unwrap();
        assert_eq!(mock.reads(), vec![(0x0000, 12), (0x0100, 60)]);
    }

    #[test]
    fn test_build_usage_table_in_bootloader() {
        let mock = MockTransport::standard();
        mock.set_bootloader_mode(true);
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), Arc::new(NullObserver));
        assert!(!axiom.build_usage_table().unwrap());
        assert!(!axiom.usage_table().is_populated());
        assert!(axiom.is_in_bootloader_mode().unwrap());
    }

    #[test]
    fn test_build_usage_table_bus_failure_sets_error_phase() {
        let mock = MockTransport::standard();
        mock.queue_read_failure(0x0000);
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), Arc::new(NullObserver));

        assert!(axiom.build_usage_table().is_err());
        assert_eq!(axiom.phase(), AxiomPhase::Error);
        assert!(axiom.build_usage_table().unwrap());
        assert_eq!(axiom.phase(), AxiomPhase::Idle);
    }

    #[test]
    fn test_connect_emits_events() {
        let mock = MockTransport::standard();
        let observer = Arc::new(RecordingObserver::default());
        let mut axiom = Axiom::with_observer(mock, test_config(), observer.clone());
        axiom.connect().unwrap();

        let events = observer.events.lock().unwrap();
        assert!(matches!(events[0], AxiomEvent::DeviceConnected { .. }));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, AxiomEvent::UsageTableBuilt { num_usages: 10 }))
        );
    }

    #[test]
    fn test_device_information() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        let info = axiom.device_information().unwrap();
        assert_eq!(info.short_string(), "AX112A 4.8.3-prod 3D");
        assert_eq!(info.num_usages, 10);
    }

    #[test]
    fn test_usage_access_before_table() {
        let mock = MockTransport::standard();
        let mut axiom = Axiom::with_observer(mock, test_config(), Arc::new(NullObserver));
        assert!(matches!(
            axiom.read_usage(0x48),
            Err(AxiomError::TableNotPopulated { usage: 0x48 })
        ));
    }

    #[test]
    fn test_paged_round_trip_single_page() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        let data = pattern(256);

        axiom.write_usage(0x48, &data).unwrap();
        assert_eq!(mock.writes_to(0x0900).len(), 1);
        assert_eq!(axiom.read_usage(0x48).unwrap(), data);
    }

    #[test]
    fn test_paged_round_trip_multi_page() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        let data = pattern(512);

        axiom.write_usage(0x40, &data).unwrap();
        assert_eq!(mock.writes_to(0x0A00)[0].len(), 256);
        assert_eq!(mock.writes_to(0x0B00)[0].len(), 256);
        assert_eq!(axiom.read_usage(0x40).unwrap(), data);
    }

    #[test]
    fn test_paged_round_trip_remainder() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        let data = pattern(552);

        axiom.write_usage(0x20, &data).unwrap();
        assert_eq!(mock.writes_to(0x0800)[0].len(), 40);
        // monitor runs after every page
        assert_eq!(mock.reads_at(0x0200), 3);

        mock.clear_log();
        assert_eq!(axiom.read_usage(0x20).unwrap(), data);
        assert_eq!(mock.reads(), vec![(0x0600, 256), (0x0700, 256), (0x0800, 40)]);
    }

    #[test]
    fn test_read_usage_len_clips_pages() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);

        assert_eq!(axiom.read_usage_len(0x20, 300).unwrap().len(), 300);
        assert_eq!(mock.reads(), vec![(0x0600, 256), (0x0700, 44)]);

        mock.clear_log();
        assert_eq!(axiom.read_usage_len(0x20, 256).unwrap().len(), 256);
        assert_eq!(mock.reads(), vec![(0x0600, 256)]);

        mock.clear_log();
        assert_eq!(axiom.read_usage_len(0x20, 10).unwrap().len(), 10);
        assert_eq!(mock.reads(), vec![(0x0600, 10)]);
    }

    #[test]
    fn test_read_usage_len_caps_to_usage() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        assert_eq!(axiom.read_usage_len(0x20, 5000).unwrap().len(), 552);
    }

    #[test]
    fn test_report_usage_reads_empty() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        assert!(axiom.read_usage(0x34).unwrap().is_empty());
        assert!(mock.reads().is_empty());
    }

    #[test]
    fn test_write_usage_short_buffer() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        assert!(matches!(
            axiom.write_usage(0x48, &[0u8; 100]),
            Err(AxiomError::InvalidLength {
                usage: 0x48,
                expected: 256,
                actual: 100
            })
        ));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_write_progress_two_retries() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        mock.queue_status(0x0200, 0x7FFF);
        mock.queue_status(0x0200, 0x7FFF);
        mock.queue_status(0x0200, 0x0000);

        assert_eq!(axiom.check_usage_write_progress(0x48).unwrap(), 2);
        assert_eq!(mock.reads_at(0x0200), 3);
    }

    #[test]
    fn test_write_progress_failure_code() {
        let mock = MockTransport::standard();
        let observer = Arc::new(RecordingObserver::default());
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), observer.clone());
        axiom.build_usage_table().unwrap();
        mock.queue_status(0x0200, 0x7FFF);
        mock.queue_status(0x0200, 0x0042);

        let err = axiom.write_usage(0x48, &pattern(256)).unwrap_err();
        assert!(matches!(
            err,
            AxiomError::CommandFailed {
                usage: 0x48,
                code: 0x0042
            }
        ));
        assert!(observer.events.lock().unwrap().iter().any(|e| matches!(
            e,
            AxiomEvent::CommandFailed {
                usage: 0x48,
                code: 0x0042
            }
        )));
    }

    #[test]
    fn test_write_progress_timeout() {
        let mock = MockTransport::standard();
        let config = AxiomConfig {
            write_monitor_retries: 3,
            ..test_config()
        };
        let mut axiom = axiom_with(&mock, config);
        for _ in 0..3 {
            mock.queue_status(0x0200, 0x7FFF);
        }
        assert!(matches!(
            axiom.check_usage_write_progress(0x48),
            Err(AxiomError::WriteTimeout {
                usage: 0x48,
                retries: 3,
                last_status: 0x7FFF
            })
        ));
    }

    #[test]
    fn test_write_progress_skips_u02_and_cdu() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        assert_eq!(axiom.check_usage_write_progress(0x02).unwrap(), 0);
        assert_eq!(axiom.check_usage_write_progress(0x22).unwrap(), 0);
        assert!(mock.reads().is_empty());
    }

    #[test]
    fn test_send_save_config() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        axiom.send_command(SystemCommand::SaveConfig).unwrap();

        let writes = mock.writes_to(0x0200);
        assert_eq!(writes, vec![vec![0x07, 0x00, 0x00, 0x00, 0x0C, 0xB1, 0xDE, 0xC0]]);
        assert_eq!(mock.reads_at(0x0200), 1);
    }

    #[test]
    fn test_send_command_in_progress_then_failure() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        mock.queue_status(0x0200, SystemCommand::Stop.code());
        mock.queue_status(0x0200, 0x0101);

        assert!(matches!(
            axiom.send_command(SystemCommand::Stop),
            Err(AxiomError::CommandFailed {
                usage: 0x02,
                code: 0x0101
            })
        ));
        assert_eq!(axiom.phase(), AxiomPhase::Error);

        axiom.send_command(SystemCommand::Stop).unwrap();
        assert_eq!(axiom.phase(), AxiomPhase::Idle);
    }

    #[test]
    fn test_reset_skips_verify() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        axiom.send_command(SystemCommand::SoftReset).unwrap();
        assert_eq!(mock.reads_at(0x0200), 0);
    }

    #[test]
    fn test_enter_bootloader_sequence() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        axiom.send_command(SystemCommand::EnterBootloader).unwrap();

        let params: Vec<[u8; 4]> = mock
            .writes_to(0x0200)
            .iter()
            .map(|w| [w[0], w[1], w[2], w[3]])
            .collect();
        assert_eq!(
            params,
            vec![[0x0B, 0, 0x55, 0x55], [0x0B, 0, 0xAA, 0xAA], [0x0B, 0, 0x5A, 0xA5]]
        );
        assert_eq!(mock.entry_sequences(), 1);
    }

    #[test]
    fn test_config_write_ignored() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        assert_eq!(
            axiom.config_write_usage(0x32, &[0u8; 24]).unwrap(),
            WriteDisposition::Ignored
        );
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_config_write_paged_verified() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        let data = pattern(256);
        assert_eq!(
            axiom.config_write_usage(0x48, &data).unwrap(),
            WriteDisposition::Paged
        );
        assert_eq!(mock.peek(0x0900, 256), data);
    }

    #[test]
    fn test_config_write_mismatch() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock);
        mock.queue_read(0x0900, &[0xFF; 256]);

        match axiom.config_write_usage(0x48, &pattern(256)) {
            Err(AxiomError::VerifyMismatch {
                usage,
                expected,
                actual,
            }) => {
                assert_eq!(usage, 0x48);
                assert_eq!(expected, pattern(256));
                assert_eq!(actual, vec![0xFF; 256]);
            }
            other => panic!("expected VerifyMismatch, got {:?}", other),
        }
        assert_eq!(axiom.phase(), AxiomPhase::Error);
    }

    #[test]
    fn test_config_write_cdu() {
        let mock = MockTransport::standard();
        let data = pattern(100);
        mock.add_cdu(0x22, [100, 1, 0]);
        let mut axiom = axiom(&mock);

        assert_eq!(
            axiom.config_write_usage(0x22, &data).unwrap(),
            WriteDisposition::Cdu
        );
        assert_eq!(&mock.cdu_data(0x22)[..100], &data[..]);
    }

    #[test]
    fn test_device_capabilities() {
        let mock = MockTransport::standard();
        let mut caps = vec![0x00, 0x04, 32, 4, 30, 2, 1, 2, 3, 4, 5, 6, 0, 8, 0x80, 0, 3, 0, 0x03, 0x10];
        caps.extend_from_slice(&100u32.to_le_bytes());
        mock.poke(0x0C00, &caps);
        let mut axiom = axiom(&mock);

        let decoded = axiom.device_capabilities().unwrap();
        assert_eq!(decoded.max_cts_nodes, 1024);
        assert_eq!(decoded.num_user_gpios(), 1);
    }

    #[test]
    fn test_crc_data_decodes_current_revision() {
        let mock = MockTransport::standard();
        let words: Vec<u8> = [1u32, 2, 3, 0x1111, 0x2222, 0x22, 0x43, 0x77, 0x93, 0x94, 0xAA]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        mock.poke(0x0D00, &words);
        let mut axiom = axiom(&mock);

        let crc = axiom.crc_data().unwrap();
        assert_eq!(crc.revision(), 3);
        assert_eq!(crc.regs().nvltl_usage_config_crc, 0x1111);
        assert_eq!(crc.regs().u77_dod_calibration_crc, Some(0x77));
    }

    #[test]
    fn test_self_test_unsupported_revision() {
        const USAGES: &[MockUsage] = &[
            MockUsage::new(0x31, 0, 2, 0x00, 1),
            MockUsage::new(0x06, 2, 1, 0x51, 6),
        ];
        let mock = MockTransport::with_usages(USAGES);
        let mut axiom = axiom(&mock);

        assert!(matches!(
            axiom.self_test(),
            Err(AxiomError::Decode(DecodeError::UnsupportedRevision { usage: 0x06, revision: 6 }))
        ));
    }

    #[test]
    fn test_self_test_rev7() {
        const USAGES: &[MockUsage] = &[
            MockUsage::new(0x31, 0, 2, 0x00, 1),
            MockUsage::new(0x06, 2, 1, 0x51, 7),
        ];
        let mock = MockTransport::with_usages(USAGES);
        mock.poke(0x0200, &[0x03, 0x00]);
        let mut axiom = axiom(&mock);

        let self_test = axiom.self_test().unwrap();
        assert_eq!(self_test.revision(), 7);
        assert!(self_test.regs().enable_on_boot);
        assert_eq!(self_test.regs().channel_limits.len(), 16);
    }
}
