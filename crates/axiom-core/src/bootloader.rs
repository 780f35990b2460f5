//! Bootloader entry and firmware upload.

use tracing::{debug, info, instrument, warn};

use crate::config::dwell;
use crate::device::Axiom;
use crate::error::{AxiomError, Result};
use crate::events::{AxiomEvent, AxiomObserver, AxiomPhase};
use crate::protocol::constants::*;
use crate::transport::PageTransport;
use crate::usages::SystemCommand;

/// Outcome of [`Bootloader::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderEntry {
    AlreadyInBootloader,
    Entered { attempts: u32 },
    Failed { attempts: u32 },
}

/// Bootloader access borrowed from an [`Axiom`].
pub struct Bootloader<'a, T: PageTransport, O: AxiomObserver> {
    axiom: &'a mut Axiom<T, O>,
}

impl<'a, T: PageTransport, O: AxiomObserver> Bootloader<'a, T, O> {
    pub(crate) fn new(axiom: &'a mut Axiom<T, O>) -> Self {
        Self { axiom }
    }

    /// Send the enter-bootloader sequence until the u31 flag shows up.
    ///
    /// The usage table is cleared once the device is in its bootloader.
    #[instrument(level = "info", skip(self))]
    pub fn enter(&mut self) -> Result<BootloaderEntry> {
        if self.axiom.is_in_bootloader_mode()? {
            info!("Device already in bootloader mode");
            self.axiom.clear_usage_table();
            return Ok(BootloaderEntry::AlreadyInBootloader);
        }
        if !self.axiom.usage_table().is_populated() && !self.axiom.build_usage_table()? {
            return Ok(BootloaderEntry::AlreadyInBootloader);
        }

        self.axiom.set_phase(AxiomPhase::EnteringBootloader);
        let max_attempts = self.axiom.config().bootloader_entry_attempts;
        for attempt in 1..=max_attempts {
            self.axiom.emit(AxiomEvent::BootloaderAttempt {
                attempt,
                max_attempts,
            });
            let sent = self.axiom.issue_command(SystemCommand::EnterBootloader);
            self.axiom.track(sent)?;

            match self.axiom.is_in_bootloader_mode() {
                Ok(true) => {
                    info!(attempt, "Entered bootloader");
                    self.axiom.clear_usage_table();
                    self.axiom.set_phase(AxiomPhase::Idle);
                    return Ok(BootloaderEntry::Entered { attempts: attempt });
                }
                Ok(false) => debug!(attempt, "Bootloader flag not set yet"),
                // The device drops off the bus while it restarts.
                Err(e) => warn!(attempt, error = %e, "Bootloader flag check failed"),
            }
        }

        warn!(attempts = max_attempts, "Device did not enter bootloader");
        self.axiom.set_phase(AxiomPhase::Error);
        Ok(BootloaderEntry::Failed {
            attempts: max_attempts,
        })
    }

    /// Busy bit of the bootloader status register.
    pub fn is_busy(&mut self) -> Result<bool> {
        let status = self
            .axiom
            .transport_mut()
            .read_page(BLP_REG_STATUS, BLP_STATUS_LEN)?;
        Ok(status
            .get(BLP_BUSY_BYTE)
            .is_some_and(|b| b & BLP_BUSY_MASK != 0))
    }

    /// Poll the status register until the busy bit clears.
    pub fn wait_until_not_busy(&mut self) -> Result<()> {
        let retries = self.axiom.config().busy_retries;
        let interval = self.axiom.config().busy_interval_ms;
        for _ in 0..retries {
            if !self.is_busy()? {
                return Ok(());
            }
            dwell(interval);
        }
        Err(AxiomError::BusyTimeout { retries })
    }

    /// Leave the bootloader and restart the firmware.
    pub fn reset(&mut self) -> Result<()> {
        info!("Resetting device from bootloader");
        self.axiom
            .transport_mut()
            .write_page(BLP_REG_COMMAND, &BLP_CMD_RESET)?;
        Ok(())
    }

    /// Stream a block into the bootloader FIFO, busy-gated per chunk.
    ///
    /// Chunks are sized to what the transport carries in one request.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let chunk_size = self.axiom.transport().bootloader_chunk_size();
        self.wait_until_not_busy()?;
        for chunk in data.chunks(chunk_size) {
            self.axiom
                .transport_mut()
                .write_page(BLP_FIFO_ADDRESS, chunk)?;
            self.wait_until_not_busy()?;
        }
        Ok(())
    }

    /// Upload a firmware image: the header block first, then the payload.
    #[instrument(level = "info", skip_all, fields(header_len = header.len(), payload_len = payload.len()))]
    pub fn upload(&mut self, header: &[u8], payload: &[u8]) -> Result<()> {
        self.axiom.set_phase(AxiomPhase::Upload);
        let result = self.stream(header, payload);
        self.axiom.track(result)?;
        self.axiom.set_phase(AxiomPhase::Complete);
        self.axiom.emit(AxiomEvent::Complete);
        Ok(())
    }

    fn stream(&mut self, header: &[u8], payload: &[u8]) -> Result<()> {
        let chunk_size = self.axiom.transport().bootloader_chunk_size();
        let total = (header.len() + payload.len()) as u64;

        self.write_chunk(header)?;
        let mut sent = header.len() as u64;
        self.progress(sent, total);

        for block in payload.chunks(chunk_size) {
            self.write_chunk(block)?;
            sent += block.len() as u64;
            self.progress(sent, total);
        }

        info!(bytes = sent, "Firmware upload complete");
        Ok(())
    }

    fn progress(&self, current: u64, total: u64) {
        self.axiom.emit(AxiomEvent::Progress {
            phase: AxiomPhase::Upload,
            operation: "firmware".to_string(),
            current,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{AxiomConfig, test_config};
    use crate::events::NullObserver;
    use crate::events::tests::RecordingObserver;
    use crate::transport::MockTransport;

    fn axiom(mock: &MockTransport, config: AxiomConfig) -> Axiom<MockTransport, NullObserver> {
        let mut axiom = Axiom::with_observer(mock.clone(), config, Arc::new(NullObserver));
        axiom.build_usage_table().unwrap();
        mock.clear_log();
        axiom
    }

    #[test]
    fn test_enter_after_third_sequence() {
        let mock = MockTransport::standard();
        mock.enter_bootloader_after(Some(3));
        let mut axiom = axiom(&mock, test_config());

        let entry = axiom.bootloader().enter().unwrap();
        assert_eq!(entry, BootloaderEntry::Entered { attempts: 3 });
        assert_eq!(mock.entry_sequences(), 3);
        assert!(!axiom.usage_table().is_populated());
    }

    #[test]
    fn test_enter_never_sets_flag() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock, test_config());

        let entry = axiom.bootloader().enter().unwrap();
        assert_eq!(entry, BootloaderEntry::Failed { attempts: 5 });
        assert_eq!(mock.entry_sequences(), 5);
    }

    #[test]
    fn test_enter_already_in_bootloader() {
        let mock = MockTransport::standard();
        let mut axiom = axiom(&mock, test_config());
        mock.set_bootloader_mode(true);

        let entry = axiom.bootloader().enter().unwrap();
        assert_eq!(entry, BootloaderEntry::AlreadyInBootloader);
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_enter_tolerates_flag_read_failure() {
        let mock = MockTransport::standard();
        mock.enter_bootloader_after(Some(2));
        let observer = Arc::new(RecordingObserver::default());
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), observer.clone());
        axiom.build_usage_table().unwrap();

        // pre-entry check succeeds, the one after attempt 1 fails on the bus
        mock.queue_read(0x0000, &mock.peek(0x0000, 12));
        mock.queue_read_failure(0x0000);

        let entry = axiom.bootloader().enter().unwrap();
        assert_eq!(entry, BootloaderEntry::Entered { attempts: 2 });
        let attempts = observer
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, AxiomEvent::BootloaderAttempt { .. }))
            .count();
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_enter_holds_entering_phase_across_attempts() {
        let mock = MockTransport::standard();
        mock.enter_bootloader_after(Some(3));
        let observer = Arc::new(RecordingObserver::default());
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), observer.clone());
        axiom.build_usage_table().unwrap();
        observer.events.lock().unwrap().clear();

        axiom.bootloader().enter().unwrap();

        let phases: Vec<AxiomPhase> = observer
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                AxiomEvent::PhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![AxiomPhase::EnteringBootloader, AxiomPhase::Idle]);
    }

    #[test]
    fn test_upload_failure_leaves_error_phase() {
        let mock = MockTransport::standard();
        mock.set_bootloader_mode(true);
        mock.set_always_busy();
        let config = AxiomConfig {
            busy_retries: 3,
            ..test_config()
        };
        let mut axiom = Axiom::with_observer(mock.clone(), config, Arc::new(NullObserver));

        assert!(axiom.bootloader().upload(&[0x11; 8], &[0x22; 40]).is_err());
        assert_eq!(axiom.phase(), AxiomPhase::Error);
    }

    #[test]
    fn test_busy_timeout_read_count() {
        let mock = MockTransport::standard();
        mock.set_bootloader_mode(true);
        mock.set_always_busy();
        let config = AxiomConfig {
            busy_retries: 25,
            ..test_config()
        };
        let mut axiom = Axiom::with_observer(mock.clone(), config, Arc::new(NullObserver));

        assert!(matches!(
            axiom.bootloader().wait_until_not_busy(),
            Err(AxiomError::BusyTimeout { retries: 25 })
        ));
        assert_eq!(mock.reads_at(BLP_REG_STATUS), 25);
    }

    #[test]
    fn test_busy_clears() {
        let mock = MockTransport::standard();
        mock.set_bootloader_mode(true);
        mock.set_busy_for(3);
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), Arc::new(NullObserver));

        axiom.bootloader().wait_until_not_busy().unwrap();
        assert_eq!(mock.reads_at(BLP_REG_STATUS), 4);
    }

    fn fifo_chunk_sizes(packet: Option<usize>, len: usize) -> Vec<usize> {
        let mock = MockTransport::standard();
        mock.set_bootloader_mode(true);
        mock.set_max_packet_size(packet);
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), Arc::new(NullObserver));

        axiom.bootloader().write_chunk(&vec![0xA5; len]).unwrap();
        mock.writes_to(BLP_FIFO_ADDRESS).iter().map(Vec::len).collect()
    }

    #[test]
    fn test_chunk_sizes_follow_packet_size() {
        assert_eq!(fifo_chunk_sizes(None, 300), vec![255, 45]);
        assert_eq!(fifo_chunk_sizes(Some(64), 130), vec![56, 56, 18]);
        assert_eq!(fifo_chunk_sizes(Some(255), 600), vec![247, 247, 106]);
    }

    #[test]
    fn test_upload_header_then_payload() {
        let mock = MockTransport::standard();
        mock.set_bootloader_mode(true);
        let observer = Arc::new(RecordingObserver::default());
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), observer.clone());

        axiom.bootloader().upload(&[0x11; 8], &[0x22; 40]).unwrap();

        let writes = mock.writes_to(BLP_FIFO_ADDRESS);
        assert_eq!(writes[0], vec![0x11; 8]);
        assert_eq!(writes[1..].concat(), vec![0x22; 40]);
        assert_eq!(axiom.phase(), AxiomPhase::Complete);
        assert!(matches!(
            observer.events.lock().unwrap().last(),
            Some(AxiomEvent::Complete)
        ));
    }

    #[test]
    fn test_reset_leaves_bootloader() {
        let mock = MockTransport::standard();
        mock.set_bootloader_mode(true);
        let mut axiom = Axiom::with_observer(mock.clone(), test_config(), Arc::new(NullObserver));

        axiom.bootloader().reset().unwrap();
        assert!(!mock.in_bootloader_mode());
        assert_eq!(mock.writes_to(BLP_REG_COMMAND), vec![vec![0x02, 0x00]]);
    }
}
