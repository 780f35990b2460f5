//! Command driven usages (CDU).
//!
//! Some usages are larger than their page window. Their contents are moved
//! through a small command buffer: QUERY reports the total length, FETCH and
//! STORE move 48-byte slices at a 16-bit offset, COMMIT makes stored data
//! permanent. The status word at offset 0 reads zero once a command is done.

use std::fmt;

use tracing::{debug, info, instrument};

use crate::config::dwell;
use crate::device::Axiom;
use crate::error::{AxiomError, Result};
use crate::events::{AxiomEvent, AxiomObserver, AxiomPhase};
use crate::protocol::constants::*;
use crate::transport::PageTransport;

/// Where a CDU exchange currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CduState {
    #[default]
    Idle,
    Query,
    Fetching,
    Storing,
    Committing,
    Done,
}

impl fmt::Display for CduState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CduState::Idle => write!(f, "IDLE"),
            CduState::Query => write!(f, "QUERY"),
            CduState::Fetching => write!(f, "FETCHING"),
            CduState::Storing => write!(f, "STORING"),
            CduState::Committing => write!(f, "COMMITTING"),
            CduState::Done => write!(f, "DONE"),
        }
    }
}

/// Which leg of the exchange the device rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CduErrorKind {
    Fetch,
    Store,
    Commit,
}

impl fmt::Display for CduErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CduErrorKind::Fetch => write!(f, "fetch"),
            CduErrorKind::Store => write!(f, "store"),
            CduErrorKind::Commit => write!(f, "commit"),
        }
    }
}

/// Total data length from the QUERY response parameters.
///
/// u93 reports its size as `param1 * param2`; every other usage uses
/// `param0 * param1`.
pub fn cdu_length(usage: u8, params: [u16; 3]) -> usize {
    let [p0, p1, p2] = params.map(usize::from);
    if usage == USAGE_AE_PROFILE {
        p1 * p2
    } else {
        p0 * p1
    }
}

/// CDU access borrowed from an [`Axiom`].
pub struct Cdu<'a, T: PageTransport, O: AxiomObserver> {
    axiom: &'a mut Axiom<T, O>,
    state: CduState,
}

impl<'a, T: PageTransport, O: AxiomObserver> Cdu<'a, T, O> {
    pub(crate) fn new(axiom: &'a mut Axiom<T, O>) -> Self {
        Self {
            axiom,
            state: CduState::Idle,
        }
    }

    pub fn state(&self) -> CduState {
        self.state
    }

    fn goto_state(&mut self, state: CduState) {
        debug!(from = %self.state, to = %state, "CDU state");
        self.state = state;
    }

    /// Zeroed command buffer of the usage's length with `command` set.
    fn command_buffer(&self, usage: u8, command: u16) -> Result<Vec<u8>> {
        let length = self.axiom.usage_table().length(usage)?;
        let needed = CDU_PAYLOAD_OFFSET + CDU_XFER_SIZE;
        if length < needed {
            return Err(AxiomError::InvalidLength {
                usage,
                expected: needed,
                actual: length,
            });
        }
        let mut buffer = vec![0u8; length];
        buffer[..2].copy_from_slice(&command.to_le_bytes());
        Ok(buffer)
    }

    /// Read the command buffer until its status word clears.
    fn poll(&mut self, usage: u8, kind: CduErrorKind) -> Result<Vec<u8>> {
        let retries = self.axiom.config().cdu_poll_retries;
        let interval = self.axiom.config().cdu_poll_interval_ms;
        for _ in 0..retries {
            let response = self.axiom.read_usage(usage)?;
            let status = u16::from_le_bytes([response[0], response[1]]);
            if status == 0 {
                return Ok(response);
            }
            if status & CDU_ERROR_MASK != 0 {
                return Err(AxiomError::Cdu {
                    usage,
                    kind,
                    status,
                });
            }
            dwell(interval);
        }
        Err(AxiomError::CduTimeout {
            usage,
            state: self.state,
            retries,
        })
    }

    fn transfer_offset(length: usize, offset: usize) -> Result<[u8; 2]> {
        u16::try_from(offset)
            .map(u16::to_le_bytes)
            .map_err(|_| AxiomError::CduOffsetOverflow { length })
    }

    fn progress(&self, operation: &str, current: usize, total: usize) {
        self.axiom.emit(AxiomEvent::Progress {
            phase: AxiomPhase::Cdu,
            operation: operation.to_string(),
            current: current as u64,
            total: total as u64,
        });
    }

    /// Ask the device how many bytes the usage holds.
    pub fn query_length(&mut self, usage: u8) -> Result<usize> {
        self.goto_state(CduState::Query);
        let buffer = self.command_buffer(usage, CDU_CMD_QUERY)?;
        self.axiom.write_usage(usage, &buffer)?;
        let response = self.poll(usage, CduErrorKind::Fetch)?;

        let params = [
            u16::from_le_bytes([response[2], response[3]]),
            u16::from_le_bytes([response[4], response[5]]),
            u16::from_le_bytes([response[6], response[7]]),
        ];
        let length = cdu_length(usage, params);
        debug!(?params, length, "CDU query");
        Ok(length)
    }

    /// Fetch the full contents of a command driven usage.
    #[instrument(level = "info", skip_all, fields(usage = %format!("u{:02X}", usage)))]
    pub fn read(&mut self, usage: u8) -> Result<Vec<u8>> {
        self.axiom.set_phase(AxiomPhase::Cdu);
        let result = self.fetch_all(usage);
        let data = self.axiom.track(result)?;
        self.axiom.set_phase(AxiomPhase::Idle);
        info!(len = data.len(), "CDU read complete");
        Ok(data)
    }

    fn fetch_all(&mut self, usage: u8) -> Result<Vec<u8>> {
        let length = self.query_length(usage)?;
        if let Some(last) = length.checked_sub(1) {
            Self::transfer_offset(length, last - last % CDU_XFER_SIZE)?;
        }

        self.goto_state(CduState::Fetching);
        let mut data = Vec::with_capacity(length);
        let mut offset = 0;
        while offset < length {
            let mut buffer = self.command_buffer(usage, CDU_CMD_FETCH)?;
            buffer[CDU_OFFSET_FIELD..CDU_OFFSET_FIELD + 2]
                .copy_from_slice(&Self::transfer_offset(length, offset)?);
            self.axiom.write_usage(usage, &buffer)?;
            let response = self.poll(usage, CduErrorKind::Fetch)?;

            let take = CDU_XFER_SIZE.min(length - offset);
            data.extend_from_slice(&response[CDU_PAYLOAD_OFFSET..CDU_PAYLOAD_OFFSET + take]);
            offset += take;
            self.progress("fetch", offset, length);
        }

        self.goto_state(CduState::Done);
        Ok(data)
    }

    /// Store `data` into a command driven usage and commit it.
    #[instrument(level = "info", skip_all, fields(usage = %format!("u{:02X}", usage), len = data.len()))]
    pub fn write(&mut self, usage: u8, data: &[u8]) -> Result<()> {
        let length = data.len();
        if let Some(last) = length.checked_sub(1) {
            Self::transfer_offset(length, last - last % CDU_XFER_SIZE)?;
        }
        self.axiom.set_phase(AxiomPhase::Cdu);
        let result = self.store_all(usage, data);
        self.axiom.track(result)?;
        self.axiom.set_phase(AxiomPhase::Idle);
        info!("CDU write committed");
        Ok(())
    }

    fn store_all(&mut self, usage: u8, data: &[u8]) -> Result<()> {
        let length = data.len();
        self.goto_state(CduState::Storing);
        for (index, chunk) in data.chunks(CDU_XFER_SIZE).enumerate() {
            let offset = index * CDU_XFER_SIZE;
            let mut buffer = self.command_buffer(usage, CDU_CMD_STORE)?;
            buffer[CDU_OFFSET_FIELD..CDU_OFFSET_FIELD + 2]
                .copy_from_slice(&Self::transfer_offset(length, offset)?);
            buffer[CDU_PAYLOAD_OFFSET..CDU_PAYLOAD_OFFSET + chunk.len()].copy_from_slice(chunk);
            self.axiom.write_usage(usage, &buffer)?;
            self.poll(usage, CduErrorKind::Store)?;
            self.progress("store", offset + chunk.len(), length);
        }

        self.goto_state(CduState::Committing);
        let mut buffer = self.command_buffer(usage, CDU_CMD_COMMIT)?;
        buffer[2..6].copy_from_slice(&CDU_COMMIT_MAGIC);
        self.axiom.write_usage(usage, &buffer)?;
        dwell(self.axiom.config().cdu_commit_dwell_ms);
        self.poll(usage, CduErrorKind::Commit)?;

        self.goto_state(CduState::Done);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{AxiomConfig, test_config};
    use crate::events::NullObserver;
    use crate::transport::MockTransport;

    fn axiom(mock: &MockTransport, config: AxiomConfig) -> Axiom<MockTransport, NullObserver> {
        let mut axiom = Axiom::with_observer(mock.clone(), config, Arc::new(NullObserver));
        axiom.build_usage_table().unwrap();
        mock.clear_log();
        axiom
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ 0x5A).collect()
    }

    fn round_trip(len: usize) {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [len as u16, 1, 0]);
        let mut axiom = axiom(&mock, test_config());
        let data = pattern(len);

        let mut cdu = axiom.cdu();
        cdu.write(0x22, &data).unwrap();
        assert_eq!(cdu.state(), CduState::Done);
        assert_eq!(cdu.read(0x22).unwrap(), data);
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in [0, 47, 48, 49, 500] {
            round_trip(len);
        }
    }

    #[test]
    fn test_store_chunking_and_commit() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [100, 1, 0]);
        let mut axiom = axiom(&mock, test_config());
        axiom.cdu().write(0x22, &pattern(100)).unwrap();

        let writes = mock.writes_to(0x0300);
        assert_eq!(writes.len(), 4);
        let offsets: Vec<u16> = writes[..3]
            .iter()
            .map(|w| u16::from_le_bytes([w[4], w[5]]))
            .collect();
        assert_eq!(offsets, vec![0, 48, 96]);
        assert!(writes[..3].iter().all(|w| w[0] == CDU_CMD_STORE as u8));
        assert_eq!(writes[3][0], CDU_CMD_COMMIT as u8);
        assert_eq!(writes[3][2..6], CDU_COMMIT_MAGIC);
        // last chunk is zero padded
        assert!(writes[2][8 + 4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_query_length_quirk() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [9, 10, 5]);
        mock.add_cdu(0x93, [9, 10, 5]);
        let mut axiom = axiom(&mock, test_config());

        assert_eq!(axiom.cdu().query_length(0x22).unwrap(), 90);
        assert_eq!(axiom.cdu().query_length(0x93).unwrap(), 50);
    }

    #[test]
    fn test_cdu_length() {
        assert_eq!(cdu_length(0x22, [4, 12, 7]), 48);
        assert_eq!(cdu_length(0x93, [4, 12, 7]), 84);
    }

    #[test]
    fn test_busy_polls_within_budget() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [60, 1, 0]);
        mock.set_cdu_busy_polls(0x22, 3);
        mock.set_cdu_data(0x22, &pattern(60));
        let mut axiom = axiom(&mock, test_config());

        assert_eq!(axiom.cdu().read(0x22).unwrap(), pattern(60));
    }

    #[test]
    fn test_busy_beyond_budget_times_out() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [60, 1, 0]);
        mock.set_cdu_busy_polls(0x22, 10);
        let config = AxiomConfig {
            cdu_poll_retries: 5,
            ..test_config()
        };
        let mut axiom = axiom(&mock, config);

        assert!(matches!(
            axiom.cdu().read(0x22),
            Err(AxiomError::CduTimeout {
                usage: 0x22,
                state: CduState::Query,
                retries: 5
            })
        ));
        assert_eq!(mock.reads_at(0x0300), 5);
    }

    #[test]
    fn test_error_status_on_store() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [60, 1, 0]);
        mock.set_cdu_error(0x22, Some(0x8002));
        let mut axiom = axiom(&mock, test_config());

        assert!(matches!(
            axiom.cdu().write(0x22, &pattern(10)),
            Err(AxiomError::Cdu {
                usage: 0x22,
                kind: CduErrorKind::Store,
                status: 0x8002
            })
        ));
    }

    #[test]
    fn test_error_status_on_commit() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [60, 1, 0]);
        mock.set_cdu_error(0x22, Some(0x8010));
        let mut axiom = axiom(&mock, test_config());

        // no payload, so COMMIT is the first command the device sees
        assert!(matches!(
            axiom.cdu().write(0x22, &[]),
            Err(AxiomError::Cdu {
                usage: 0x22,
                kind: CduErrorKind::Commit,
                status: 0x8010
            })
        ));
        let writes = mock.writes_to(0x0300);
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0][..2], &CDU_CMD_COMMIT.to_le_bytes());
        assert_eq!(axiom.phase(), AxiomPhase::Error);
    }

    #[test]
    fn test_store_error_leaves_error_phase() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [60, 1, 0]);
        mock.set_cdu_error(0x22, Some(0x8002));
        let mut axiom = axiom(&mock, test_config());

        assert!(axiom.cdu().write(0x22, &pattern(10)).is_err());
        assert_eq!(axiom.phase(), AxiomPhase::Error);

        mock.set_cdu_error(0x22, None);
        axiom.cdu().write(0x22, &pattern(10)).unwrap();
        assert_eq!(axiom.phase(), AxiomPhase::Idle);
    }

    #[test]
    fn test_oversized_query_length_rejected_before_fetch() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [0xFFFF, 0xFFFF, 0]);
        let mut axiom = axiom(&mock, test_config());

        assert!(matches!(
            axiom.cdu().read(0x22),
            Err(AxiomError::CduOffsetOverflow { length: 4_294_836_225 })
        ));
        let writes = mock.writes_to(0x0300);
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0][..2], &CDU_CMD_QUERY.to_le_bytes());
        assert_eq!(axiom.phase(), AxiomPhase::Error);
    }

    #[test]
    fn test_largest_addressable_query_length_accepted() {
        let mock = MockTransport::standard();
        // 64 KiB: the last slice starts at 0xFFF0
        mock.add_cdu(0x22, [256, 256, 0]);
        let mut axiom = axiom(&mock, test_config());

        let data = axiom.cdu().read(0x22).unwrap();
        assert_eq!(data.len(), 0x10000);
        let last = mock.writes_to(0x0300).pop().unwrap();
        assert_eq!(&last[CDU_OFFSET_FIELD..CDU_OFFSET_FIELD + 2], &0xFFF0u16.to_le_bytes());
    }

    #[test]
    fn test_error_status_on_query_is_fetch() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [60, 1, 0]);
        mock.set_cdu_error(0x22, Some(0x8004));
        let mut axiom = axiom(&mock, test_config());

        assert!(matches!(
            axiom.cdu().read(0x22),
            Err(AxiomError::Cdu {
                kind: CduErrorKind::Fetch,
                ..
            })
        ));
    }

    #[test]
    fn test_offset_overflow() {
        let mock = MockTransport::standard();
        mock.add_cdu(0x22, [0, 0, 0]);
        let mut axiom = axiom(&mock, test_config());
        let data = vec![0u8; 0x10000 + CDU_XFER_SIZE];

        assert!(matches!(
            axiom.cdu().write(0x22, &data),
            Err(AxiomError::CduOffsetOverflow { .. })
        ));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CduState::Committing.to_string(), "COMMITTING");
        assert_eq!(CduErrorKind::Store.to_string(), "store");
    }
}
