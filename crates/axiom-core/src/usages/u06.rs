//! u06 Self Test configuration.
//!
//! Every revision shares the control words and the sense pin block.
//! Revision 3 adds trans and abs signal limits, revision 5 keeps the abs
//! limits, and each revision ends with its own number of per-channel
//! max/min pairs.

use std::fmt;
use std::io::{Cursor, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use super::{DecodeError, ensure_len};
use crate::protocol::constants::USAGE_SELF_TEST;

const TRANS_LIMITS_OFFSET: u64 = 54;
const ABS_LIMITS_OFFSET: u64 = 84;
const CHANNEL_LIMITS_OFFSET: u64 = 100;

#[derive(Debug, Clone, Copy)]
struct Layout {
    trans_limits: bool,
    abs_limits: bool,
    channel_pairs: usize,
}

impl Layout {
    fn for_revision(revision: u8) -> Option<Self> {
        match revision {
            3 => Some(Self { trans_limits: true, abs_limits: true, channel_pairs: 4 }),
            5 => Some(Self { trans_limits: false, abs_limits: true, channel_pairs: 26 }),
            7 => Some(Self { trans_limits: false, abs_limits: false, channel_pairs: 16 }),
            _ => None,
        }
    }

    fn len(&self) -> usize {
        CHANNEL_LIMITS_OFFSET as usize + self.channel_pairs * 4
    }
}

/// Self test 6 limits on the trans (mutual) image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransLimits {
    pub middle_node_max: u16,
    pub middle_node_min: u16,
    pub middle_average_max: u16,
    pub middle_average_min: u16,
    pub middle_peak2peak_max: u16,
    pub edge_node_max: u16,
    pub edge_node_min: u16,
    pub edge_average_max: u16,
    pub edge_average_min: u16,
    pub corner_node_max: u16,
    pub corner_node_min: u16,
}

/// Self test 7 limits on the abs (self) image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsLimits {
    pub rows_chan_max: u16,
    pub rows_chan_min: u16,
    pub rows_average_max: u16,
    pub rows_average_min: u16,
    pub cols_chan_max: u16,
    pub cols_chan_min: u16,
    pub cols_average_max: u16,
    pub cols_average_min: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfTestRegs {
    pub enable_on_boot: bool,
    pub enable_on_heartbeat: bool,
    pub stop_on_first_error: bool,
    pub enable_u83_frames: bool,
    /// Reserved before revision 5.
    pub fast_frames_after_reset: bool,
    pub u83_every_n_frames: u16,
    pub u83_jump: u16,
    pub channels_use_calibration_capacitors: bool,
    /// Reserved before revision 5.
    pub channels_use_thermistor: bool,
    /// Test selection words. Revision 3 holds a test number, later
    /// revisions a bit per test.
    pub run_tests_on_boot: u16,
    pub run_tests_on_heartbeat: u16,
    pub run_tests_on_host_trigger: u16,
    pub sense_pin_mask: [u16; 16],
    pub gross_leakage_limit: u16,
    pub marginal_leakage_limit: u16,
    pub shield_gross_leakage_limit: u16,
    pub shield_marginal_leakage_limit: u16,
    pub trans_limits: Option<TransLimits>,
    pub abs_limits: Option<AbsLimits>,
    /// Self test 8 `(max, min)` per channel: aux channels on revisions 3
    /// and 7, CDS channels on revision 5.
    pub channel_limits: Vec<(u16, u16)>,
}

fn read_u16s<const N: usize>(c: &mut Cursor<&[u8]>) -> Result<[u16; N], DecodeError> {
    let mut out = [0u16; N];
    c.read_u16_into::<LittleEndian>(&mut out)?;
    Ok(out)
}

impl SelfTestRegs {
    fn unpack(layout: Layout, data: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(USAGE_SELF_TEST, data, layout.len())?;

        let mut c = Cursor::new(data);
        let [f0, f1, f2, f3] = read_u16s::<4>(&mut c)?;
        let [on_boot, on_heartbeat, on_host] = read_u16s::<3>(&mut c)?;
        let sense_pin_mask = read_u16s::<16>(&mut c)?;
        let [gross, marginal, shield_gross, shield_marginal] = read_u16s::<4>(&mut c)?;

        let trans_limits = if layout.trans_limits {
            c.seek(SeekFrom::Start(TRANS_LIMITS_OFFSET))?;
            let middle = read_u16s::<5>(&mut c)?;
            let edge = read_u16s::<5>(&mut c)?;
            let corner = read_u16s::<5>(&mut c)?;
            Some(TransLimits {
                middle_node_max: middle[0],
                middle_node_min: middle[1],
                middle_average_max: middle[2],
                middle_average_min: middle[3],
                middle_peak2peak_max: middle[4],
                edge_node_max: edge[0],
                edge_node_min: edge[1],
                edge_average_max: edge[2],
                edge_average_min: edge[3],
                corner_node_max: corner[0],
                corner_node_min: corner[1],
            })
        } else {
            None
        };

        let abs_limits = if layout.abs_limits {
            c.seek(SeekFrom::Start(ABS_LIMITS_OFFSET))?;
            let [rmax, rmin, ravg_max, ravg_min, cmax, cmin, cavg_max, cavg_min] = read_u16s::<8>(&mut c)?;
            Some(AbsLimits {
                rows_chan_max: rmax,
                rows_chan_min: rmin,
                rows_average_max: ravg_max,
                rows_average_min: ravg_min,
                cols_chan_max: cmax,
                cols_chan_min: cmin,
                cols_average_max: cavg_max,
                cols_average_min: cavg_min,
            })
        } else {
            None
        };

        c.seek(SeekFrom::Start(CHANNEL_LIMITS_OFFSET))?;
        let mut channel_limits = Vec::with_capacity(layout.channel_pairs);
        for _ in 0..layout.channel_pairs {
            let [max, min] = read_u16s::<2>(&mut c)?;
            channel_limits.push((max, min));
        }

        Ok(Self {
            enable_on_boot: f0 & 0x0001 != 0,
            enable_on_heartbeat: f0 & 0x0002 != 0,
            stop_on_first_error: f1 & 0x0001 != 0,
            enable_u83_frames: f1 & 0x0002 != 0,
            fast_frames_after_reset: f1 & 0x0004 != 0,
            u83_every_n_frames: (f1 & 0xFFF0) >> 4,
            u83_jump: f2,
            channels_use_calibration_capacitors: f3 & 0x0001 != 0,
            channels_use_thermistor: f3 & 0x0002 != 0,
            run_tests_on_boot: on_boot,
            run_tests_on_heartbeat: on_heartbeat,
            run_tests_on_host_trigger: on_host,
            sense_pin_mask,
            gross_leakage_limit: gross,
            marginal_leakage_limit: marginal,
            shield_gross_leakage_limit: shield_gross,
            shield_marginal_leakage_limit: shield_marginal,
            trans_limits,
            abs_limits,
            channel_limits,
        })
    }
}

/// Decoded u06, one variant per supported revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfTest {
    Rev3(SelfTestRegs),
    Rev5(SelfTestRegs),
    Rev7(SelfTestRegs),
}

impl SelfTest {
    pub fn decode(revision: u8, data: &[u8]) -> Result<Self, DecodeError> {
        let layout = Layout::for_revision(revision).ok_or(DecodeError::UnsupportedRevision {
            usage: USAGE_SELF_TEST,
            revision,
        })?;
        let regs = SelfTestRegs::unpack(layout, data)?;
        Ok(match revision {
            3 => Self::Rev3(regs),
            5 => Self::Rev5(regs),
            _ => Self::Rev7(regs),
        })
    }

    pub fn revision(&self) -> u8 {
        match self {
            Self::Rev3(_) => 3,
            Self::Rev5(_) => 5,
            Self::Rev7(_) => 7,
        }
    }

    pub fn regs(&self) -> &SelfTestRegs {
        match self {
            Self::Rev3(regs) | Self::Rev5(regs) | Self::Rev7(regs) => regs,
        }
    }
}

impl fmt::Display for SelfTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.regs();
        writeln!(f, "u06 Self Test (rev {})", self.revision())?;
        writeln!(f, "  Enable On Boot        : {}", r.enable_on_boot)?;
        writeln!(f, "  Enable On Heartbeat   : {}", r.enable_on_heartbeat)?;
        writeln!(f, "  Stop On First Error   : {}", r.stop_on_first_error)?;
        writeln!(f, "  u83 Every N Frames    : {}", r.u83_every_n_frames)?;
        writeln!(f, "  Run On Boot           : 0x{:04X}", r.run_tests_on_boot)?;
        writeln!(f, "  Run On Heartbeat      : 0x{:04X}", r.run_tests_on_heartbeat)?;
        writeln!(f, "  Run On Host Trigger   : 0x{:04X}", r.run_tests_on_host_trigger)?;
        writeln!(f, "  Leakage Gross/Marginal: {}/{}", r.gross_leakage_limit, r.marginal_leakage_limit)?;
        if let Some(t) = &r.trans_limits {
            writeln!(f, "  Trans Middle Node     : {}..{}", t.middle_node_min, t.middle_node_max)?;
        }
        if let Some(a) = &r.abs_limits {
            writeln!(f, "  Abs Rows Chan         : {}..{}", a.rows_chan_min, a.rows_chan_max)?;
            writeln!(f, "  Abs Cols Chan         : {}..{}", a.cols_chan_min, a.cols_chan_max)?;
        }
        for (i, (max, min)) in r.channel_limits.iter().enumerate() {
            writeln!(f, "  Channel {:<2} Limits     : {}..{}", i, min, max)?;
        }
        Ok(())
    }
}
