//! u33 CRC Data.
//!
//! Read-only CRCs of the firmware image, the configuration and individual
//! usages. Revisions differ only in which usage CRCs they carry, so all of
//! them unpack through one routine driven by a per-revision [`Layout`].

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::{DecodeError, ensure_len};
use crate::protocol::constants::USAGE_CRC_DATA;

/// Usages whose CRC is compared only when the device has them.
const OPTIONAL_USAGES: [u8; 4] = [0x22, 0x43, 0x93, 0x94];

const USAGE_DOD_CALIBRATION: u8 = 0x77;

/// Fields each revision adds to the common set.
#[derive(Debug, Clone, Copy)]
struct Layout {
    u05_comments: bool,
    u77_dod_calibration: bool,
}

impl Layout {
    fn for_revision(revision: u8) -> Option<Self> {
        match revision {
            1 => Some(Self {
                u05_comments: true,
                u77_dod_calibration: false,
            }),
            2 => Some(Self {
                u05_comments: false,
                u77_dod_calibration: false,
            }),
            3 => Some(Self {
                u05_comments: false,
                u77_dod_calibration: true,
            }),
            _ => None,
        }
    }

    fn len(&self) -> usize {
        let words = 10 + self.u05_comments as usize + self.u77_dod_calibration as usize;
        words * 4
    }
}

/// CRC registers shared by every revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrcDataRegs {
    pub runtime_crc: u32,
    pub runtime_nvm_crc: u32,
    pub bootloader_crc: u32,
    pub nvltl_usage_config_crc: u32,
    pub vltl_usage_config_crc: u32,
    /// Revision 1 only.
    pub u05_comments_crc: Option<u32>,
    pub u22_crc: u32,
    pub u43_crc: u32,
    /// Revision 3 onwards.
    pub u77_dod_calibration_crc: Option<u32>,
    pub u93_crc: u32,
    pub u94_crc: u32,
    pub runtime_hash: u32,
}

impl CrcDataRegs {
    fn unpack(layout: Layout, data: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(USAGE_CRC_DATA, data, layout.len())?;

        let mut c = Cursor::new(data);
        let mut regs = Self {
            runtime_crc: c.read_u32::<LittleEndian>()?,
            runtime_nvm_crc: c.read_u32::<LittleEndian>()?,
            bootloader_crc: c.read_u32::<LittleEndian>()?,
            nvltl_usage_config_crc: c.read_u32::<LittleEndian>()?,
            vltl_usage_config_crc: c.read_u32::<LittleEndian>()?,
            ..Self::default()
        };
        if layout.u05_comments {
            regs.u05_comments_crc = Some(c.read_u32::<LittleEndian>()?);
        }
        regs.u22_crc = c.read_u32::<LittleEndian>()?;
        regs.u43_crc = c.read_u32::<LittleEndian>()?;
        if layout.u77_dod_calibration {
            regs.u77_dod_calibration_crc = Some(c.read_u32::<LittleEndian>()?);
        }
        regs.u93_crc = c.read_u32::<LittleEndian>()?;
        regs.u94_crc = c.read_u32::<LittleEndian>()?;
        regs.runtime_hash = c.read_u32::<LittleEndian>()?;
        Ok(regs)
    }

    fn usage_crc(&self, usage: u8) -> Option<u32> {
        match usage {
            0x22 => Some(self.u22_crc),
            0x43 => Some(self.u43_crc),
            0x93 => Some(self.u93_crc),
            0x94 => Some(self.u94_crc),
            USAGE_DOD_CALIBRATION => self.u77_dod_calibration_crc,
            _ => None,
        }
    }
}

/// Decoded u33, one variant per supported revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrcData {
    Rev1(CrcDataRegs),
    Rev2(CrcDataRegs),
    Rev3(CrcDataRegs),
}

impl CrcData {
    pub fn decode(revision: u8, data: &[u8]) -> Result<Self, DecodeError> {
        let layout = Layout::for_revision(revision).ok_or(DecodeError::UnsupportedRevision {
            usage: USAGE_CRC_DATA,
            revision,
        })?;
        let regs = CrcDataRegs::unpack(layout, data)?;
        Ok(match revision {
            1 => Self::Rev1(regs),
            2 => Self::Rev2(regs),
            _ => Self::Rev3(regs),
        })
    }

    pub fn revision(&self) -> u8 {
        match self {
            Self::Rev1(_) => 1,
            Self::Rev2(_) => 2,
            Self::Rev3(_) => 3,
        }
    }

    pub fn regs(&self) -> &CrcDataRegs {
        match self {
            Self::Rev1(regs) | Self::Rev2(regs) | Self::Rev3(regs) => regs,
        }
    }

    /// Names of the CRCs that differ from `other`.
    ///
    /// Both configuration CRCs always count. Usage CRCs count only where
    /// `present` reports the usage on the device. The u77 CRC is skipped
    /// when either side predates revision 3. Firmware CRCs and the runtime
    /// hash are informational and never count.
    pub fn mismatches(&self, other: &CrcData, present: impl Fn(u8) -> bool) -> Vec<String> {
        let (a, b) = (self.regs(), other.regs());
        let mut out = Vec::new();
        if a.nvltl_usage_config_crc != b.nvltl_usage_config_crc {
            out.push("NVLTL usage config".to_string());
        }
        if a.vltl_usage_config_crc != b.vltl_usage_config_crc {
            out.push("VLTL usage config".to_string());
        }
        for usage in OPTIONAL_USAGES.into_iter().chain([USAGE_DOD_CALIBRATION]) {
            if !present(usage) {
                continue;
            }
            if let (Some(x), Some(y)) = (a.usage_crc(usage), b.usage_crc(usage))
                && x != y
            {
                out.push(format!("u{:02X}", usage));
            }
        }
        out
    }

    /// Whether the configuration described by `other` matches this one.
    pub fn compare(&self, other: &CrcData, present: impl Fn(u8) -> bool) -> bool {
        self.mismatches(other, present).is_empty()
    }
}

impl fmt::Display for CrcData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.regs();
        writeln!(f, "u33 CRC Data (rev {})", self.revision())?;
        writeln!(f, "  Runtime CRC           : 0x{:08X}", r.runtime_crc)?;
        writeln!(f, "  Runtime NVM CRC       : 0x{:08X}", r.runtime_nvm_crc)?;
        writeln!(f, "  Bootloader CRC        : 0x{:08X}", r.bootloader_crc)?;
        writeln!(f, "  NVLTL Usage Config CRC: 0x{:08X}", r.nvltl_usage_config_crc)?;
        writeln!(f, "  VLTL Usage Config CRC : 0x{:08X}", r.vltl_usage_config_crc)?;
        if let Some(crc) = r.u05_comments_crc {
            writeln!(f, "  u05 Comments CRC      : 0x{:08X}", crc)?;
        }
        writeln!(f, "  u22 CRC               : 0x{:08X}", r.u22_crc)?;
        writeln!(f, "  u43 CRC               : 0x{:08X}", r.u43_crc)?;
        if let Some(crc) = r.u77_dod_calibration_crc {
            writeln!(f, "  u77 DOD Cal CRC       : 0x{:08X}", crc)?;
        }
        writeln!(f, "  u93 CRC               : 0x{:08X}", r.u93_crc)?;
        writeln!(f, "  u94 CRC               : 0x{:08X}", r.u94_crc)?;
        writeln!(f, "  Runtime Hash          : 0x{:08X}", r.runtime_hash)
    }
}
