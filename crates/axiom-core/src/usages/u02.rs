//! u02 System Manager.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{DecodeError, ensure_len};
use crate::protocol::constants::{
    BOOTLOADER_ENTRY_MAGIC, FILL_CONFIG_MAGIC, SAVE_CONFIG_MAGIC, USAGE_SYSTEM_MANAGER,
};

/// Bytes of u02 this layout covers: command plus three parameters.
pub const U02_LAYOUT_LEN: usize = 8;

/// System manager commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    HardReset,
    SoftReset,
    Rebaseline,
    Stop,
    Start,
    SaveConfig,
    ComputeCrcs,
    FillConfig,
    EnterBootloader,
    RunSelfTests,
}

impl SystemCommand {
    pub fn code(self) -> u16 {
        match self {
            SystemCommand::HardReset => 1,
            SystemCommand::SoftReset => 2,
            SystemCommand::Rebaseline => 3,
            SystemCommand::Stop => 5,
            SystemCommand::Start => 6,
            SystemCommand::SaveConfig => 7,
            SystemCommand::ComputeCrcs => 9,
            SystemCommand::FillConfig => 10,
            SystemCommand::EnterBootloader => 11,
            SystemCommand::RunSelfTests => 12,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => SystemCommand::HardReset,
            2 => SystemCommand::SoftReset,
            3 => SystemCommand::Rebaseline,
            5 => SystemCommand::Stop,
            6 => SystemCommand::Start,
            7 => SystemCommand::SaveConfig,
            9 => SystemCommand::ComputeCrcs,
            10 => SystemCommand::FillConfig,
            11 => SystemCommand::EnterBootloader,
            12 => SystemCommand::RunSelfTests,
            _ => return None,
        })
    }

    /// Parameter words written alongside the command.
    ///
    /// `EnterBootloader` is a sequence of three writes, one magic word each,
    /// so it carries its parameters separately.
    pub fn parameters(self) -> Option<[u16; 3]> {
        match self {
            SystemCommand::SaveConfig => Some(SAVE_CONFIG_MAGIC),
            SystemCommand::FillConfig => Some(FILL_CONFIG_MAGIC),
            _ => None,
        }
    }

    /// Magic values for each write of the enter-bootloader sequence.
    pub fn entry_sequence() -> [u16; 3] {
        BOOTLOADER_ENTRY_MAGIC
    }

    /// Resets and bootloader entry take the firmware down, so u02 is not polled.
    pub fn skips_verify(self) -> bool {
        matches!(
            self,
            SystemCommand::HardReset | SystemCommand::SoftReset | SystemCommand::EnterBootloader
        )
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemCommand::HardReset => write!(f, "HARD_RESET"),
            SystemCommand::SoftReset => write!(f, "SOFT_RESET"),
            SystemCommand::Rebaseline => write!(f, "REBASELINE"),
            SystemCommand::Stop => write!(f, "STOP"),
            SystemCommand::Start => write!(f, "START"),
            SystemCommand::SaveConfig => write!(f, "SAVE_CONFIG"),
            SystemCommand::ComputeCrcs => write!(f, "COMPUTE_CRCS"),
            SystemCommand::FillConfig => write!(f, "FILL_CONFIG"),
            SystemCommand::EnterBootloader => write!(f, "ENTER_BOOTLOADER"),
            SystemCommand::RunSelfTests => write!(f, "RUN_SELF_TESTS"),
        }
    }
}

/// Register view of u02.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemManagerRegs {
    pub command: u16,
    pub parameters: [u16; 3],
}

mod rev1 {
    use super::*;

    pub(super) fn unpack(data: &[u8]) -> Result<SystemManagerRegs, DecodeError> {
        ensure_len(USAGE_SYSTEM_MANAGER, data, U02_LAYOUT_LEN)?;
        let mut cursor = Cursor::new(data);
        Ok(SystemManagerRegs {
            command: cursor.read_u16::<LittleEndian>()?,
            parameters: [
                cursor.read_u16::<LittleEndian>()?,
                cursor.read_u16::<LittleEndian>()?,
                cursor.read_u16::<LittleEndian>()?,
            ],
        })
    }

    pub(super) fn pack(regs: &SystemManagerRegs, data: &mut [u8]) -> Result<(), DecodeError> {
        ensure_len(USAGE_SYSTEM_MANAGER, data, U02_LAYOUT_LEN)?;
        let mut out = &mut data[..U02_LAYOUT_LEN];
        out.write_u16::<LittleEndian>(regs.command)?;
        for &p in &regs.parameters {
            out.write_u16::<LittleEndian>(p)?;
        }
        Ok(())
    }
}

/// u02 decoded for a specific usage revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemManager {
    Rev1(SystemManagerRegs),
    /// Same layout as revision 1.
    Rev2(SystemManagerRegs),
}

impl SystemManager {
    /// Zeroed registers for `revision`.
    pub fn new(revision: u8) -> Result<Self, DecodeError> {
        Self::with_regs(revision, SystemManagerRegs::default())
    }

    fn with_regs(revision: u8, regs: SystemManagerRegs) -> Result<Self, DecodeError> {
        match revision {
            1 => Ok(SystemManager::Rev1(regs)),
            2 => Ok(SystemManager::Rev2(regs)),
            revision => Err(DecodeError::UnsupportedRevision {
                usage: USAGE_SYSTEM_MANAGER,
                revision,
            }),
        }
    }

    pub fn decode(revision: u8, data: &[u8]) -> Result<Self, DecodeError> {
        let regs = match revision {
            1 | 2 => rev1::unpack(data)?,
            revision => {
                return Err(DecodeError::UnsupportedRevision {
                    usage: USAGE_SYSTEM_MANAGER,
                    revision,
                });
            }
        };
        Self::with_regs(revision, regs)
    }

    /// Pack the registers into `data`, leaving bytes past the layout untouched.
    pub fn encode_into(&self, data: &mut [u8]) -> Result<(), DecodeError> {
        match self {
            SystemManager::Rev1(regs) | SystemManager::Rev2(regs) => rev1::pack(regs, data),
        }
    }

    pub fn revision(&self) -> u8 {
        match self {
            SystemManager::Rev1(_) => 1,
            SystemManager::Rev2(_) => 2,
        }
    }

    pub fn regs(&self) -> &SystemManagerRegs {
        match self {
            SystemManager::Rev1(regs) | SystemManager::Rev2(regs) => regs,
        }
    }

    pub fn regs_mut(&mut self) -> &mut SystemManagerRegs {
        match self {
            SystemManager::Rev1(regs) | SystemManager::Rev2(regs) => regs,
        }
    }
}

impl fmt::Display for SystemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.regs();
        writeln!(f, "u02 System Manager")?;
        writeln!(f, "  Command       : {:04X}", regs.command)?;
        for (i, p) in regs.parameters.iter().enumerate() {
            writeln!(f, "  Parameters[{}] : {:04X}", i, p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(SystemCommand::SaveConfig.code(), 7);
        assert_eq!(SystemCommand::EnterBootloader.code(), 11);
        assert_eq!(SystemCommand::from_code(12), Some(SystemCommand::RunSelfTests));
        assert_eq!(SystemCommand::from_code(4), None);
        assert_eq!(
            SystemCommand::SaveConfig.parameters(),
            Some([0x0000, 0xB10C, 0xC0DE])
        );
    }

    #[test]
    fn test_decode_rev1() {
        let data = [0x07, 0x00, 0x00, 0x00, 0x0C, 0xB1, 0xDE, 0xC0];
        let u02 = SystemManager::decode(1, &data).unwrap();
        assert_eq!(u02.regs().command, 7);
        assert_eq!(u02.regs().parameters, [0x0000, 0xB10C, 0xC0DE]);
    }

    #[test]
    fn test_rev2_shares_layout() {
        let data = [0x0B, 0x00, 0x55, 0x55, 0x00, 0x00, 0x00, 0x00];
        let rev1 = SystemManager::decode(1, &data).unwrap();
        let rev2 = SystemManager::decode(2, &data).unwrap();
        assert_eq!(rev1.regs(), rev2.regs());
        assert_eq!(rev2.revision(), 2);
    }

    #[test]
    fn test_encode_preserves_tail() {
        let mut u02 = SystemManager::new(2).unwrap();
        u02.regs_mut().command = 0x0003;
        u02.regs_mut().parameters[2] = 0xA55A;

        let mut data = vec![0xEE; 10];
        u02.encode_into(&mut data).unwrap();
        assert_eq!(data, vec![0x03, 0x00, 0, 0, 0, 0, 0x5A, 0xA5, 0xEE, 0xEE]);
    }

    #[test]
    fn test_unsupported_revision() {
        let err = SystemManager::new(3).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedRevision {
                usage: 0x02,
                revision: 3
            }
        ));
    }

    #[test]
    fn test_short_buffer() {
        let err = SystemManager::decode(1, &[0; 4]).unwrap_err();
        assert!(matches!(err, DecodeError::BufferTooSmall { expected: 8, .. }));
    }
}
