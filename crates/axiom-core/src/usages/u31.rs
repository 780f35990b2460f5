//! u31 Device Information (page 0).

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::{DecodeError, ensure_len};
use crate::protocol::constants::{U31_PAGE0_LEN, USAGE_DEVICE_INFO};

const FW_VARIANTS: [&str; 3] = ["3D", "2D", "FORCE"];
const FW_STATUS: [&str; 2] = ["eng", "prod"];

/// Decoded u31 page 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInformation {
    pub device_id: u16,
    /// Set while the bootloader runs instead of the firmware.
    pub bootloader_mode: bool,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_patch: u8,
    pub fw_variant: u8,
    pub fw_status: u8,
    pub tcp_rev: u8,
    pub bl_major: u8,
    pub bl_minor: u8,
    pub jedec_id: u16,
    pub num_usages: u8,
    pub silicon_rev: u8,
}

impl DeviceInformation {
    /// Decode u31 page 0. Only revision 1 of this layout exists and it is
    /// readable before the usage table is known.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_revision(1, data)
    }

    pub fn decode_revision(revision: u8, data: &[u8]) -> Result<Self, DecodeError> {
        if revision != 1 {
            return Err(DecodeError::UnsupportedRevision {
                usage: USAGE_DEVICE_INFO,
                revision,
            });
        }
        ensure_len(USAGE_DEVICE_INFO, data, U31_PAGE0_LEN as usize)?;

        let mut cursor = Cursor::new(data);
        let field0 = cursor.read_u16::<LittleEndian>()?;
        let field1 = cursor.read_u16::<LittleEndian>()?;
        let field2 = cursor.read_u16::<LittleEndian>()?;
        let field3 = cursor.read_u16::<LittleEndian>()?;
        let field4 = cursor.read_u16::<LittleEndian>()?;
        let field5 = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            device_id: field0 & 0x7FFF,
            bootloader_mode: field0 & 0x8000 != 0,
            fw_major: (field1 >> 8) as u8,
            fw_minor: field1 as u8,
            fw_variant: (field2 & 0x003F) as u8,
            fw_status: ((field2 & 0x0080) >> 7) as u8,
            tcp_rev: (field2 >> 8) as u8,
            bl_major: (field3 >> 8) as u8,
            bl_minor: field3 as u8,
            jedec_id: field4,
            num_usages: field5 as u8,
            silicon_rev: ((field5 & 0x0F00) >> 8) as u8,
            fw_patch: ((field5 & 0xF000) >> 12) as u8,
        })
    }

    /// Channel count and variant letter, e.g. `AX112A`.
    pub fn device_id_string(&self) -> String {
        let channels = self.device_id & 0x03FF;
        let variant = ((self.device_id & 0x7C00) >> 10) as u8;
        format!("AX{}{}", channels, (b'A' + variant) as char)
    }

    /// Firmware version as the device tooling prints it.
    pub fn firmware_version_string(&self) -> String {
        if self.bootloader_mode {
            return format!("Bootloader {}.{:02}", self.fw_major, self.fw_minor);
        }
        let status = FW_STATUS
            .get(self.fw_status as usize)
            .copied()
            .unwrap_or("?");
        let variant = FW_VARIANTS
            .get(self.fw_variant as usize)
            .copied()
            .unwrap_or("?");
        if self.fw_major >= 4 && self.fw_minor >= 8 {
            format!(
                "{}.{}.{}-{} {}",
                self.fw_major, self.fw_minor, self.fw_patch, status, variant
            )
        } else {
            format!(
                "{}.{:02}-{} (RC{}) {}",
                self.fw_major, self.fw_minor, status, self.fw_patch, variant
            )
        }
    }

    /// `AX112A 4.8.3-prod 3D`
    pub fn short_string(&self) -> String {
        format!(
            "{} {}",
            self.device_id_string(),
            self.firmware_version_string()
        )
    }

    /// Silicon revision letter.
    pub fn silicon_rev_letter(&self) -> char {
        (b'A' + self.silicon_rev) as char
    }
}

impl fmt::Display for DeviceInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "u31 Device Information")?;
        writeln!(f, "  Device ID   : {}", self.device_id_string())?;
        writeln!(f, "  FW Revision : {}", self.firmware_version_string())?;
        writeln!(f, "  BL Revision : {}.{:02}", self.bl_major, self.bl_minor)?;
        writeln!(
            f,
            "  Silicon     : 0x{:04X} (Rev {})",
            self.jedec_id,
            self.silicon_rev_letter()
        )
    }
}
