//! u32 Device Capabilities.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::{DecodeError, ensure_len};
use crate::protocol::constants::USAGE_DEVICE_CAPABILITIES;

/// Bytes covered by revision 1.
pub const U32_LAYOUT_LEN: usize = 24;

const INTERFACE_NAMES: [&str; 10] = [
    "Slave I2C",
    "Slave SPI",
    "Slave LIN",
    "Slave USB",
    "Slave UART",
    "IRQ Notify",
    "External Sync",
    "Master I2C",
    "Master SPI",
    "Master GPIO",
];

/// Decoded u32, revision 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub max_cts_nodes: u16,
    pub num_cts_channels: u8,
    pub num_aux_channels: u8,
    pub num_cts_driven_traces: u8,
    pub num_aux_driven_traces: u8,
    /// Channel counts A through F.
    pub num_channels: [u8; 6],
    pub max_map_length_bytes: u16,
    pub max_baseline_length_bytes: u16,
    pub num_baselines: u8,
    /// Interface support bits; the top nibble is the user GPIO count.
    pub interfaces: u16,
    pub khz_to_jump_thousandths: u32,
}

impl DeviceCapabilities {
    pub fn decode(revision: u8, data: &[u8]) -> Result<Self, DecodeError> {
        if revision != 1 {
            return Err(DecodeError::UnsupportedRevision {
                usage: USAGE_DEVICE_CAPABILITIES,
                revision,
            });
        }
        ensure_len(USAGE_DEVICE_CAPABILITIES, data, U32_LAYOUT_LEN)?;

        let mut c = Cursor::new(data);
        let max_cts_nodes = c.read_u16::<LittleEndian>()?;
        let num_cts_channels = c.read_u8()?;
        let num_aux_channels = c.read_u8()?;
        let num_cts_driven_traces = c.read_u8()?;
        let num_aux_driven_traces = c.read_u8()?;
        let mut num_channels = [0u8; 6];
        c.read_exact(&mut num_channels)?;
        let max_map_length_bytes = c.read_u16::<LittleEndian>()?;
        let max_baseline_length_bytes = c.read_u16::<LittleEndian>()?;
        let num_baselines = c.read_u8()?;
        let _reserved = c.read_u8()?;
        let interfaces = c.read_u16::<LittleEndian>()?;
        let khz_to_jump_thousandths = c.read_u32::<LittleEndian>()?;

        Ok(Self {
            max_cts_nodes,
            num_cts_channels,
            num_aux_channels,
            num_cts_driven_traces,
            num_aux_driven_traces,
            num_channels,
            max_map_length_bytes,
            max_baseline_length_bytes,
            num_baselines,
            interfaces,
            khz_to_jump_thousandths,
        })
    }

    /// Whether interface bit `bit` (0 = slave I2C .. 9 = master GPIO) is set.
    pub fn supports(&self, bit: u8) -> bool {
        bit < 12 && self.interfaces & (1 << bit) != 0
    }

    pub fn num_user_gpios(&self) -> u8 {
        ((self.interfaces & 0xF000) >> 12) as u8
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "u32 Device Capabilities")?;
        writeln!(f, "  Max CTS Nodes         : {}", self.max_cts_nodes)?;
        writeln!(f, "  Num CTS Channels      : {}", self.num_cts_channels)?;
        writeln!(f, "  Num AUX Channels      : {}", self.num_aux_channels)?;
        writeln!(f, "  Num CTS Driven Traces : {}", self.num_cts_driven_traces)?;
        writeln!(f, "  Num AUX Driven Traces : {}", self.num_aux_driven_traces)?;
        for (i, n) in self.num_channels.iter().enumerate() {
            writeln!(f, "  Num {} Channels        : {}", (b'A' + i as u8) as char, n)?;
        }
        writeln!(f, "  Max Map Length        : {} bytes", self.max_map_length_bytes)?;
        writeln!(f, "  Max Baseline Length   : {} bytes", self.max_baseline_length_bytes)?;
        writeln!(f, "  Num Baselines         : {}", self.num_baselines)?;
        for (bit, name) in INTERFACE_NAMES.iter().enumerate() {
            let support = if self.supports(bit as u8) { "" } else { "Not " };
            writeln!(f, "  {:<22}: {}Supported", name, support)?;
        }
        writeln!(f, "  Num User GPIOs        : {}", self.num_user_gpios())?;
        writeln!(f, "  KHz to Jump           : {} (thousands)", self.khz_to_jump_thousandths)
    }
}
