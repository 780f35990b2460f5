//! Axiom-Core: host-side driver for aXiom touch controllers.
//!
//! The controller exposes its configuration and runtime state as "usages",
//! numbered blocks laid out over 256-byte pages. This crate discovers the
//! usage layout from the device, moves usage data over any page transport,
//! drives u02 system commands and the command driven (CDU) sub-protocol,
//! and enters the bootloader to stream firmware.
//!
//! # Architecture
//!
//! - **Protocol**: Constants and the 4-byte page header
//! - **Transport**: Page access over I2C, SPI, USB bridge, TCP bridge, mock
//! - **Usage**: Usage table and address translation
//! - **Usages**: Decoders for u02, u06, u31, u32 and u33
//! - **Device**: Paged usage I/O, write monitoring and commands
//! - **CDU / Bootloader**: Sub-protocols borrowed from a device handle
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use axiom_core::{Axiom, AxiomConfig, SystemCommand, TcpTransport};
//!
//! let transport = TcpTransport::connect("192.168.1.20:3825").expect("connect");
//! let mut axiom = Axiom::open(transport, AxiomConfig::default()).expect("open");
//! println!("{}", axiom.usage_table());
//! axiom.send_command(SystemCommand::SaveConfig).expect("save");
//! ```

pub mod bootloader;
pub mod cdu;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod monitor;
pub mod protocol;
pub mod transport;
pub mod usage;
pub mod usages;

// Re-exports for convenience
pub use bootloader::{Bootloader, BootloaderEntry};
pub use cdu::{Cdu, CduErrorKind, CduState, cdu_length};
pub use config::AxiomConfig;
pub use device::{Axiom, WriteDisposition};
pub use error::{AxiomError, Result};
pub use events::{AxiomEvent, AxiomObserver, AxiomPhase, NullObserver, TracingObserver};
pub use transport::{
    I2cTransport, MockTransport, PageTransport, SpiTransport, TcpTransport, TransportError,
    TransportKind, UsbBridgeTransport,
};
pub use usage::{UsagePolicy, UsageTable, UsageTableEntry};
pub use usages::{
    CrcData, DecodeError, DeviceCapabilities, DeviceInformation, SelfTest, SystemCommand, SystemManager,
};
