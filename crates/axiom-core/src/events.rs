//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow driver progress without
//! the core depending on it.

use std::fmt;

use crate::transport::TransportKind;

/// Driver phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxiomPhase {
    #[default]
    Idle,
    /// Reading u31 and the usage table.
    Discovery,
    /// Paged usage read or write.
    UsageTransfer,
    /// u02 command in flight.
    Command,
    /// Command driven usage exchange.
    Cdu,
    /// Magic sequence to reach the bootloader.
    EnteringBootloader,
    /// Streaming firmware into the bootloader FIFO.
    Upload,
    Complete,
    Error,
}

impl fmt::Display for AxiomPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxiomPhase::Idle => write!(f, "Idle"),
            AxiomPhase::Discovery => write!(f, "Discovery"),
            AxiomPhase::UsageTransfer => write!(f, "Usage Transfer"),
            AxiomPhase::Command => write!(f, "Command"),
            AxiomPhase::Cdu => write!(f, "CDU"),
            AxiomPhase::EnteringBootloader => write!(f, "Entering Bootloader"),
            AxiomPhase::Upload => write!(f, "Upload"),
            AxiomPhase::Complete => write!(f, "Complete"),
            AxiomPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by the driver.
#[derive(Debug, Clone)]
pub enum AxiomEvent {
    /// Device reached over a transport.
    DeviceConnected { transport: TransportKind },
    /// Phase changed.
    PhaseChanged { from: AxiomPhase, to: AxiomPhase },
    /// Usage table discovered.
    UsageTableBuilt { num_usages: u8 },
    /// Progress update for current operation.
    Progress {
        phase: AxiomPhase,
        operation: String,
        current: u64,
        total: u64,
    },
    /// One enter-bootloader sequence sent.
    BootloaderAttempt { attempt: u32, max_attempts: u32 },
    /// Device reported a failure code for a command or write.
    CommandFailed { usage: u8, code: u16 },
    /// Operation completed successfully.
    Complete,
}

/// Observer trait for receiving driver events.
pub trait AxiomObserver: Send + Sync {
    fn on_event(&self, event: &AxiomEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl AxiomObserver for NullObserver {
    fn on_event(&self, _event: &AxiomEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl AxiomObserver for TracingObserver {
    fn on_event(&self, event: &AxiomEvent) {
        match event {
            AxiomEvent::DeviceConnected { transport } => {
                tracing::info!(transport = %transport, "Device connected");
            }
            AxiomEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            AxiomEvent::UsageTableBuilt { num_usages } => {
                tracing::info!(num_usages, "Usage table built");
            }
            AxiomEvent::Progress {
                phase,
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(phase = %phase, operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            AxiomEvent::BootloaderAttempt {
                attempt,
                max_attempts,
            } => {
                tracing::info!(attempt, max_attempts, "Enter bootloader sequence sent");
            }
            AxiomEvent::CommandFailed { usage, code } => {
                tracing::error!(usage = %format!("u{:02X}", usage), code = %format!("0x{:04X}", code), "Device reported failure");
            }
            AxiomEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}
