use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use axiom_core::protocol::constants::{TCP_BRIDGE_PORT, USAGE_DEVICE_CAPABILITIES, USAGE_REPORT};
use axiom_core::{
    Axiom, AxiomConfig, AxiomObserver, BootloaderEntry, PageTransport, SystemCommand, TcpTransport,
    UsbBridgeTransport, WriteDisposition,
};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "aXiom touch controller tool", long_about = None)]
struct Args {
    /// Reach the device through a TCP bridge instead of USB
    #[arg(long, value_name = "HOST[:PORT]")]
    tcp: Option<String>,

    /// Driver configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show device information (u31, u32)
    Info,
    /// Dump the usage table
    Usages,
    /// Recompute and show the device CRCs (u33)
    Crc,
    /// Show the self test configuration (u06)
    SelfTest,
    /// Read a usage and print it as hex
    Read {
        /// Usage ID, e.g. u22, 0x22 or 22
        #[arg(value_parser = parse_usage)]
        usage: u8,
        /// Only read the first N bytes
        #[arg(long)]
        length: Option<usize>,
    },
    /// Write hex bytes to a usage and verify them
    Write {
        #[arg(value_parser = parse_usage)]
        usage: u8,
        /// Bytes as hex, whitespace allowed
        hex: Vec<String>,
    },
    /// Put the device into bootloader mode
    Bootloader,
    /// Restart the device (bootloader reset or u02 soft reset)
    Reset,
    /// Enter the bootloader and upload firmware
    Upload {
        /// Header block sent once before the payload
        header: PathBuf,
        /// Firmware payload
        payload: PathBuf,
    },
}

fn parse_usage(s: &str) -> Result<u8, String> {
    let digits = s
        .strip_prefix('u')
        .or_else(|| s.strip_prefix('U'))
        .or_else(|| s.strip_prefix("0x"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid usage '{}': {}", s, e))
}

fn parse_hex(parts: &[String]) -> Result<Vec<u8>> {
    let digits: String = parts.concat().chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() {
        bail!("hex input contains non-ASCII characters");
    }
    if digits.len() % 2 != 0 {
        bail!("hex input has an odd number of digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn print_hex(data: &[u8]) {
    for (row, line) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
        println!("{:04X}: {}", row * 16, bytes.join(" "));
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => AxiomConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AxiomConfig::default(),
    };

    if let Some(target) = &args.tcp {
        let address = if target.contains(':') {
            target.clone()
        } else {
            format!("{}:{}", target, TCP_BRIDGE_PORT)
        };
        let transport = TcpTransport::connect(address.as_str())
            .with_context(|| format!("connecting to {}", address))?;
        let mut axiom = Axiom::open(transport, config)?;
        return finish(&mut axiom, args.command);
    }

    let transport = UsbBridgeTransport::open().context("opening USB bridge")?;
    let mut axiom = Axiom::open(transport, config)?;
    if axiom.transport().supports_proxy() {
        // Leave the bridge streaming reports for other host tools.
        let table = axiom.usage_table();
        if let Ok(address) = table.target_address(USAGE_REPORT, 0) {
            let max_report_len = table.max_report_len().min(u8::MAX as usize) as u8;
            axiom.transport_mut().proxy_on_close(address, max_report_len);
        }
    }
    finish(&mut axiom, args.command)
}

/// Run `command`, then close the link. A close failure is logged so it
/// never hides the command's own error.
fn finish<T: PageTransport, O: AxiomObserver>(axiom: &mut Axiom<T, O>, command: Command) -> Result<()> {
    let result = execute(axiom, command);
    if let Err(e) = axiom.close() {
        warn!(error = %e, "Close failed");
    }
    result
}

fn execute<T: PageTransport, O: AxiomObserver>(axiom: &mut Axiom<T, O>, command: Command) -> Result<()> {
    match command {
        Command::Info => {
            let device = axiom.device_information()?;
            println!("{}", device);
            if !device.bootloader_mode && axiom.usage_table().is_usage_present(USAGE_DEVICE_CAPABILITIES) {
                match axiom.device_capabilities() {
                    Ok(caps) => println!("{}", caps),
                    Err(e) => warn!(error = %e, "Could not decode u32"),
                }
            }
        }
        Command::Usages => {
            if !axiom.usage_table().is_populated() {
                bail!("usage table unavailable, device is in bootloader mode");
            }
            print!("{}", axiom.usage_table());
        }
        Command::Crc => {
            axiom.send_command(SystemCommand::ComputeCrcs)?;
            println!("{}", axiom.crc_data()?);
        }
        Command::SelfTest => println!("{}", axiom.self_test()?),
        Command::Read { usage, length } => {
            let data = if axiom.config().policy.is_command_driven(usage) {
                let mut data = axiom.cdu().read(usage)?;
                if let Some(n) = length {
                    data.truncate(n);
                }
                data
            } else {
                match length {
                    Some(n) => axiom.read_usage_len(usage, n)?,
                    None => axiom.read_usage(usage)?,
                }
            };
            print_hex(&data);
        }
        Command::Write { usage, hex } => {
            let data = parse_hex(&hex)?;
            match axiom.config_write_usage(usage, &data)? {
                WriteDisposition::Ignored => warn!(usage = %format!("u{:02X}", usage), "Read-only usage, nothing written"),
                disposition => info!(usage = %format!("u{:02X}", usage), ?disposition, "Write verified"),
            }
        }
        Command::Bootloader => match axiom.bootloader().enter()? {
            BootloaderEntry::AlreadyInBootloader => info!("Device already in bootloader mode"),
            BootloaderEntry::Entered { attempts } => info!(attempts, "Device in bootloader mode"),
            BootloaderEntry::Failed { attempts } => bail!("device did not enter bootloader after {} attempts", attempts),
        },
        Command::Reset => {
            if axiom.is_in_bootloader_mode()? {
                axiom.bootloader().reset()?;
            } else {
                axiom.send_command(SystemCommand::SoftReset)?;
            }
        }
        Command::Upload { header, payload } => {
            let header = std::fs::read(&header).with_context(|| format!("reading {}", header.display()))?;
            let payload = std::fs::read(&payload).with_context(|| format!("reading {}", payload.display()))?;

            let mut bootloader = axiom.bootloader();
            if let BootloaderEntry::Failed { attempts } = bootloader.enter()? {
                bail!("device did not enter bootloader after {} attempts", attempts);
            }
            bootloader.upload(&header, &payload)?;
            bootloader.reset()?;
        }
    }
    Ok(())
}
