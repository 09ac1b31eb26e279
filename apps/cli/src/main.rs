use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hublink_core::events::TracingObserver;
use hublink_core::session::{HubCommand, HubSession, SessionConfig};
use hublink_core::storage::SlotFilter;
use hublink_core::transport::{SerialChannel, list_ports};
use hublink_core::utils::format_filesize;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(author, version, about = "Programmable hub tool over serial", long_about = None)]
struct Args {
    /// Serial port of the hub (e.g. /dev/ttyACM0)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate override
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Path to a TOML session config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,
    /// Show hub identity and storage usage
    Info,
    /// List program slots
    Ls {
        /// Include empty slots
        #[arg(short, long)]
        all: bool,
    },
    /// Run the program in a slot
    Run { slot: u32 },
    /// Stop the running program
    Stop,
    /// Move a program to another slot
    Mv { from: u32, to: u32 },
    /// Remove the program in a slot
    Rm { slot: u32 },
    /// Upload a python file into a slot
    Upload {
        file: PathBuf,
        slot: u32,
        /// Program name shown on the hub (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
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
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }

    let command = match args.command {
        Command::Ports => return print_ports(),
        Command::Info => None,
        Command::Ls { all } => return list_slots(connect(&args.port, config)?, all),
        Command::Run { slot } => Some(HubCommand::Run { slot }),
        Command::Stop => Some(HubCommand::Stop),
        Command::Mv { from, to } => Some(HubCommand::Move { from, to }),
        Command::Rm { slot } => Some(HubCommand::Remove { slot }),
        Command::Upload { file, slot, name } => Some(upload_command(&file, slot, name)?),
    };

    let mut session = connect(&args.port, config)?;
    match command {
        Some(command) => {
            debug!(?command, "Executing");
            let result = session.execute(command)?;
            if !result.is_null() {
                println!("{result}");
            }
        }
        None => print_info(&session),
    }
    session.disconnect()?;
    Ok(())
}

fn connect(port: &Option<String>, config: SessionConfig) -> Result<HubSession<SerialChannel>> {
    let Some(port) = port.clone().or_else(|| config.port.clone()) else {
        bail!("No serial port given. Use --port or set `port` in the config file");
    };
    let mut session = HubSession::new(config);
    session.subscribe(Arc::new(TracingObserver));
    session
        .connect(&port)
        .with_context(|| format!("Failed to connect to {port}"))?;
    Ok(session)
}

fn upload_command(file: &Path, slot: u32, name: Option<String>) -> Result<HubCommand> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = match name {
        Some(name) => name,
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .context("Cannot derive a program name from the file path")?,
    };
    Ok(HubCommand::Upload { name, text, slot })
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let label = [port.manufacturer, port.product]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        println!("{:<24} {:<10} {}", port.path, port.kind, label);
    }
    Ok(())
}

fn print_info(session: &HubSession<SerialChannel>) {
    if let Some(info) = session.info() {
        println!("Device:   {}", info.name);
        println!("Firmware: {}", info.firmware_version);
    }
    if let Some(storage) = session.storage() {
        let s = &storage.storage;
        println!(
            "Storage:  {}/{} {} free ({:.1}% used)",
            s.free, s.total, s.unit, s.pct
        );
        println!("Programs: {}", storage.slots.len());
    }
}

fn list_slots(mut session: HubSession<SerialChannel>, all: bool) -> Result<()> {
    let filter = if all { SlotFilter::All } else { SlotFilter::Full };
    if let Some(storage) = session.storage() {
        println!("{:>4}  {:<32} {:>10}", "SLOT", "NAME", "SIZE");
        for (slot, program) in storage.slots_matching(filter) {
            match program {
                Some(program) => println!(
                    "{:>4}  {:<32} {:>10}",
                    slot.index(),
                    program.decoded_name(),
                    format_filesize(u128::from(program.size), 2)
                ),
                None => println!("{:>4}  {:<32} {:>10}", slot.index(), "-", "-"),
            }
        }
    }
    session.disconnect()?;
    Ok(())
}
