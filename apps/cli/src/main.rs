use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use odin_core::{DeviceOptions, NusbTransport, OdinDevice, PitData, UsbTransport};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Samsung Odin Protocol Tool (Pure Rust)", long_about = None)]
struct Args {
    /// Path to a TOML file with device options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// USB vendor ID of the device, in hex
    #[arg(long, value_parser = parse_hex_u16, requires = "pid", global = true)]
    vid: Option<u16>,

    /// USB product ID of the device, in hex
    #[arg(long, value_parser = parse_hex_u16, requires = "vid", global = true)]
    pid: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices in download mode
    Detect,
    /// Print a partition table, from the device or a local file
    PrintPit {
        /// Decode this PIT file instead of asking the device
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Save the device's partition table
    DownloadPit {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Flash an image to a named partition
    Flash {
        #[arg(short, long)]
        partition: String,
        #[arg(short, long)]
        file: PathBuf,
        /// Reboot once the image is written
        #[arg(long)]
        reboot: bool,
    },
    /// Wipe the user data partition
    EraseUserdata,
    /// Reboot the device into normal mode
    Reboot,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex ID {s:?}: {e}"))
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

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    info!("Starting Odin-rs Tool (nusb backend)...");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let options = match &args.config {
        Some(path) => DeviceOptions::load_from_file(path)?,
        None => DeviceOptions::default(),
    };

    match &args.command {
        Command::Detect => detect(),
        Command::PrintPit { file: Some(path) } => print_pit_file(path, &options),
        Command::PrintPit { file: None } => {
            let mut device = connect(args, options)?;
            device.begin_session(false)?;
            println!("{}", device.get_pit_data()?);
            device.end_session(false, false)?;
            Ok(())
        }
        Command::DownloadPit { output } => {
            let mut device = connect(args, options)?;
            device.begin_session(false)?;
            let bytes = device.get_pit_data()?.to_bytes();
            std::fs::write(output, &bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(path = %output.display(), bytes = bytes.len(), "PIT saved");
            device.end_session(false, false)?;
            Ok(())
        }
        Command::Flash {
            partition,
            file,
            reboot,
        } => {
            let image =
                std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
            let mut device = connect(args, options)?;
            device.flash_partition(partition, &image)?;
            info!(partition = %partition, bytes = image.len(), "Partition flashed");
            if *reboot {
                device.reboot()?;
            }
            Ok(())
        }
        Command::EraseUserdata => {
            let mut device = connect(args, options)?;
            device.begin_session(false)?;
            device.erase_userdata()?;
            device.end_session(false, false)?;
            Ok(())
        }
        Command::Reboot => {
            let mut device = connect(args, options)?;
            device.begin_session(false)?;
            device.reboot()?;
            Ok(())
        }
    }
}

fn detect() -> anyhow::Result<()> {
    let devices = NusbTransport::detect()?;
    if devices.is_empty() {
        bail!("No device in download mode detected");
    }
    for device in &devices {
        println!(
            "{:04X}:{:04X}  {}  {}",
            device.vendor_id(),
            device.product_id(),
            device.device_id(),
            device.product_string().unwrap_or_default()
        );
    }
    Ok(())
}

fn print_pit_file(path: &Path, options: &DeviceOptions) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let pit = PitData::from_bytes(&bytes, options.pit_layout)?;
    println!("{pit}");
    Ok(())
}

fn connect(args: &Args, options: DeviceOptions) -> anyhow::Result<OdinDevice<NusbTransport>> {
    let transport = match (args.vid, args.pid) {
        (Some(vid), Some(pid)) => NusbTransport::find_with_ids(vid, pid)?,
        _ => NusbTransport::find()?,
    };
    let mut device = OdinDevice::new(transport, options);
    device.initialize()?;
    Ok(device)
}
