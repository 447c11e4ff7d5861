use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use distox_lib::bootloader::{Page, firmware_pages};
use distox_lib::calib::CalibrationCoefficients;
use distox_lib::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_DEVICE, FIRMWARE_END_PAGE, PAGE_SIZE, PROTECTED_PAGES,
};
use distox_lib::{DeviceConfig, DistoX, DownloadCount, DownloadEvent, Model, SerialConnector};

/// Talk to a DistoX over its serial (RFCOMM) port.
#[derive(Parser, Debug)]
#[command(name = "distox", author, version, about, long_about = None)]
struct Cli {
    /// Serial device of the DistoX
    #[arg(short, long, env = "DISTOX_DEVICE", default_value = DEFAULT_DEVICE)]
    device: PathBuf,
    /// Line speed for wired serial adapters
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// Device model: a3 or x310
    #[arg(short, long, default_value = "x310")]
    model: Model,
    /// Per-read timeout in milliseconds
    #[arg(short, long, default_value_t = 2000)]
    timeout_ms: u64,
    /// Override the mode register address (hex accepted)
    #[arg(long, value_parser = parse_u16)]
    status_address: Option<u16>,
    /// Print results as JSON
    #[arg(long)]
    json: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
    Toggle,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Download measurements (or calibration samples) from the device
    Download {
        /// Number of frames to read; default reads until the device is quiet
        #[arg(short, long, conflicts_with = "ask")]
        count: Option<usize>,
        /// Ask the device how many frames it holds
        #[arg(long)]
        ask: bool,
        /// Print calibration samples instead of measurements
        #[arg(long)]
        calibration: bool,
    },
    /// Show the mode register
    Mode,
    /// Switch calibration mode
    CalibMode { state: Switch },
    /// Switch silent mode
    Silent { state: Switch },
    /// Print the calibration coefficients
    ReadCoeffs {
        /// Also save the raw coefficient bytes
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload calibration coefficients from a raw or .json file
    WriteCoeffs { file: PathBuf },
    /// Hex dump of device memory
    Memory {
        #[arg(value_parser = parse_u16)]
        start: u16,
        #[arg(default_value_t = 4)]
        len: usize,
    },
    /// Show the internal queue pointers and pending frame count
    HeadTail,
    /// Read one bootloader page
    BootloaderRead {
        #[arg(value_parser = parse_u8)]
        page: u8,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write one bootloader page from a file of up to 256 bytes
    BootloaderWrite {
        #[arg(value_parser = parse_u8)]
        page: u8,
        file: PathBuf,
        /// Allow writing the bootloader's own pages
        #[arg(long)]
        force: bool,
    },
    /// Save the firmware area (or all of flash) to a file
    FirmwareRead {
        output: PathBuf,
        /// First page past the dump
        #[arg(long, default_value_t = FIRMWARE_END_PAGE, conflicts_with = "all")]
        end_page: usize,
        /// Dump every page
        #[arg(long)]
        all: bool,
    },
    /// Load a firmware image; the bootloader pages are never written
    FirmwareWrite {
        file: PathBuf,
        /// Only show which pages would be written
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_u16(s)?;
    u8::try_from(value).map_err(|_| format!("page {value:#x} is out of range"))
}

fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path)
            .with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // usage and argument errors are not failures of the tool
            let _ = e.print();
            process::exit(0);
        }
    };
    let guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    let mut config = DeviceConfig::new(&cli.device)
        .with_model(cli.model)
        .with_baud_rate(cli.baud)
        .with_read_timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(address) = cli.status_address {
        config = config.with_status_address(address);
    }
    let mut distox = DistoX::from_config(config);

    if let Err(e) = run(&mut distox, cli.command, cli.json).await {
        error!("{:#}", e);
        drop(guard);
        process::exit(1);
    }
    Ok(())
}

async fn run(distox: &mut DistoX<SerialConnector>, command: Cmd, json: bool) -> Result<()> {
    match command {
        Cmd::Download { count, ask, calibration } => {
            let count = match (count, ask) {
                (Some(n), _) => DownloadCount::Exact(n),
                (None, true) => DownloadCount::AskDevice,
                (None, false) => DownloadCount::Unbounded,
            };
            distox.set_listener(|event: DownloadEvent| tracing::debug!("{:?}", event));
            let frames = distox.download(count).await.context("Download failed")?;
            info!("Received {} frames", frames);
            if calibration {
                while let Some(sample) = distox.next_calibration() {
                    print_item(&sample, json)?;
                }
            } else {
                while let Some(measurement) = distox.next_measurement() {
                    print_item(&measurement, json)?;
                }
            }
            distox.close();
        }
        Cmd::Mode => {
            let mode = distox.read_mode().await.context("Failed to read mode")?;
            print_item(&mode, json)?;
        }
        Cmd::CalibMode { state } => {
            let mode = match state {
                Switch::On => distox.set_calibration(true).await,
                Switch::Off => distox.set_calibration(false).await,
                Switch::Toggle => distox.toggle_calibration().await,
            }
            .context("Failed to switch calibration mode")?;
            print_item(&mode, json)?;
        }
        Cmd::Silent { state } => {
            let mode = match state {
                Switch::On => distox.set_silent(true).await,
                Switch::Off => distox.set_silent(false).await,
                Switch::Toggle => bail!("silent mode can only be switched on or off"),
            }
            .context("Failed to switch silent mode")?;
            print_item(&mode, json)?;
        }
        Cmd::ReadCoeffs { output } => {
            let coeff = distox.read_coefficients().await.context("Failed to read coefficients")?;
            if let Some(path) = output {
                let bytes = coeff.to_bytes();
                std::fs::write(&path, &bytes[..distox.model().coefficient_len()])
                    .with_context(|| format!("Failed to write {:?}", path))?;
            }
            print_item(&coeff, json)?;
        }
        Cmd::WriteCoeffs { file } => {
            let coeff = load_coefficients(&file)?;
            distox.write_coefficients(&coeff).await.context("Failed to write coefficients")?;
            info!("Coefficients written");
        }
        Cmd::Memory { start, len } => {
            let bytes = distox.read_memory(start, len).await.context("Memory read failed")?;
            if json {
                println!("{}", serde_json::json!({ "start": start, "data": hex::encode(&bytes) }));
            } else {
                for (i, chunk) in bytes.chunks(16).enumerate() {
                    println!("{:04x}: {}", usize::from(start) + i * 16, hex::encode(chunk));
                }
            }
        }
        Cmd::HeadTail => {
            let head_tail = distox.read_head_tail().await.context("Failed to read head/tail")?;
            let pending = head_tail.pending_frames(distox.model());
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "head": head_tail.head,
                        "tail": head_tail.tail,
                        "pending": pending
                    })
                );
            } else {
                println!(
                    "head {:#06x} tail {:#06x} ({} frames pending)",
                    head_tail.head, head_tail.tail, pending
                );
            }
        }
        Cmd::BootloaderRead { page, output } => {
            let data = distox.bootloader_read_page(page).await.context("Page read failed")?;
            match output {
                Some(path) => std::fs::write(&path, data)
                    .with_context(|| format!("Failed to write {:?}", path))?,
                None => {
                    for (i, chunk) in data.chunks(16).enumerate() {
                        let offset = usize::from(page) * PAGE_SIZE + i * 16;
                        println!("{:04x}: {}", offset, hex::encode(chunk));
                    }
                }
            }
        }
        Cmd::BootloaderWrite { page, file, force } => {
            if usize::from(page) < PROTECTED_PAGES && !force {
                bail!("page {:#04x} belongs to the bootloader; use --force to overwrite it", page);
            }
            let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            if bytes.len() > PAGE_SIZE {
                bail!("{:?} holds {} bytes, more than one page", file, bytes.len());
            }
            let mut data: Page = [0u8; PAGE_SIZE];
            data[..bytes.len()].copy_from_slice(&bytes);
            distox.bootloader_write_page(page, &data).await.context("Page write failed")?;
            info!("Page {:#04x} written", page);
        }
        Cmd::FirmwareRead { output, end_page, all } => {
            let image = if all {
                distox.bootloader_dump().await
            } else {
                distox.firmware_read(end_page).await
            }
            .context("Firmware read failed")?;
            std::fs::write(&output, &image)
                .with_context(|| format!("Failed to write {:?}", output))?;
            info!("Saved {} bytes to {:?}", image.len(), output);
        }
        Cmd::FirmwareWrite { file, dry_run } => {
            let image = std::fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let pages = firmware_pages(image.len())?;
            if dry_run {
                println!(
                    "{} bytes: would write pages {:#04x}..{:#04x}",
                    image.len(),
                    pages.start,
                    pages.end
                );
                return Ok(());
            }
            let written = distox.firmware_write(&image).await.context("Firmware write failed")?;
            info!("Wrote {} pages", written);
        }
    }
    Ok(())
}

fn print_item<T>(item: &T, json: bool) -> Result<()>
where
    T: std::fmt::Display + serde::Serialize,
{
    if json {
        println!("{}", serde_json::to_string(item)?);
    } else {
        println!("{}", item);
    }
    Ok(())
}

fn load_coefficients(path: &Path) -> Result<CalibrationCoefficients> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        return serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid coefficients in {:?}", path));
    }
    CalibrationCoefficients::from_bytes(&bytes)
        .with_context(|| format!("Invalid coefficients in {:?}", path))
}
