use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use fwflash_lib::{CHUNK_SIZE, DeviceFamily, Flash, IhexImage};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

mod progress;
mod serial;

#[derive(Parser, Debug)]
#[command(author, version, about = "fwflash CLI", long_about = None)]
struct Cli {
    /// Device family to program
    #[arg(short = 'f', long = "family", value_enum)]
    family: DeviceFamily,

    /// Serial port device
    #[arg(short = 'p', long = "port")]
    port: String,

    /// Serial port baud rate
    #[arg(short = 'b', long = "baud", default_value = "1000000")]
    baud: u32,

    /// Per-operation response timeout in milliseconds, 0 to wait forever
    /// (the device protocol itself has none).
    #[arg(long = "timeout-ms", default_value_t = 0)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Program an Intel HEX image: erase, write, verify
    #[command(name = "write")]
    Write(WriteArgs),

    /// Read raw bytes from flash
    #[command(name = "read")]
    Read(ReadArgs),

    /// Erase a single sector
    #[command(name = "erase")]
    Erase(EraseArgs),
}

#[derive(Parser, Debug)]
struct WriteArgs {
    /// Firmware image (.ihx / .hex)
    image: PathBuf,
}

#[derive(Parser, Debug)]
struct ReadArgs {
    /// Start address (decimal or 0x-prefixed hex)
    address: String,

    /// Number of bytes to read
    length: String,

    /// Write the bytes to this file instead of hex-dumping to stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct EraseArgs {
    /// Sector index
    sector: u32,

    /// Bypass the restricted-sector check (recovery tooling only; this can
    /// brick the bootloader or destroy the authentication hash)
    #[arg(long = "force")]
    force: bool,
}

/// Accepts decimal, 0x-hex, 0o-octal and 0b-binary.
fn parse_u32(text: &str) -> anyhow::Result<u32> {
    let text = text.trim();
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(oct) = text.strip_prefix("0o") {
        u32::from_str_radix(oct, 8)
    } else if let Some(bin) = text.strip_prefix("0b") {
        u32::from_str_radix(bin, 2)
    } else {
        text.parse()
    };
    value.with_context(|| format!("invalid number: {text}"))
}

/// Convert macOS /dev/tty.* ports to /dev/cu.* ports; the tty nodes block
/// on carrier detect.
fn normalize_port_name(port_name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        if port_name.starts_with("/dev/tty.") {
            return port_name.replace("/dev/tty.", "/dev/cu.");
        }
    }
    port_name.to_string()
}

fn check_port_available(port_name: &str) -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("failed to list serial ports")?;
    if ports.iter().any(|p| p.port_name == port_name) {
        return Ok(());
    }
    let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    bail!(
        "port '{}' does not exist. Available ports: {}",
        port_name,
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    );
}

fn hex_dump(address: u32, data: &[u8]) {
    for (i, row) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = row.iter().map(|b| format!("{b:02X}")).collect();
        println!("{:#010X}  {}", address + (i * 16) as u32, bytes.join(" "));
    }
}

fn run(args: Cli) -> anyhow::Result<()> {
    let port_name = normalize_port_name(&args.port);
    check_port_available(&port_name)?;

    let link = serial::SerialLink::open(&port_name, args.baud)?;
    let mut flash = Flash::new(link, args.family);
    if args.timeout_ms > 0 {
        flash.set_timeout(Some(Duration::from_millis(args.timeout_ms)));
    }

    match args.command {
        Commands::Write(params) => {
            let image = IhexImage::from_path(&params.image)
                .with_context(|| format!("failed to load image {}", params.image.display()))?;
            if image.is_empty() {
                bail!("image {} contains no data", params.image.display());
            }
            let progress = progress::create_progress_callback();
            let stats = flash.write_image(&image, progress.as_ref())?;
            println!(
                "Successfully programmed flash: {} bytes, {} sectors erased, total time = {} seconds",
                stats.bytes_written,
                stats.sectors_erased.len(),
                stats.elapsed.as_secs()
            );
        }
        Commands::Read(params) => {
            let address = parse_u32(&params.address)?;
            let length = parse_u32(&params.length)?;
            let mut data = Vec::with_capacity(length as usize);
            let mut addr = address;
            let mut remaining = length;
            while remaining > 0 {
                let n = remaining.min(CHUNK_SIZE as u32) as u8;
                data.extend(flash.read(addr, n)?);
                addr += u32::from(n);
                remaining -= u32::from(n);
            }
            match params.output {
                Some(path) => {
                    fs::write(&path, &data)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Read {} bytes to {}", data.len(), path.display());
                }
                None => hex_dump(address, &data),
            }
        }
        Commands::Erase(params) => {
            if params.force {
                eprintln!(
                    "warning: erasing sector {} with the restriction check bypassed",
                    params.sector
                );
            }
            flash.erase_sector(params.sector, !params.force)?;
            println!("Erased sector {}", params.sector);
        }
    }
    Ok(())
}

fn main() {
    // Log level comes from RUST_LOG, e.g. RUST_LOG=fwflash_lib=trace.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Cli::parse();
    if let Err(err) = run(args) {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}
