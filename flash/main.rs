// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher  —  Zigbee gateway flashing tool
//
//  Flashes the ESP8266 / ESP32 side of a Wi-Fi Zigbee gateway through
//  esptool, programs its CC253x radio through a CCLib proxy, and provisions
//  the gateway's config.json as a SPIFFS image.
//
//  USAGE
//  ─────
//    z2mflasher flash     --firmware gateway.bin --ssid home --password secret
//    z2mflasher provision --port /dev/ttyUSB0 --hostname gw --tcp-port 8880
//    z2mflasher zigbee    --firmware CC2530ZNP.hex
//    z2mflasher zigbee    --info
//    z2mflasher spiffs    build data -o spiffs.bin
//    z2mflasher logs
//    z2mflasher detect
// ─────────────────────────────────────────────────────────────────────────────

mod assets;
mod chips;
mod detect;
mod error;
mod flash;
mod logs;
mod provision;
mod zigbee;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use z2mflasher_core::{BuildConfig, SpiffsBuilder, SpiffsImage};

use chips::{
    ChipFamily, ESP32_DEFAULT_BOOTLOADER, ESP32_DEFAULT_OTADATA, ESP32_DEFAULT_PARTITIONS,
    SPIFFS_IMAGE_SIZE, SPIFFS_OFFSET,
};
use error::{FlashError, Result};
use flash::{FlashRequest, ImageKind};
use provision::{ProvisionOptions, ProvisionRequest};
use zigbee::ZigbeeRequest;

// ─────────────────────────────────────────────────────────────────────────────
//  CLI definition (clap derive)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "z2mflasher",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Flash and provision ESP-based Zigbee gateways and their CC253x radio",
    long_about = None,
    arg_required_else_help = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Suppress progress output
    #[arg(long, global = true)]
    quiet: bool,

    /// Debug logging and esptool tracing
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Flash ESP8266 / ESP32 firmware, then optionally provision it
    Flash(FlashArgs),
    /// Write config.json into a SPIFFS image and flash it
    Provision(ProvisionArgs),
    /// Flash or inspect the CC253x Zigbee radio through a CCLib proxy
    Zigbee(ZigbeeArgs),
    /// Build and inspect SPIFFS images offline
    Spiffs(SpiffsArgs),
    /// Show timestamped serial output
    Logs(LogsArgs),
    /// List serial ports
    Detect,
}

// ── Provisioning values (shared) ──────────────────────────────────────────────

#[derive(Args, Default)]
struct ConfigArgs {
    /// Wi-Fi network name
    #[arg(long)]
    ssid: Option<String>,

    /// Wi-Fi password
    #[arg(long)]
    password: Option<String>,

    /// Device hostname
    #[arg(long)]
    hostname: Option<String>,

    /// TCP port the gateway listens on
    #[arg(long)]
    tcp_port: Option<u16>,
}

impl From<ConfigArgs> for ProvisionOptions {
    fn from(a: ConfigArgs) -> Self {
        ProvisionOptions { ssid: a.ssid, password: a.password, hostname: a.hostname, tcp_port: a.tcp_port }
    }
}

// ── Flash ─────────────────────────────────────────────────────────────────────

#[derive(Args)]
struct FlashArgs {
    /// Serial port  (auto-detect if omitted)
    #[arg(long, short = 'p')]
    port: Option<String>,

    /// Chip family  (detected by esptool if omitted)
    #[arg(long, value_enum)]
    chip: Option<ChipFamily>,

    /// Firmware image (.bin)
    #[arg(long, short = 'f')]
    firmware: PathBuf,

    /// Upload baud rate
    #[arg(long, default_value_t = 460_800)]
    baud: u32,

    /// ESP32 bootloader (path or URL; $FLASH_MODE$ / $FLASH_FREQ$ are substituted)
    #[arg(long, default_value = ESP32_DEFAULT_BOOTLOADER)]
    bootloader: String,

    /// ESP32 partition table (path or URL)
    #[arg(long, default_value = ESP32_DEFAULT_PARTITIONS)]
    partitions: String,

    /// ESP32 OTA data (path or URL)
    #[arg(long, default_value = ESP32_DEFAULT_OTADATA)]
    otadata: String,

    /// Keep the existing flash contents
    #[arg(long)]
    no_erase: bool,

    /// Flash offset  (hex with 0x, or decimal)
    #[arg(long, default_value = "0", value_parser = parse_offset)]
    offset: u32,

    #[command(flatten)]
    config: ConfigArgs,
}

// ── Provision ─────────────────────────────────────────────────────────────────

#[derive(Args)]
struct ProvisionArgs {
    /// Serial port  (auto-detect if omitted)
    #[arg(long, short = 'p')]
    port: Option<String>,

    /// Chip family  (detected by esptool if omitted)
    #[arg(long, value_enum)]
    chip: Option<ChipFamily>,

    /// Upload baud rate
    #[arg(long, default_value_t = 460_800)]
    baud: u32,

    /// Directory packed into the image; config.json is written here
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// SPIFFS layout (TOML)
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Image size in bytes
    #[arg(long, default_value_t = SPIFFS_IMAGE_SIZE)]
    image_size: usize,

    /// Filesystem offset  (hex with 0x, or decimal)
    #[arg(long, default_value = "0x1E0000", value_parser = parse_offset)]
    offset: u32,

    /// Where the image is written before flashing
    #[arg(long, short = 'o', default_value = "spiffs.bin")]
    output: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

// ── Zigbee ────────────────────────────────────────────────────────────────────

#[derive(Args)]
struct ZigbeeArgs {
    /// Serial port of the CCLib proxy  (auto-detect if omitted)
    #[arg(long, short = 'p')]
    port: Option<String>,

    /// Intel HEX firmware
    #[arg(long, short = 'f', required_unless_present = "info")]
    firmware: Option<PathBuf>,

    /// Only read and print chip information
    #[arg(long)]
    info: bool,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,
}

// ── Spiffs ────────────────────────────────────────────────────────────────────

#[derive(Args)]
struct SpiffsArgs {
    #[command(subcommand)]
    command: SpiffsCmd,

    /// SPIFFS layout (TOML)
    #[arg(long, global = true)]
    layout: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SpiffsCmd {
    /// Pack a directory into an image
    Build {
        dir: PathBuf,

        #[arg(long, short = 'o', default_value = "spiffs.bin")]
        output: PathBuf,

        /// Image size in bytes
        #[arg(long, default_value_t = SPIFFS_IMAGE_SIZE)]
        size: usize,
    },
    /// List the files in an image
    List {
        image: PathBuf,
    },
    /// Unpack an image into a directory
    Extract {
        image: PathBuf,
        dir:   PathBuf,
    },
}

// ── Logs ──────────────────────────────────────────────────────────────────────

#[derive(Args)]
struct LogsArgs {
    /// Serial port  (auto-detect if omitted)
    #[arg(long, short = 'p')]
    port: Option<String>,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_tracing(cli.verbose);

    let result = match cli.command {
        Cmd::Flash(args)     => cmd_flash(args, cli.verbose, cli.quiet),
        Cmd::Provision(args) => cmd_provision(args, cli.verbose, cli.quiet),
        Cmd::Zigbee(args)    => cmd_zigbee(args, cli.quiet),
        Cmd::Spiffs(args)    => cmd_spiffs(args, cli.quiet),
        Cmd::Logs(args)      => cmd_logs(args, cli.quiet),
        Cmd::Detect          => cmd_detect(),
    };

    if let Err(e) = result {
        render_error(&e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

// ─────────────────────────────────────────────────────────────────────────────
//  Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_flash(args: FlashArgs, verbose: bool, quiet: bool) -> Result<()> {
    let port = detect::select_port(args.port, quiet)?;

    if !quiet {
        println!(
            "{} {} {}",
            "Flashing".cyan().bold(),
            format!("[firmware: {}]", args.firmware.display()).dimmed(),
            format!("[port: {port}]").dimmed(),
        );
        println!("{}", "─".repeat(60).dimmed());
    }

    let t0 = Instant::now();
    let req = FlashRequest {
        port:       port.clone(),
        chip:       args.chip,
        firmware:   args.firmware,
        kind:       ImageKind::Application,
        baud:       args.baud,
        bootloader: args.bootloader,
        partitions: args.partitions,
        otadata:    args.otadata,
        erase:      !args.no_erase,
        offset:     args.offset,
        verbose,
        quiet,
    };
    let info = flash::flash(&req)?;

    if !quiet {
        println!("{} firmware written in {:.2}s", "✓".green().bold(), t0.elapsed().as_secs_f64());
    }

    let options = ProvisionOptions::from(args.config);
    if !options.is_empty() {
        let req = ProvisionRequest {
            data_dir:   PathBuf::from("data"),
            layout:     None,
            image_size: SPIFFS_IMAGE_SIZE,
            output:     PathBuf::from("spiffs.bin"),
            offset:     SPIFFS_OFFSET,
            options,
            port,
            chip:       Some(info.family),
            baud:       args.baud,
            verbose,
            quiet,
        };
        provision::run(&req)?;
    }

    if !quiet {
        println!("\n{} Done! Flashing is complete!", "✓".green().bold());
    }
    Ok(())
}

fn cmd_provision(args: ProvisionArgs, verbose: bool, quiet: bool) -> Result<()> {
    let req = ProvisionRequest {
        data_dir:   args.data_dir,
        layout:     args.layout,
        image_size: args.image_size,
        output:     args.output,
        offset:     args.offset,
        options:    args.config.into(),
        port:       detect::select_port(args.port, quiet)?,
        chip:       args.chip,
        baud:       args.baud,
        verbose,
        quiet,
    };
    provision::run(&req)?;

    if !quiet {
        println!("\n{} Done! Flashing is complete!", "✓".green().bold());
    }
    Ok(())
}

fn cmd_zigbee(args: ZigbeeArgs, quiet: bool) -> Result<()> {
    let req = ZigbeeRequest {
        port:      detect::select_port(args.port, quiet)?,
        baud:      args.baud,
        firmware:  args.firmware,
        info_only: args.info,
        quiet,
    };
    zigbee::run(&req)
}

fn cmd_spiffs(args: SpiffsArgs, quiet: bool) -> Result<()> {
    let layout = match &args.layout {
        Some(path) => BuildConfig::load(path)?,
        None       => BuildConfig::default(),
    };

    match args.command {
        SpiffsCmd::Build { dir, output, size } => {
            let mut builder = SpiffsBuilder::new(size, layout)?;
            builder.add_dir(&dir)?;
            let count = builder.paths().count();
            let image = builder.finalize()?;
            std::fs::write(&output, &image)?;
            if !quiet {
                println!(
                    "{} packed {} files into {} ({} bytes)",
                    "✓".green().bold(), count, output.display(), image.len()
                );
            }
        }

        SpiffsCmd::List { image } => {
            let raw = std::fs::read(&image)?;
            let fs = SpiffsImage::parse(&raw, layout)?;
            let files = fs.files()?;

            println!("{:<40} {:>8}", "PATH", "SIZE");
            println!("{}", "─".repeat(49).dimmed());
            for f in &files {
                println!("{:<40} {:>8}", f.path, f.contents.len());
            }

            let usage = fs.usage();
            println!("{}", "─".repeat(49).dimmed());
            println!(
                "{} blocks, pages: {} index, {} data, {} deleted, {} free",
                fs.block_count(), usage.index, usage.data, usage.deleted, usage.free
            );
        }

        SpiffsCmd::Extract { image, dir } => {
            let raw = std::fs::read(&image)?;
            let files = SpiffsImage::parse(&raw, layout)?.files()?;
            for f in &files {
                let dest = extract_path(&dir, &f.path).ok_or_else(|| {
                    FlashError::Other(format!("refusing to extract '{}' outside {}", f.path, dir.display()))
                })?;
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dest, &f.contents)?;
                if !quiet {
                    println!("  {} {}", "→".cyan(), dest.display());
                }
            }
            if !quiet {
                println!("{} extracted {} files", "✓".green().bold(), files.len());
            }
        }
    }
    Ok(())
}

fn cmd_logs(args: LogsArgs, quiet: bool) -> Result<()> {
    let port = detect::select_port(args.port, quiet)?;
    logs::show_logs(&port, args.baud)
}

fn cmd_detect() -> Result<()> {
    let ports = detect::detect_all()?;

    if ports.is_empty() {
        println!("{} No serial ports found", "!".yellow());
        return Ok(());
    }

    println!("{:<20} {:<10} {}", "PORT", "VID:PID", "BRIDGE");
    println!("{}", "─".repeat(60).dimmed());

    for p in &ports {
        let vid_pid = p.vid_pid
            .map(|(v, p)| format!("{v:04X}:{p:04X}"))
            .unwrap_or_else(|| "—".into());
        println!("{:<20} {:<10} {}", p.port, vid_pid, p.label());
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_offset(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None      => s.parse(),
    };
    parsed.map_err(|e| format!("invalid offset '{s}': {e}"))
}

/// Where an image path lands below `root`; `None` if it would escape.
fn extract_path(root: &Path, virtual_path: &str) -> Option<PathBuf> {
    let rel = Path::new(virtual_path.trim_start_matches('/'));
    if rel.as_os_str().is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(root.join(rel))
}

// ─────────────────────────────────────────────────────────────────────────────
//  Error rendering
// ─────────────────────────────────────────────────────────────────────────────

fn render_error(e: &FlashError) {
    match e {
        FlashError::FlashFailed { port, output } => {
            eprintln!("\n{} {}", "FlashError".red().bold(), format!("esptool failed on {port}"));
            eprintln!("{}", "─".repeat(60).dimmed());
            for line in output.lines() {
                if line.to_lowercase().contains("error") {
                    eprintln!("  {}", line.red());
                } else if !line.trim().is_empty() {
                    eprintln!("  {}", line.dimmed());
                }
            }
            eprintln!();
            eprintln!("  {}", "Hints:".bold());
            eprintln!("  • Hold the boot button while the upload starts");
            eprintln!("  • Try a lower --baud or a different USB cable");
            eprintln!("{}", "─".repeat(60).dimmed());
        }
        FlashError::ZigbeeNotFound => {
            eprintln!("{} {}", "✗".red().bold(), e);
            eprintln!("  Check the debug wiring and that the CCLib proxy firmware is running");
        }
        _ => eprintln!("{} {}", "✗".red().bold(), e),
    }
}
