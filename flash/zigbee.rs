// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: zigbee  —  CC253x firmware flashing through a CCLib proxy
// ─────────────────────────────────────────────────────────────────────────────

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use serialport::SerialPort;
use tracing::{info, warn};

use z2mflasher_core::cclib::{self, hex, CcDebugger, MemBlock};

use crate::error::{FlashError, Result};

/// The proxy resets when the port opens and needs this long to boot.
const PROXY_BOOT_DELAY: Duration = Duration::from_millis(1500);
const LINK_TIMEOUT: Duration = Duration::from_secs(2);
const INFO_ATTEMPTS: usize = 3;
const INFO_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct ZigbeeRequest {
    pub port:      String,
    pub baud:      u32,
    /// Intel HEX image; not needed with `info_only`.
    pub firmware:  Option<PathBuf>,
    pub info_only: bool,
    pub quiet:     bool,
}

type Debugger = CcDebugger<Box<dyn SerialPort>>;

fn open_debugger(port: &str, baud: u32) -> Result<Debugger> {
    let link = serialport::new(port, baud)
        .timeout(LINK_TIMEOUT)
        .open()
        .map_err(|source| FlashError::PortOpen { port: port.to_owned(), source })?;
    std::thread::sleep(PROXY_BOOT_DELAY);
    Ok(CcDebugger::open(link)?)
}

fn read_info(req: &ZigbeeRequest) -> Result<()> {
    if !req.quiet {
        println!("{} Read zigbee info.", "→".cyan());
    }
    let mut dbg = open_debugger(&req.port, req.baud)?;

    let ieee = dbg.ieee_address()?;
    let pc = dbg.pc()?;
    let status = dbg.status()?;
    let config = dbg.config()?;
    let chip = dbg.chip().clone();
    dbg.close()?;

    if !req.quiet {
        println!("\n{}", "Device information:".bold());
        println!(" IEEE Address : {}", cclib::format_ieee(&ieee));
        println!("         Chip : {} rev {:02x}", chip.name, chip.revision);
        println!("        Flash : {} KiB", chip.flash_kb);
        println!("         SRAM : {} KiB", chip.sram_kb);
        println!("          USB : {}", if chip.usb { "yes" } else { "no" });
        println!("           PC : {pc:04x}");
        println!("\n{}", "Debug status:".bold());
        print!("{status}");
        println!("\n{}", "Debug config:".bold());
        print!("{config}");
        println!();
    }
    Ok(())
}

/// Highest address the image touches; must fit in `flash_size`.
pub fn check_fits(blocks: &[MemBlock], flash_size: usize) -> Result<usize> {
    let needed = blocks.iter().map(|b| b.end() as usize).max().unwrap_or(0);
    if needed > flash_size {
        return Err(FlashError::FirmwareTooLarge { needed, flash: flash_size });
    }
    Ok(needed)
}

fn print_sections(firmware: &std::path::Path, blocks: &[MemBlock]) {
    println!("Sections in {}:\n", firmware.display());
    println!(" Addr.    Size");
    println!("-------- -------------");
    for b in blocks {
        println!(" 0x{:04x}   {} B", b.addr, b.size());
    }
    println!();
}

fn flash_firmware(req: &ZigbeeRequest, firmware: &std::path::Path) -> Result<()> {
    let blocks = hex::load(firmware)?;
    if !req.quiet {
        print_sections(firmware, &blocks);
    }

    let mut dbg = open_debugger(&req.port, req.baud)?;
    check_fits(&blocks, dbg.chip().flash_size())?;

    if !req.quiet {
        println!("{}", "Flashing:".bold());
        println!(" - Chip erase...");
    }
    dbg.chip_erase()?;
    dbg.pause_dma(false)?;

    if !req.quiet {
        println!(" - Flashing {} memory blocks...", blocks.len());
    }
    for block in &blocks {
        if !req.quiet {
            println!(" -> 0x{:04x} : {} bytes ", block.addr, block.size());
        }
        let quiet = req.quiet;
        dbg.write_code(block.addr, &block.bytes, true, &mut |done, total| {
            if !quiet {
                print!("\r    {:>3}% ({done}/{total})", done * 100 / total.max(1));
                let _ = std::io::stdout().flush();
            }
        })?;
        if !req.quiet {
            println!();
        }
    }
    dbg.close()?;
    info!(blocks = blocks.len(), "zigbee firmware written");
    Ok(())
}

pub fn run(req: &ZigbeeRequest) -> Result<()> {
    cclib::with_retries(INFO_ATTEMPTS, INFO_BACKOFF, |attempt| {
        read_info(req).map_err(|e| {
            if !req.quiet {
                println!("{} Read zigbee info failed (attempt {attempt}/{INFO_ATTEMPTS}).", "!".yellow());
            }
            e
        })
    })
    .map_err(|e| {
        warn!(error = %e, "giving up on the zigbee module");
        FlashError::ZigbeeNotFound
    })?;

    if req.info_only {
        return Ok(());
    }

    let firmware = req.firmware.as_deref().ok_or_else(|| {
        FlashError::InvalidFirmware("a HEX firmware file is required (--firmware)".into())
    })?;
    flash_firmware(req, firmware)?;

    if !req.quiet {
        println!("\n{} Completed", "✓".green().bold());
    }
    Ok(())
}
