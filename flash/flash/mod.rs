// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: flash  —  ESP flash pipeline orchestrator
// ─────────────────────────────────────────────────────────────────────────────

pub mod esptool;

use std::io::Read;
use std::path::{Path, PathBuf};

use colored::Colorize;
use tracing::info;

use crate::assets;
use crate::chips::{
    ChipFamily, ChipInfo, ESP32_APP_OFFSET, ESP32_BOOTLOADER_OFFSET, ESP32_OTADATA_OFFSET,
    ESP32_PARTITIONS_OFFSET, ESP_IMAGE_MAGIC,
};
use crate::error::{FlashError, Result};

/// What is being written decides the layout and the header check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Application,
    Filesystem,
}

#[derive(Debug)]
pub struct FlashRequest {
    pub port:       String,
    /// `None` lets esptool detect the family.
    pub chip:       Option<ChipFamily>,
    pub firmware:   PathBuf,
    pub kind:       ImageKind,
    pub baud:       u32,
    /// ESP32 assets: local paths or http(s) URLs.
    pub bootloader: String,
    pub partitions: String,
    pub otadata:    String,
    pub erase:      bool,
    pub offset:     u32,
    pub verbose:    bool,
    pub quiet:      bool,
}

/// Flash an image to a connected ESP8266 / ESP32.
pub fn flash(req: &FlashRequest) -> Result<ChipInfo> {
    if req.kind == ImageKind::Application {
        check_image_header(&req.firmware)?;
    } else if !req.firmware.is_file() {
        return Err(FlashError::InvalidFirmware(format!("{} does not exist", req.firmware.display())));
    }

    let esptool = esptool::find_esptool()?;
    let info = esptool::read_chip_info(&esptool, req.chip, &req.port)?;
    if !req.quiet {
        print_chip_info(&info);
    }

    let segments = plan_segments(req, info.family)?;
    if !req.quiet {
        println!(" - Flash Mode: {}", info.family.flash_mode());
        println!(" - Flash Frequency: {}Hz", info.family.flash_freq().to_uppercase());
    }

    if req.erase {
        if !req.quiet {
            println!("{} Erasing flash…", "→".cyan());
        }
        esptool::erase_flash(&esptool, info.family, &req.port, req.baud, req.verbose)?;
    }

    if !req.quiet {
        for (offset, path) in &segments {
            println!("{} writing {} at 0x{:05x}", "→".cyan(), path.display(), offset);
        }
    }
    esptool::write_flash(&esptool, info.family, &req.port, req.baud, &segments, req.verbose)?;
    info!(port = %req.port, segments = segments.len(), "flash written");
    Ok(info)
}

/// Offsets and files handed to `write_flash`.
///
/// An ESP32 application with no explicit offset gets the full
/// bootloader / partitions / otadata / app layout; everything else is a
/// single image at `req.offset`.
pub fn plan_segments(req: &FlashRequest, family: ChipFamily) -> Result<Vec<(u32, PathBuf)>> {
    if family == ChipFamily::Esp32 && req.kind == ImageKind::Application && req.offset == 0 {
        let bootloader = assets::substitute(&req.bootloader, family.flash_mode(), family.flash_freq());
        return Ok(vec![
            (ESP32_BOOTLOADER_OFFSET, assets::resolve(&bootloader)?),
            (ESP32_PARTITIONS_OFFSET, assets::resolve(&req.partitions)?),
            (ESP32_OTADATA_OFFSET,    assets::resolve(&req.otadata)?),
            (ESP32_APP_OFFSET,        req.firmware.clone()),
        ]);
    }
    Ok(vec![(req.offset, req.firmware.clone())])
}

/// Application images must start with the ESP image magic byte.
pub fn check_image_header(path: &Path) -> Result<()> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| FlashError::InvalidFirmware(format!("cannot open {}: {e}", path.display())))?;
    let mut magic = [0u8; 1];
    file.read_exact(&mut magic)
        .map_err(|_| FlashError::InvalidFirmware(format!("{} is empty", path.display())))?;
    if magic[0] != ESP_IMAGE_MAGIC {
        return Err(FlashError::InvalidFirmware(format!(
            "{} starts with 0x{:02X}, expected 0x{:02X}; is this an ESP firmware binary?",
            path.display(), magic[0], ESP_IMAGE_MAGIC
        )));
    }
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b { "YES" } else { "NO" }
}

pub fn print_chip_info(info: &ChipInfo) {
    println!();
    println!("{}", "Chip Info:".bold());
    println!(" - Chip Family: {}", info.family);
    println!(" - Chip Model: {}", info.model);
    if info.family == ChipFamily::Esp32 {
        println!(" - Number of Cores: {}", info.num_cores());
        println!(" - Max CPU Frequency: {}", info.cpu_frequency());
        println!(" - Has Bluetooth: {}", yes_no(info.has_bluetooth()));
        println!(" - Has Embedded Flash: {}", yes_no(info.has_embedded_flash()));
        println!(" - Has Factory-Calibrated ADC: {}", yes_no(info.has_factory_calibrated_adc()));
    }
    if let Some(mac) = &info.mac {
        println!(" - MAC Address: {mac}");
    }
    if let Some(id) = info.chip_id {
        println!(" - Chip ID: {id:08X}");
    }
    if let Some(size) = &info.flash_size {
        println!(" - Flash Size: {size}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(firmware: PathBuf, kind: ImageKind, offset: u32) -> FlashRequest {
        FlashRequest {
            port: "/dev/ttyUSB0".into(),
            chip: None,
            firmware,
            kind,
            baud: 460_800,
            bootloader: "boot_$FLASH_MODE$.bin".into(),
            partitions: "partitions.bin".into(),
            otadata: "boot_app0.bin".into(),
            erase: true,
            offset,
            verbose: false,
            quiet: true,
        }
    }

    #[test]
    fn header_check_accepts_esp_images() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.bin");
        let bad = dir.path().join("bad.bin");
        let empty = dir.path().join("empty.bin");
        std::fs::write(&good, [0xE9, 0x03, 0x02, 0x20]).unwrap();
        std::fs::write(&bad, b"PK\x03\x04").unwrap();
        std::fs::write(&empty, b"").unwrap();

        assert!(check_image_header(&good).is_ok());
        assert!(matches!(check_image_header(&bad), Err(FlashError::InvalidFirmware(_))));
        assert!(matches!(check_image_header(&empty), Err(FlashError::InvalidFirmware(_))));
    }

    #[test]
    fn esp8266_writes_single_image_at_offset() {
        let req = request("fw.bin".into(), ImageKind::Application, 0);
        let segs = plan_segments(&req, ChipFamily::Esp8266).unwrap();
        assert_eq!(segs, vec![(0, PathBuf::from("fw.bin"))]);
    }

    #[test]
    fn filesystem_image_ignores_esp32_layout() {
        let req = request("spiffs.bin".into(), ImageKind::Filesystem, 0x1E_0000);
        let segs = plan_segments(&req, ChipFamily::Esp32).unwrap();
        assert_eq!(segs, vec![(0x1E_0000, PathBuf::from("spiffs.bin"))]);
    }

    #[test]
    fn esp32_application_gets_full_layout() {
        let dir = tempfile::tempdir().unwrap();
        let p = |name: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, [0u8; 4]).unwrap();
            path.display().to_string()
        };
        let mut req = request(dir.path().join("app.bin"), ImageKind::Application, 0);
        req.bootloader = p("bootloader_dio_40m.bin").replace("dio_40m", "$FLASH_MODE$_$FLASH_FREQ$");
        req.partitions = p("partitions.bin");
        req.otadata = p("boot_app0.bin");

        let segs = plan_segments(&req, ChipFamily::Esp32).unwrap();
        let offsets: Vec<u32> = segs.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0x1000, 0x8000, 0xE000, 0x10000]);
        assert!(segs[0].1.ends_with("bootloader_dio_40m.bin"));
        assert_eq!(segs[3].1, dir.path().join("app.bin"));
    }
}
