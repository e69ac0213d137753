// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: flash :: esptool  —  ESP32 / ESP8266 programmer
//
//  All chip access goes through an installed esptool (`esptool.py` or the
//  `esptool` entry point). Chip details come from the `flash_id` command:
//
//      Detecting chip type... ESP32
//      Chip is ESP32-D0WDQ6 (revision 1)
//      Features: WiFi, BT, Dual Core, 240MHz, VRef calibration in efuse
//      MAC: 24:0a:c4:00:00:01
//      Chip ID: 0x00a1b2c3          (ESP8266 only, when printed)
//      Detected flash size: 4MB
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::chips::{ChipFamily, ChipInfo};
use crate::error::{FlashError, Result};

/// Baud rate used while identifying the chip.
const IDENTIFY_BAUD: u32 = 115_200;

pub fn find_esptool() -> Result<String> {
    for candidate in &["esptool.py", "esptool"] {
        if Command::new(candidate).arg("version").output()
            .map(|o| o.status.success()).unwrap_or(false)
        {
            return Ok(candidate.to_string());
        }
    }
    Err(FlashError::ToolchainNotFound("esptool not found on PATH".into()))
}

/// Parse the text esptool prints for `flash_id`.
pub fn parse_chip_info(output: &str) -> Option<ChipInfo> {
    let mut detected = None;
    let mut model = None;
    let mut features = Vec::new();
    let mut mac = None;
    let mut chip_id = None;
    let mut flash_size = None;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Detecting chip type...") {
            detected = ChipFamily::from_description(rest);
        } else if let Some(rest) = line.strip_prefix("Chip is ") {
            model = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Features:") {
            features = rest
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        } else if let Some(rest) = line.strip_prefix("MAC:") {
            mac = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Chip ID:") {
            let digits = rest.trim();
            let digits = digits.strip_prefix("0x").unwrap_or(digits);
            chip_id = u32::from_str_radix(digits, 16).ok();
        } else if let Some(rest) = line.strip_prefix("Detected flash size:") {
            flash_size = Some(rest.trim().to_string());
        }
    }

    let model = model?;
    let family = detected.or_else(|| ChipFamily::from_description(&model))?;
    Some(ChipInfo { family, model, features, mac, chip_id, flash_size })
}

/// Assemble esptool's `write_flash` arguments.
pub fn write_flash_args(
    family:   ChipFamily,
    port:     &str,
    baud:     u32,
    segments: &[(u32, PathBuf)],
) -> Vec<String> {
    let baud = baud.to_string();
    let mut args: Vec<String> = [
        "--chip", family.esptool_name(),
        "--port", port,
        "--baud", baud.as_str(),
        "--before", "default_reset",
        "--after",  "hard_reset",
        "write_flash",
        "--flash_mode", family.flash_mode(),
        "--flash_freq", family.flash_freq(),
        "--flash_size", "detect",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for (offset, path) in segments {
        args.push(format!("0x{offset:x}"));
        args.push(path.display().to_string());
    }
    args
}

fn run(esptool: &str, port: &str, args: &[String], verbose: bool) -> Result<String> {
    debug!(esptool, ?args, "running esptool");
    let mut cmd = Command::new(esptool);
    if verbose {
        cmd.arg("--trace");
    }
    cmd.args(args);

    let out = cmd.output()?;
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(FlashError::FlashFailed {
            port:   port.to_owned(),
            output: format!("{stdout}{stderr}"),
        });
    }
    Ok(stdout)
}

pub fn read_chip_info(esptool: &str, chip: Option<ChipFamily>, port: &str) -> Result<ChipInfo> {
    let chip_arg = chip.map(ChipFamily::esptool_name).unwrap_or("auto");
    let baud = IDENTIFY_BAUD.to_string();
    let args: Vec<String> = [
        "--chip", chip_arg,
        "--port", port,
        "--baud", baud.as_str(),
        "flash_id",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let output = run(esptool, port, &args, false)?;
    parse_chip_info(&output).ok_or_else(|| FlashError::FlashFailed {
        port:   port.to_owned(),
        output: format!("could not identify the chip from esptool output:\n{output}"),
    })
}

pub fn erase_flash(esptool: &str, family: ChipFamily, port: &str, baud: u32, verbose: bool) -> Result<()> {
    let baud = baud.to_string();
    let args: Vec<String> = [
        "--chip", family.esptool_name(),
        "--port", port,
        "--baud", baud.as_str(),
        "erase_flash",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    run(esptool, port, &args, verbose).map(drop)
}

pub fn write_flash(
    esptool:  &str,
    family:   ChipFamily,
    port:     &str,
    baud:     u32,
    segments: &[(u32, PathBuf)],
    verbose:  bool,
) -> Result<()> {
    let args = write_flash_args(family, port, baud, segments);
    run(esptool, port, &args, verbose).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ESP32_FLASH_ID: &str = "\
esptool.py v3.0
Serial port /dev/ttyUSB0
Connecting....
Detecting chip type... ESP32
Chip is ESP32-D0WDQ6 (revision 1)
Features: WiFi, BT, Dual Core, 240MHz, VRef calibration in efuse, Coding Scheme None
Crystal is 40MHz
MAC: 24:0a:c4:00:00:01
Uploading stub...
Manufacturer: c8
Device: 4016
Detected flash size: 4MB
Hard resetting via RTS pin...
";

    #[test]
    fn parses_esp32_report() {
        let info = parse_chip_info(ESP32_FLASH_ID).unwrap();
        assert_eq!(info.family, ChipFamily::Esp32);
        assert_eq!(info.model, "ESP32-D0WDQ6 (revision 1)");
        assert_eq!(info.mac.as_deref(), Some("24:0a:c4:00:00:01"));
        assert_eq!(info.flash_size.as_deref(), Some("4MB"));
        assert_eq!(info.num_cores(), 2);
        assert_eq!(info.cpu_frequency(), "240MHz");
        assert!(info.has_bluetooth());
    }

    #[test]
    fn family_falls_back_to_model() {
        let info = parse_chip_info("Chip is ESP8266EX\nFeatures: WiFi\nMAC: 5c:cf:7f:00:00:01\n").unwrap();
        assert_eq!(info.family, ChipFamily::Esp8266);
        assert_eq!(info.features, vec!["WiFi"]);
        assert_eq!(info.flash_size, None);
        assert_eq!(info.chip_id, None);
    }

    #[test]
    fn esp8266_chip_id() {
        let out = "Detecting chip type... ESP8266\nChip is ESP8266EX\nMAC: 5c:cf:7f:a1:b2:c3\nChip ID: 0x00a1b2c3\n";
        let info = parse_chip_info(out).unwrap();
        assert_eq!(info.chip_id, Some(0x00A1_B2C3));
        assert_eq!(info.mac.as_deref(), Some("5c:cf:7f:a1:b2:c3"));

        let info = parse_chip_info("Chip is ESP8266EX\nChip ID: garbage\n").unwrap();
        assert_eq!(info.chip_id, None);
    }

    #[test]
    fn unrecognised_output_is_none() {
        assert!(parse_chip_info("A fatal error occurred: Failed to connect").is_none());
    }

    #[test]
    fn write_flash_arguments() {
        let args = write_flash_args(
            ChipFamily::Esp8266,
            "/dev/ttyUSB0",
            460_800,
            &[(0x1E_0000, PathBuf::from("spiffs.bin"))],
        );
        assert_eq!(
            args,
            vec![
                "--chip", "esp8266", "--port", "/dev/ttyUSB0", "--baud", "460800",
                "--before", "default_reset", "--after", "hard_reset",
                "write_flash", "--flash_mode", "dout", "--flash_freq", "40m",
                "--flash_size", "detect", "0x1e0000", "spiffs.bin",
            ]
        );
    }
}
