// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: detect  —  serial port enumeration and selection
//
//  Ports come from `serialport::available_ports()`. USB ports carry a
//  VID:PID pair that is matched against the table of USB-serial bridges
//  found on ESP / CC253x boards.
// ─────────────────────────────────────────────────────────────────────────────

use colored::Colorize;
use serialport::SerialPortType;
use tracing::debug;

use crate::error::{FlashError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    pub port:        String,
    pub vid_pid:     Option<(u16, u16)>,
    pub bridge:      Option<&'static str>,
    pub description: Option<String>,
}

/// (VID, PID) → bridge chip.
static BRIDGES: &[(u16, u16, &str)] = &[
    // ── WCH (0x1A86) ──────────────────────────────────────────────────────
    (0x1A86, 0x7523, "CH340"),
    (0x1A86, 0x7522, "CH340C"),
    (0x1A86, 0x55D4, "CH9102"),
    // ── Silicon Labs (0x10C4) ─────────────────────────────────────────────
    (0x10C4, 0xEA60, "CP210x"),
    (0x10C4, 0xEA70, "CP2105"),
    // ── FTDI (0x0403) ─────────────────────────────────────────────────────
    (0x0403, 0x6001, "FT232R"),
    (0x0403, 0x6015, "FT-X"),
    // ── Texas Instruments (0x0451) ────────────────────────────────────────
    (0x0451, 0x16A8, "CC2531 USB dongle"),
];

// ─────────────────────────────────────────────────────────────────────────────
//  Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Enumerate all serial ports, tagging each with a bridge guess if possible.
pub fn detect_all() -> Result<Vec<DetectedPort>> {
    let ports = serialport::available_ports()
        .map_err(|e| FlashError::Other(format!("Cannot enumerate serial ports: {e}")))?;

    let mut out: Vec<DetectedPort> = ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => classify(
                p.port_name,
                Some((usb.vid, usb.pid)),
                usb.product.or(usb.manufacturer),
            ),
            _ => classify(p.port_name, None, None),
        })
        .collect();
    out.sort_by(|a, b| a.port.cmp(&b.port));
    debug!(count = out.len(), "serial ports enumerated");
    Ok(out)
}

/// Pick the port to use: explicit wins, otherwise exactly one must exist.
pub fn select_port(explicit: Option<String>, quiet: bool) -> Result<String> {
    if let Some(p) = explicit {
        if !quiet {
            println!("{} Using '{}' as serial port.", "→".cyan(), p.bold());
        }
        return Ok(p);
    }

    let ports = detect_all()?;
    if ports.len() > 1 && !quiet {
        println!("{} Found more than one serial port:", "!".yellow());
        for p in &ports {
            println!("  * {} ({})", p.port, p.label());
        }
    }
    let port = choose(ports)?;
    if !quiet {
        println!("{} Auto-detected serial port: {}", "→".cyan(), port.bold());
    }
    Ok(port)
}

pub fn choose(mut ports: Vec<DetectedPort>) -> Result<String> {
    match ports.len() {
        0 => Err(FlashError::NoPortFound),
        1 => Ok(ports.remove(0).port),
        _ => Err(FlashError::AmbiguousPort(ports.into_iter().map(|p| p.port).collect())),
    }
}

impl DetectedPort {
    /// Human label: bridge, USB description, or "n/a".
    pub fn label(&self) -> String {
        match (&self.bridge, &self.description) {
            (Some(b), Some(d)) => format!("{b}, {d}"),
            (Some(b), None)    => b.to_string(),
            (None, Some(d))    => d.clone(),
            (None, None)       => "n/a".into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Classification
// ─────────────────────────────────────────────────────────────────────────────

pub fn classify(port: String, vid_pid: Option<(u16, u16)>, description: Option<String>) -> DetectedPort {
    let bridge = vid_pid.and_then(|(vid, pid)| {
        BRIDGES
            .iter()
            .find(|(v, p, _)| *v == vid && *p == pid)
            .map(|(_, _, name)| *name)
    });
    DetectedPort { port, vid_pid, bridge, description }
}
