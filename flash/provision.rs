// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: provision  —  device config.json → SPIFFS image → flash
//
//  The gateway firmware reads its Wi-Fi / TCP / MQTT settings from
//  /config.json on its SPIFFS partition. Provisioning merges the CLI values
//  into <data>/config.json, packs the whole data directory into a SPIFFS
//  image and writes it at the filesystem offset without erasing the chip.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use z2mflasher_core::{BuildConfig, SpiffsBuilder};

use crate::chips::{ChipFamily, ESP32_DEFAULT_BOOTLOADER, ESP32_DEFAULT_OTADATA, ESP32_DEFAULT_PARTITIONS};
use crate::error::Result;
use crate::flash::{self, FlashRequest, ImageKind};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceConfig {
    pub ssid:           String,
    pub password:       String,
    pub hostname:       String,
    pub tcp_port:       u16,
    pub mqtt_server:    String,
    pub mqtt_port:      u16,
    pub mqtt_user:      String,
    pub mqtt_pass:      String,
    #[serde(rename = "mqttClientID")]
    pub mqtt_client_id: String,
    pub mqtt_pub_topic: String,
    pub mqtt_sub_topic: String,
    /// Keys this tool does not know about, kept as they were.
    #[serde(flatten)]
    pub extra:          Map<String, Value>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ssid:           String::new(),
            password:       String::new(),
            hostname:       String::new(),
            tcp_port:       8880,
            mqtt_server:    String::new(),
            mqtt_port:      1883,
            mqtt_user:      String::new(),
            mqtt_pass:      String::new(),
            mqtt_client_id: String::new(),
            mqtt_pub_topic: String::new(),
            mqtt_sub_topic: String::new(),
            extra:          Map::new(),
        }
    }
}

/// Values given on the command line. Empty strings do not override.
#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    pub ssid:     Option<String>,
    pub password: Option<String>,
    pub hostname: Option<String>,
    pub tcp_port: Option<u16>,
}

impl ProvisionOptions {
    pub fn is_empty(&self) -> bool {
        given(&self.ssid).is_none()
            && given(&self.password).is_none()
            && given(&self.hostname).is_none()
            && self.tcp_port.is_none()
    }
}

fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl DeviceConfig {
    /// Read an existing config; a missing or unreadable file starts fresh.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(d)  => d,
            Err(_) => {
                info!(path = %path.display(), "no existing device config");
                return Self::default();
            }
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring invalid device config");
            Self::default()
        })
    }

    pub fn apply(&mut self, opts: &ProvisionOptions) {
        if let Some(v) = given(&opts.ssid) {
            self.ssid = v.to_owned();
        }
        if let Some(v) = given(&opts.password) {
            self.password = v.to_owned();
        }
        if let Some(v) = given(&opts.hostname) {
            self.hostname = v.to_owned();
        }
        if let Some(port) = opts.tcp_port {
            self.tcp_port = port;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ProvisionRequest {
    pub data_dir:   PathBuf,
    /// TOML SPIFFS layout; the built-in layout when `None`.
    pub layout:     Option<PathBuf>,
    pub image_size: usize,
    pub output:     PathBuf,
    pub offset:     u32,
    pub options:    ProvisionOptions,
    pub port:       String,
    pub chip:       Option<ChipFamily>,
    pub baud:       u32,
    pub verbose:    bool,
    pub quiet:      bool,
}

/// Merge the config, build the image and write it to `req.output`.
pub fn prepare(req: &ProvisionRequest) -> Result<DeviceConfig> {
    std::fs::create_dir_all(&req.data_dir)?;

    let config_path = req.data_dir.join(CONFIG_FILE);
    let mut config = DeviceConfig::load(&config_path);
    config.apply(&req.options);
    config.save(&config_path)?;

    let layout = match &req.layout {
        Some(path) => BuildConfig::load(path)?,
        None       => BuildConfig::default(),
    };
    let mut builder = SpiffsBuilder::new(req.image_size, layout)?;
    builder.add_dir(&req.data_dir)?;
    let image = builder.finalize()?;
    std::fs::write(&req.output, &image)?;

    info!(output = %req.output.display(), bytes = image.len(), "SPIFFS image written");
    Ok(config)
}

pub fn run(req: &ProvisionRequest) -> Result<()> {
    if !req.quiet {
        println!("{} Create spiffs for user config.", "→".cyan());
    }
    let config = prepare(req)?;
    if !req.quiet {
        println!(
            "  {} ssid={:?} hostname={:?} tcpPort={}",
            "config:".dimmed(), config.ssid, config.hostname, config.tcp_port
        );
        println!("  {} {}", "image:".dimmed(), req.output.display());
    }

    flash::flash(&FlashRequest {
        port:       req.port.clone(),
        chip:       req.chip,
        firmware:   req.output.clone(),
        kind:       ImageKind::Filesystem,
        baud:       req.baud,
        bootloader: ESP32_DEFAULT_BOOTLOADER.into(),
        partitions: ESP32_DEFAULT_PARTITIONS.into(),
        otadata:    ESP32_DEFAULT_OTADATA.into(),
        erase:      false,
        offset:     req.offset,
        verbose:    req.verbose,
        quiet:      req.quiet,
    })?;
    Ok(())
}
