// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: chips  —  supported ESP chips and their flash layouts
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;

/// Application images start with this byte.
pub const ESP_IMAGE_MAGIC: u8 = 0xE9;

pub const ESP32_BOOTLOADER_OFFSET: u32 = 0x1000;
pub const ESP32_PARTITIONS_OFFSET: u32 = 0x8000;
pub const ESP32_OTADATA_OFFSET:    u32 = 0xE000;
pub const ESP32_APP_OFFSET:        u32 = 0x10000;

/// `$FLASH_MODE$` and `$FLASH_FREQ$` are substituted before fetching.
pub const ESP32_DEFAULT_BOOTLOADER: &str =
    "https://raw.githubusercontent.com/espressif/arduino-esp32/1.0.4/tools/sdk/bin/bootloader_$FLASH_MODE$_$FLASH_FREQ$.bin";
pub const ESP32_DEFAULT_PARTITIONS: &str =
    "https://raw.githubusercontent.com/esphome/esphomeflasher/master/partitions.bin";
pub const ESP32_DEFAULT_OTADATA: &str =
    "https://raw.githubusercontent.com/espressif/arduino-esp32/1.0.0/tools/partitions/boot_app0.bin";

/// Where the provisioning SPIFFS image lives on a 2 MB module.
pub const SPIFFS_OFFSET: u32 = 0x1E_0000;
pub const SPIFFS_IMAGE_SIZE: usize = 110_592;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ChipFamily {
    Esp8266,
    Esp32,
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChipFamily::Esp8266 => "ESP8266",
            ChipFamily::Esp32   => "ESP32",
        })
    }
}

impl ChipFamily {
    /// Value for esptool's `--chip`.
    pub fn esptool_name(self) -> &'static str {
        match self {
            ChipFamily::Esp8266 => "esp8266",
            ChipFamily::Esp32   => "esp32",
        }
    }

    pub fn flash_mode(self) -> &'static str {
        match self {
            ChipFamily::Esp8266 => "dout",
            ChipFamily::Esp32   => "dio",
        }
    }

    pub fn flash_freq(self) -> &'static str {
        "40m"
    }

    /// Family from esptool's chip description ("ESP32-D0WDQ6", "ESP8266EX").
    pub fn from_description(s: &str) -> Option<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if upper.starts_with("ESP8266") {
            Some(ChipFamily::Esp8266)
        } else if upper.starts_with("ESP32") {
            Some(ChipFamily::Esp32)
        } else {
            None
        }
    }
}

/// What esptool reports about the attached chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    pub family:     ChipFamily,
    pub model:      String,
    pub features:   Vec<String>,
    pub mac:        Option<String>,
    /// Reported by ESP8266 stubs only.
    pub chip_id:    Option<u32>,
    pub flash_size: Option<String>,
}

impl ChipInfo {
    fn has(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn num_cores(&self) -> u8 {
        if self.has("Dual Core") { 2 } else { 1 }
    }

    pub fn cpu_frequency(&self) -> &str {
        ["160MHz", "240MHz"]
            .into_iter()
            .find(|f| self.has(f))
            .unwrap_or("80MHz")
    }

    pub fn has_bluetooth(&self) -> bool {
        self.has("BT")
    }

    pub fn has_embedded_flash(&self) -> bool {
        self.has("Embedded Flash")
    }

    pub fn has_factory_calibrated_adc(&self) -> bool {
        self.has("VRef calibration in efuse")
    }
}
