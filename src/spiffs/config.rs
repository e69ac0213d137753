// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: spiffs :: config  —  image layout parameters
//
//  Mirrors the compile-time settings of the SPIFFS instance running on the
//  device (spiffs_config.h). An image built with a layout that differs from
//  the firmware's will not mount.
//
//  Layout files are TOML; every key is optional:
//
//      page_size           = 256
//      block_size          = 4096
//      object_name_max_len = 32
//      byte_order          = "little"
//      use_magic           = true
// ─────────────────────────────────────────────────────────────────────────────

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of the flags byte in every page header.
pub(crate) const PAGE_FLAGS_LEN: usize = 1;
/// Length of the object size field in the first index page.
pub(crate) const INDEX_SIZE_LEN: usize = 4;
/// Length of the object type field in the first index page.
pub(crate) const INDEX_TYPE_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Write the low `width` bytes of `value` into `out`.
    pub(crate) fn put(self, out: &mut [u8], value: u64, width: usize) {
        match self {
            Self::Little => out[..width].copy_from_slice(&value.to_le_bytes()[..width]),
            Self::Big    => out[..width].copy_from_slice(&value.to_be_bytes()[8 - width..]),
        }
    }

    pub(crate) fn get(self, bytes: &[u8], width: usize) -> u64 {
        let mut raw = [0u8; 8];
        match self {
            Self::Little => {
                raw[..width].copy_from_slice(&bytes[..width]);
                u64::from_le_bytes(raw)
            }
            Self::Big => {
                raw[8 - width..].copy_from_slice(&bytes[..width]);
                u64::from_be_bytes(raw)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Logical page size in bytes.
    pub page_size:           usize,
    /// Width of a page index (`spiffs_page_ix`).
    pub page_index_len:      usize,
    /// Logical block size in bytes; the erase unit.
    pub block_size:          usize,
    /// Width of a block index (`spiffs_block_ix`).
    pub block_index_len:     usize,
    /// Zeroed metadata bytes stored after the object name.
    pub meta_len:            usize,
    /// Maximum object name length, in bytes.
    pub object_name_max_len: usize,
    /// Width of an object id (`spiffs_obj_id`).
    pub object_id_len:       usize,
    /// Width of a span index (`spiffs_span_ix`).
    pub span_index_len:      usize,
    pub byte_order:          ByteOrder,
    /// Write the per-block magic into the last lookup page.
    pub use_magic:           bool,
    /// Fold the number of blocks left into the magic.
    pub use_magic_len:       bool,
    /// Pad the index page header to a 4-byte boundary.
    #[serde(alias = "use_padding")]
    pub aligned:             bool,
    /// Tail blocks left out of allocation.
    #[serde(alias = "block_count_for_lookup")]
    pub reserved_blocks:     usize,
}

impl Default for BuildConfig {
    /// The layout of the ESP8266 Zigbee gateway firmware.
    fn default() -> Self {
        Self {
            page_size:           256,
            page_index_len:      2,
            block_size:          4096,
            block_index_len:     2,
            meta_len:            1,
            object_name_max_len: 32,
            object_id_len:       2,
            span_index_len:      2,
            byte_order:          ByteOrder::Little,
            use_magic:           true,
            use_magic_len:       false,
            aligned:             true,
            reserved_blocks:     0,
        }
    }
}

impl BuildConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let widths = [
            ("page_index_len",  self.page_index_len),
            ("block_index_len", self.block_index_len),
            ("object_id_len",   self.object_id_len),
            ("span_index_len",  self.span_index_len),
        ];
        for (name, w) in widths {
            if !matches!(w, 1 | 2 | 4 | 8) {
                return Err(Error::InvalidConfig(format!("{name} must be 1, 2, 4 or 8 (got {w})")));
            }
        }
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "page size {} is not a power of two", self.page_size
            )));
        }
        if self.block_size == 0 || self.block_size % self.page_size != 0 {
            return Err(Error::InvalidConfig(format!(
                "block size {} is not a multiple of page size {}",
                self.block_size, self.page_size
            )));
        }
        if self.usable_pages_per_block() < 2 {
            return Err(Error::InvalidConfig(
                "a block must hold at least two pages besides its lookup pages".into(),
            ));
        }
        if self.index_header_len() + self.page_index_len > self.page_size {
            return Err(Error::InvalidConfig(format!(
                "object index header ({} bytes) leaves no room for page entries in a {}-byte page",
                self.index_header_len(), self.page_size
            )));
        }
        Ok(())
    }

    // ── Derived geometry ──────────────────────────────────────────────────────

    pub fn pages_per_block(&self) -> usize {
        self.block_size / self.page_size
    }

    /// Lookup pages at the start of each block: one object id per page.
    pub fn lookup_pages_per_block(&self) -> usize {
        (self.pages_per_block() * self.object_id_len).div_ceil(self.page_size)
    }

    pub fn usable_pages_per_block(&self) -> usize {
        self.pages_per_block().saturating_sub(self.lookup_pages_per_block())
    }

    pub fn lookup_entries_per_page(&self) -> usize {
        self.page_size / self.object_id_len
    }

    /// obj_id + span_ix + flags.
    pub fn data_header_len(&self) -> usize {
        self.object_id_len + self.span_index_len + PAGE_FLAGS_LEN
    }

    /// Erased bytes between the page header and the index page body.
    pub fn index_header_pad(&self) -> usize {
        if self.aligned { (4 - self.data_header_len() % 4) % 4 } else { 0 }
    }

    /// Payload bytes carried by one data page.
    pub fn data_content_len(&self) -> usize {
        self.page_size - self.data_header_len()
    }

    /// Header length of the first (span 0) index page of an object.
    pub fn index_header_len(&self) -> usize {
        self.data_header_len()
            + self.index_header_pad()
            + INDEX_SIZE_LEN
            + INDEX_TYPE_LEN
            + self.object_name_max_len
            + self.meta_len
    }

    /// Data page references held by the first index page of an object.
    pub fn index_entries_head(&self) -> usize {
        (self.page_size - self.index_header_len()) / self.page_index_len
    }

    /// Data page references held by a continuation index page.
    pub fn index_entries_cont(&self) -> usize {
        (self.page_size - self.data_header_len() - self.index_header_pad()) / self.page_index_len
    }

    /// Set on the object id of index pages and their lookup entries.
    pub fn index_id_flag(&self) -> u64 {
        1 << (self.object_id_len * 8 - 1)
    }

    /// All-ones value of the object id width: an erased lookup entry.
    pub fn erased_id(&self) -> u64 {
        width_mask(self.object_id_len)
    }

    /// The per-block magic, as written by `SPIFFS_MAGIC`.
    pub fn magic(&self, block_count: usize, bix: usize) -> u64 {
        let mut magic = 0x2014_0529u64 ^ self.page_size as u64;
        if self.use_magic_len {
            magic ^= (block_count - bix) as u64;
        }
        magic & width_mask(self.object_id_len)
    }
}

pub(crate) fn width_mask(width: usize) -> u64 {
    if width >= 8 { u64::MAX } else { (1u64 << (width * 8)) - 1 }
}
