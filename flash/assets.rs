// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: assets  —  bootloader / partition / otadata resolution
//
//  A location is either a local path or an http(s) URL. URLs are downloaded
//  once and kept under the cache directory, named by the SHA-256 of the URL.
//  A JSON manifest records the content hash of every cached file so a
//  truncated or edited file is fetched again.
//
//  Cache directory: $Z2MFLASHER_CACHE, else ~/.cache/z2mflasher
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{FlashError, Result};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAsset {
    pub url:        String,
    pub sha256:     String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheManifest {
    /// File name in the cache directory → what it was fetched from.
    pub entries: HashMap<String, CachedAsset>,
}

impl CacheManifest {
    /// Load from disk, or return an empty manifest on any error.
    pub fn load(dir: &Path) -> Self {
        let data = match std::fs::read_to_string(dir.join(MANIFEST_FILE)) {
            Ok(d)  => d,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&data).unwrap_or_default()
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(dir.join(MANIFEST_FILE), json)
    }

    /// True if `name` is present on disk with the recorded content hash.
    pub fn is_fresh(&self, dir: &Path, name: &str) -> bool {
        match self.entries.get(name) {
            Some(entry) => std::fs::read(dir.join(name))
                .map(|data| sha256_hex(&data) == entry.sha256)
                .unwrap_or(false),
            None => false,
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Fill in the flash-mode / flash-frequency placeholders.
pub fn substitute(location: &str, flash_mode: &str, flash_freq: &str) -> String {
    location
        .replace("$FLASH_MODE$", flash_mode)
        .replace("$FLASH_FREQ$", flash_freq)
}

/// Cache file name for a URL, keeping its extension.
pub fn cache_name(url: &str) -> String {
    let digest = sha256_hex(url.as_bytes());
    let ext = url
        .rsplit('/')
        .next()
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 4)
        .unwrap_or("bin");
    format!("{}.{ext}", &digest[..16])
}

pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("Z2MFLASHER_CACHE") {
        return Ok(PathBuf::from(dir));
    }
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".cache").join("z2mflasher"))
        .map_err(|_| FlashError::Other("Cannot determine home directory".into()))
}

/// Resolve a location to a local file, downloading URLs into the cache.
pub fn resolve(location: &str) -> Result<PathBuf> {
    if !is_remote(location) {
        let path = PathBuf::from(location);
        if !path.is_file() {
            return Err(FlashError::InvalidFirmware(format!("{location} does not exist")));
        }
        return Ok(path);
    }
    fetch_cached(location, &cache_dir()?)
}

/// Return the cached copy of `url` in `dir`, downloading it if needed.
pub fn fetch_cached(url: &str, dir: &Path) -> Result<PathBuf> {
    let name = cache_name(url);
    let path = dir.join(&name);
    let mut manifest = CacheManifest::load(dir);

    if manifest.is_fresh(dir, &name) {
        debug!(url, path = %path.display(), "asset cache hit");
        return Ok(path);
    }

    info!(url, "downloading asset");
    let body = download(url)?;
    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, &body)?;

    manifest.entries.insert(name, CachedAsset {
        url:        url.to_owned(),
        sha256:     sha256_hex(&body),
        fetched_at: Utc::now(),
    });
    manifest.save(dir)?;
    Ok(path)
}

fn download(url: &str) -> Result<Vec<u8>> {
    let resp = ureq::get(url).call().map_err(|e| FlashError::Download {
        url:    url.to_owned(),
        reason: e.to_string(),
    })?;

    let mut buf = Vec::new();
    resp.into_reader()
        .read_to_end(&mut buf)
        .map_err(|e| FlashError::Download {
            url:    url.to_owned(),
            reason: format!("failed to read body: {e}"),
        })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let url = crate::chips::ESP32_DEFAULT_BOOTLOADER;
        assert!(substitute(url, "dio", "40m").ends_with("/bootloader_dio_40m.bin"));
        assert_eq!(substitute("boot.bin", "dio", "40m"), "boot.bin");
    }

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://example.org/a.bin"));
        assert!(is_remote("http://example.org/a.bin"));
        assert!(!is_remote("./bootloader.bin"));
    }

    #[test]
    fn cache_names_are_stable_and_distinct() {
        let a = cache_name("https://example.org/partitions.bin");
        let b = cache_name("https://example.org/boot_app0.bin");
        assert_eq!(a, cache_name("https://example.org/partitions.bin"));
        assert_ne!(a, b);
        assert!(a.ends_with(".bin"));
        assert_eq!(a.len(), 16 + 4);
    }

    #[test]
    fn fresh_cache_entry_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        // Unroutable host: any network access would fail the test.
        let url = "http://127.0.0.1:9/partitions.bin";
        let name = cache_name(url);
        std::fs::write(dir.path().join(&name), b"table").unwrap();

        let mut manifest = CacheManifest::default();
        manifest.entries.insert(name.clone(), CachedAsset {
            url:        url.into(),
            sha256:     sha256_hex(b"table"),
            fetched_at: Utc::now(),
        });
        manifest.save(dir.path()).unwrap();

        let path = fetch_cached(url, dir.path()).unwrap();
        assert_eq!(path, dir.path().join(name));
    }

    #[test]
    fn tampered_cache_entry_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = CacheManifest::default();
        manifest.entries.insert("x.bin".into(), CachedAsset {
            url:        "https://example.org/x.bin".into(),
            sha256:     sha256_hex(b"original"),
            fetched_at: Utc::now(),
        });
        std::fs::write(dir.path().join("x.bin"), b"edited").unwrap();

        assert!(!manifest.is_fresh(dir.path(), "x.bin"));
        assert!(!manifest.is_fresh(dir.path(), "missing.bin"));
    }

    #[test]
    fn missing_local_asset_is_rejected() {
        assert!(matches!(
            resolve("/definitely/not/here.bin"),
            Err(FlashError::InvalidFirmware(_))
        ));
    }
}
