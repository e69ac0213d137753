// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core  —  public library API
//
//  Two self-contained pieces used by the `z2mflasher` binary:
//
//    spiffs  — byte-exact SPIFFS image builder and reader
//    cclib   — CC253x debugger client speaking the CCLib proxy protocol,
//              plus the Intel HEX loader its firmware images come in
// ─────────────────────────────────────────────────────────────────────────────

pub mod cclib;
pub mod error;
pub mod spiffs;

pub use error::{Error, Result};
pub use spiffs::{BuildConfig, ByteOrder, SpiffsBuilder, SpiffsImage};

// ── One-shot helper ───────────────────────────────────────────────────────────

/// Build a SPIFFS image from every file below `dir`.
///
/// ```no_run
/// use z2mflasher_core::{build_image_from_dir, BuildConfig};
///
/// let image = build_image_from_dir("data", 110_592, BuildConfig::default()).unwrap();
/// std::fs::write("spiffs.bin", image).unwrap();
/// ```
pub fn build_image_from_dir(
    dir:        impl AsRef<std::path::Path>,
    image_size: usize,
    config:     BuildConfig,
) -> Result<Vec<u8>> {
    let mut builder = SpiffsBuilder::new(image_size, config)?;
    builder.add_dir(dir)?;
    builder.finalize()
}
