// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: cclib  —  CC253x debugger client
//
//  The Zigbee radio is programmed through its two-wire debug interface. A
//  small proxy firmware (CCLib) drives the wires and exposes the debug
//  commands over a serial link; this module speaks that serial protocol.
//
//    proxy     — frame-level command/response exchange
//    debugger  — chip-level operations built from debug instructions
//    hex       — Intel HEX firmware loader
//    status    — debug status / config register flags
// ─────────────────────────────────────────────────────────────────────────────

pub mod debugger;
pub mod hex;
pub mod proxy;
pub mod status;

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub use debugger::{CcDebugger, ChipInfo};
pub use hex::MemBlock;
pub use proxy::CcProxy;
pub use status::{DebugConfig, DebugStatus};

#[derive(Debug, Error)]
pub enum CcError {
    #[error("debugger link: {0}")]
    Io(#[from] std::io::Error),

    #[error("debugger responded with error 0x{0:02x}")]
    Device(u8),

    #[error("unexpected debugger response 0x{0:02x}")]
    UnexpectedResponse(u8),

    #[error("burst write of {0} bytes exceeds the 2048-byte limit")]
    BurstTooLong(usize),

    #[error("8051 instructions are 1 to 3 bytes, got {0}")]
    BadInstruction(usize),

    #[error("unknown chip id 0x{0:02x}")]
    UnknownChip(u8),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("flash page {page} is locked")]
    FlashLocked { page: u32 },

    #[error("flash verification failed at 0x{addr:05x}")]
    VerifyFailed { addr: u32 },

    #[error("HEX line {line}: {reason}")]
    Hex { line: usize, reason: String },

    #[error("cannot read firmware {}: {source}", path.display())]
    Firmware { path: std::path::PathBuf, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, CcError>;

/// Name of a CC25xx part from the chip id the debug interface reports.
pub fn chip_name(chip_id: u8) -> Option<&'static str> {
    match chip_id {
        0xA5 => Some("CC2530"),
        0xB5 => Some("CC2531"),
        0x95 => Some("CC2533"),
        0x8D => Some("CC2540"),
        0x41 => Some("CC2541"),
        _    => None,
    }
}

/// IEEE address as printed on labels: most significant byte first.
///
/// The chip stores it little-endian.
pub fn format_ieee(raw: &[u8; 8]) -> String {
    raw.iter()
        .rev()
        .map(|b| ::hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Run `op` up to `attempts` times, sleeping `backoff × attempt` between
/// failures. `op` receives the 1-based attempt number.
pub fn with_retries<T, E: std::fmt::Display>(
    attempts: usize,
    backoff:  Duration,
    mut op:   impl FnMut(usize) -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, error = %e, "attempt failed, retrying");
                std::thread::sleep(backoff * attempt as u32);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
