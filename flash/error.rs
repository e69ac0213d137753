// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: error
// ─────────────────────────────────────────────────────────────────────────────

use thiserror::Error;
use z2mflasher_core::cclib::CcError;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Toolchain not found: {0}\n  Hint: install esptool with `pip install esptool`")]
    ToolchainNotFound(String),

    #[error("Flash failed on {port}:\n{output}")]
    FlashFailed { port: String, output: String },

    #[error("No serial port found!\n  Hint: connect the device, or pass --port /dev/ttyUSBx")]
    NoPortFound,

    #[error("Found more than one serial port ({})\n  Hint: choose one with --port", .0.join(", "))]
    AmbiguousPort(Vec<String>),

    #[error("Cannot open serial port '{port}': {source}")]
    PortOpen { port: String, source: serialport::Error },

    #[error("Can not find zigbee module.")]
    ZigbeeNotFound,

    #[error("Firmware needs {needed} bytes but the chip only has {flash} bytes of flash")]
    FirmwareTooLarge { needed: usize, flash: usize },

    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),

    #[error("Download failed ({url}): {reason}")]
    Download { url: String, reason: String },

    #[error(transparent)]
    Core(#[from] z2mflasher_core::Error),

    #[error(transparent)]
    Debugger(#[from] CcError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FlashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debugger_errors_keep_their_message() {
        let err: FlashError = CcError::VerifyFailed { addr: 0x800 }.into();
        assert!(matches!(err, FlashError::Debugger(CcError::VerifyFailed { addr: 0x800 })));
        assert_eq!(err.to_string(), "flash verification failed at 0x00800");

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FlashError = CcError::Firmware { path: "fw/coord.hex".into(), source: missing }.into();
        assert_eq!(err.to_string(), "cannot read firmware fw/coord.hex: gone");
    }
}
