// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher :: logs  —  timestamped serial console
// ─────────────────────────────────────────────────────────────────────────────

use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;

use chrono::{Local, NaiveTime};
use colored::Colorize;
use tracing::debug;

use crate::error::{FlashError, Result};

const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// `[HH:MM:SS]` followed by the line without its CR/LF.
pub fn format_line(raw: &[u8], time: NaiveTime) -> String {
    let text = String::from_utf8_lossy(raw);
    format!("[{}]{}", time.format("%H:%M:%S"), text.trim_end_matches(['\r', '\n']))
}

/// Print lines from `port` until it goes away.
pub fn show_logs(port: &str, baud: u32) -> Result<()> {
    let link = serialport::new(port, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|source| FlashError::PortOpen { port: port.to_owned(), source })?;
    debug!(port, baud, "showing serial logs");

    let mut reader = BufReader::new(link);
    let mut line = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut line) {
            // a partial line stays in `line` until the rest arrives
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if line.ends_with(b"\n") {
                    println!("{}", format_line(&line, Local::now().time()));
                    line.clear();
                }
            }
        }
    }

    if !line.is_empty() {
        println!("{}", format_line(&line, Local::now().time()));
    }
    println!("{}", "Serial port closed!".yellow());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn strips_line_endings() {
        assert_eq!(format_line(b"coordinator ready\r\n", at(9, 5, 3)), "[09:05:03]coordinator ready");
        assert_eq!(format_line(b"no newline", at(23, 59, 59)), "[23:59:59]no newline");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(format_line(b"temp \xff\n", at(0, 0, 0)), "[00:00:00]temp \u{FFFD}");
    }

    #[test]
    fn empty_line_keeps_timestamp() {
        assert_eq!(format_line(b"\n", at(12, 0, 0)), "[12:00:00]");
    }
}
