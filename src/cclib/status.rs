// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: cclib :: status  —  debug status and config registers
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;

use bitflags::{bitflags, Flags};

bitflags! {
    /// Debug status byte returned by READ_STATUS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugStatus: u8 {
        const CHIP_ERASE_BUSY   = 0x80;
        const PCON_IDLE         = 0x40;
        const CPU_HALTED        = 0x20;
        const PM_ACTIVE         = 0x10;
        const HALT_STATUS       = 0x08;
        const DEBUG_LOCKED      = 0x04;
        const OSCILLATOR_STABLE = 0x02;
        const STACK_OVERFLOW    = 0x01;
    }
}

bitflags! {
    /// Debug configuration byte (RD_CONFIG / WR_CONFIG).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugConfig: u8 {
        const SOFT_POWER_MODE = 0x08;
        const TIMERS_OFF      = 0x04;
        const DMA_PAUSE       = 0x02;
        const TIMER_SUSPEND   = 0x01;
    }
}

/// One `[X] NAME` / `[ ] NAME` line per defined flag, highest bit first.
fn render<F: Flags + Copy>(value: F, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for flag in F::FLAGS {
        let mark = if value.contains(*flag.value()) { 'X' } else { ' ' };
        writeln!(f, " [{mark}] {}", flag.name())?;
    }
    Ok(())
}

impl fmt::Display for DebugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(*self, f)
    }
}

impl fmt::Display for DebugConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(*self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_rendering_marks_set_bits() {
        let s = DebugStatus::from_bits_truncate(0x22);
        let text = s.to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], " [ ] CHIP_ERASE_BUSY");
        assert_eq!(lines[2], " [X] CPU_HALTED");
        assert_eq!(lines[6], " [X] OSCILLATOR_STABLE");
    }

    #[test]
    fn config_rendering() {
        let c = DebugConfig::DMA_PAUSE | DebugConfig::TIMERS_OFF;
        assert_eq!(
            c.to_string(),
            " [ ] SOFT_POWER_MODE\n [X] TIMERS_OFF\n [X] DMA_PAUSE\n [ ] TIMER_SUSPEND\n"
        );
    }
}
