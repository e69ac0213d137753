// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: cclib :: proxy  —  CCLib serial framing
//
//  Host → proxy, always four bytes:
//
//      [cmd, c1, c2, c3]
//
//  Proxy → host:
//
//      ANS_OK    hi lo     16-bit result (hi << 8 | lo)
//      ANS_ERROR code      command failed on the debug interface
//      ANS_READY           waiting for a burst-write payload
//
//  A burst write is the frame, ANS_READY, the payload, then ANS_OK.
// ─────────────────────────────────────────────────────────────────────────────

use std::io::{Read, Write};

use tracing::trace;

use super::{CcError, Result};

pub const CMD_ENTER:      u8 = 0x01;
pub const CMD_EXIT:       u8 = 0x02;
pub const CMD_CHIP_ID:    u8 = 0x03;
pub const CMD_STATUS:     u8 = 0x04;
pub const CMD_PC:         u8 = 0x05;
pub const CMD_STEP:       u8 = 0x06;
pub const CMD_EXEC_1:     u8 = 0x07;
pub const CMD_EXEC_2:     u8 = 0x08;
pub const CMD_EXEC_3:     u8 = 0x09;
pub const CMD_BURST_WR:   u8 = 0x0A;
pub const CMD_RD_CFG:     u8 = 0x0B;
pub const CMD_WR_CFG:     u8 = 0x0C;
pub const CMD_CHIP_ERASE: u8 = 0x0D;
pub const CMD_RESUME:     u8 = 0x0E;
pub const CMD_HALT:       u8 = 0x0F;
pub const CMD_PING:       u8 = 0xF0;
pub const CMD_INSTR_VER:  u8 = 0xF1;

pub const ANS_OK:    u8 = 0x01;
pub const ANS_ERROR: u8 = 0x02;
pub const ANS_READY: u8 = 0x03;

/// Largest payload a single burst write carries.
pub const MAX_BURST: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Ok(u16),
    Ready,
}

/// Frame-level client over any byte stream (normally a serial port).
#[derive(Debug)]
pub struct CcProxy<T> {
    link: T,
}

impl<T: Read + Write> CcProxy<T> {
    pub fn new(link: T) -> Self {
        Self { link }
    }

    pub fn into_inner(self) -> T {
        self.link
    }

    fn send(&mut self, cmd: u8, c1: u8, c2: u8, c3: u8) -> Result<()> {
        trace!(cmd, c1, c2, c3, "→ frame");
        self.link.write_all(&[cmd, c1, c2, c3])?;
        self.link.flush()?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.link.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_answer(&mut self) -> Result<Answer> {
        match self.read_byte()? {
            ANS_OK => {
                let hi = self.read_byte()?;
                let lo = self.read_byte()?;
                let value = u16::from(hi) << 8 | u16::from(lo);
                trace!(value, "← ok");
                Ok(Answer::Ok(value))
            }
            ANS_ERROR => Err(CcError::Device(self.read_byte()?)),
            ANS_READY => Ok(Answer::Ready),
            other     => Err(CcError::UnexpectedResponse(other)),
        }
    }

    fn expect_ok(&mut self) -> Result<u16> {
        match self.read_answer()? {
            Answer::Ok(v) => Ok(v),
            Answer::Ready => Err(CcError::UnexpectedResponse(ANS_READY)),
        }
    }

    /// Send one frame and wait for its 16-bit result.
    pub fn command(&mut self, cmd: u8, c1: u8, c2: u8, c3: u8) -> Result<u16> {
        self.send(cmd, c1, c2, c3)?;
        self.expect_ok()
    }

    pub fn ping(&mut self) -> Result<()> {
        self.command(CMD_PING, 0, 0, 0).map(drop)
    }

    pub fn instruction_version(&mut self) -> Result<u16> {
        self.command(CMD_INSTR_VER, 0, 0, 0)
    }

    pub fn enter(&mut self) -> Result<()> {
        self.command(CMD_ENTER, 0, 0, 0).map(drop)
    }

    pub fn exit(&mut self) -> Result<()> {
        self.command(CMD_EXIT, 0, 0, 0).map(drop)
    }

    /// Chip id in the high byte, revision in the low byte.
    pub fn chip_id(&mut self) -> Result<u16> {
        self.command(CMD_CHIP_ID, 0, 0, 0)
    }

    pub fn status(&mut self) -> Result<u8> {
        self.command(CMD_STATUS, 0, 0, 0).map(|v| v as u8)
    }

    pub fn pc(&mut self) -> Result<u16> {
        self.command(CMD_PC, 0, 0, 0)
    }

    pub fn step(&mut self) -> Result<u8> {
        self.command(CMD_STEP, 0, 0, 0).map(|v| v as u8)
    }

    pub fn read_config(&mut self) -> Result<u8> {
        self.command(CMD_RD_CFG, 0, 0, 0).map(|v| v as u8)
    }

    pub fn write_config(&mut self, cfg: u8) -> Result<()> {
        self.command(CMD_WR_CFG, cfg, 0, 0).map(drop)
    }

    pub fn chip_erase(&mut self) -> Result<()> {
        self.command(CMD_CHIP_ERASE, 0, 0, 0).map(drop)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.command(CMD_RESUME, 0, 0, 0).map(drop)
    }

    pub fn halt(&mut self) -> Result<()> {
        self.command(CMD_HALT, 0, 0, 0).map(drop)
    }

    /// Execute a 1–3 byte 8051 instruction; returns the accumulator.
    pub fn exec(&mut self, instr: &[u8]) -> Result<u8> {
        let v = match *instr {
            [a]       => self.command(CMD_EXEC_1, a, 0, 0)?,
            [a, b]    => self.command(CMD_EXEC_2, a, b, 0)?,
            [a, b, c] => self.command(CMD_EXEC_3, a, b, c)?,
            _ => return Err(CcError::BadInstruction(instr.len())),
        };
        Ok(v as u8)
    }

    /// Stream `data` into the debug data register (DBGDATA).
    pub fn burst_write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > MAX_BURST {
            return Err(CcError::BurstTooLong(data.len()));
        }
        let len = data.len();
        self.send(CMD_BURST_WR, (len >> 8) as u8 & 0x0F, len as u8, 0)?;
        match self.read_answer()? {
            Answer::Ready => {}
            Answer::Ok(_) => return Err(CcError::UnexpectedResponse(ANS_OK)),
        }
        self.link.write_all(data)?;
        self.link.flush()?;
        self.expect_ok().map(drop)
    }
}
