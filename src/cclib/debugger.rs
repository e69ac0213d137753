// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: cclib :: debugger  —  chip-level CC253x operations
//
//  Memory is reached by feeding single 8051 instructions through EXEC:
//
//      MOV DPTR,#addr     90 hi lo
//      MOV A,#imm         74 imm
//      MOVX @DPTR,A       F0
//      MOVX A,@DPTR       E0
//      INC DPTR           A3
//      CLR A              E4
//      MOVC A,@A+DPTR     93
//      MOV FMAP,#bank     75 9F bank
//
//  Flash is programmed with two DMA channels: channel 0 moves burst-written
//  bytes from the debug data register into RAM, channel 1 moves them from
//  RAM into the flash write register while the flash controller is armed.
// ─────────────────────────────────────────────────────────────────────────────

use std::io::{Read, Write};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::proxy::{CcProxy, MAX_BURST};
use super::status::{DebugConfig, DebugStatus};
use super::{chip_name, CcError, Result};

const OP_MOV_DPTR:    u8 = 0x90;
const OP_MOV_A_IMM:   u8 = 0x74;
const OP_MOVX_WRITE:  u8 = 0xF0;
const OP_MOVX_READ:   u8 = 0xE0;
const OP_INC_DPTR:    u8 = 0xA3;
const OP_CLR_A:       u8 = 0xE4;
const OP_MOVC:        u8 = 0x93;
const OP_MOV_DIRECT:  u8 = 0x75;

const SFR_FMAP: u8 = 0x9F;

pub const XDATA_IEEE_ADDR: u16 = 0x780C;

const X_CHIPINFO0: u16 = 0x6276;
const X_DBGDATA:   u16 = 0x6260;
const X_FCTL:      u16 = 0x6270;
const X_FADDRL:    u16 = 0x6271;
const X_FWDATA:    u16 = 0x6273;
const X_DMAIRQ:    u16 = 0x70D1;
const X_DMA1CFGL:  u16 = 0x70D2;
const X_DMA0CFGL:  u16 = 0x70D4;
const X_DMAARM:    u16 = 0x70D6;

const FCTL_WRITE: u8 = 0x02;
const FCTL_ABORT: u8 = 0x20;
const FCTL_BUSY:  u8 = 0x80;

const DMAARM_ABORT: u8 = 0x80;

const DMA_TRIG_DBG_BW: u8 = 0x1F;
const DMA_TRIG_FLASH:  u8 = 0x12;

/// DMA descriptors live in RAM above the transfer buffer.
const DMA_DESC_BASE: u16 = 0x1000;
const DMA_BUFFER:    u16 = 0x0000;

/// Code memory visible without bank switching.
const COMMON_BANK: u32 = 0x8000;

pub const FLASH_PAGE_SIZE: usize = 2048;
const FLASH_WORD_SIZE: u32 = 4;
const VERIFY_RETRIES: usize = 3;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_MAX_POLLS: usize = 1000;

/// Identity and sizing of the attached chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    pub chip_id:  u8,
    pub revision: u8,
    pub name:     &'static str,
    pub flash_kb: u32,
    pub sram_kb:  u32,
    pub usb:      bool,
}

impl ChipInfo {
    pub fn flash_size(&self) -> usize {
        self.flash_kb as usize * 1024
    }

    fn apply_chipinfo(&mut self, info0: u8, info1: u8) {
        self.flash_kb = 16 << ((info0 >> 4) & 0x07);
        self.usb      = info0 & 0x08 != 0;
        self.sram_kb  = u32::from(info1 & 0x07) + 1;
    }
}

/// One DMA descriptor as laid out in XDATA.
#[derive(Debug, Clone, Copy)]
struct DmaChannel {
    src:      u16,
    dst:      u16,
    trigger:  u8,
    len:      u16,
    src_inc:  bool,
    dst_inc:  bool,
    priority: u8,
}

impl DmaChannel {
    fn descriptor(&self) -> [u8; 8] {
        let [src_hi, src_lo] = self.src.to_be_bytes();
        let [dst_hi, dst_lo] = self.dst.to_be_bytes();
        // VLEN 0 (fixed length), single transfer mode, byte words, IRQ on.
        [
            src_hi,
            src_lo,
            dst_hi,
            dst_lo,
            (self.len >> 8) as u8 & 0x1F,
            self.len as u8,
            self.trigger & 0x1F,
            (u8::from(self.src_inc) << 6)
                | (u8::from(self.dst_inc) << 4)
                | (1 << 3)
                | (self.priority & 0x03),
        ]
    }
}

pub struct CcDebugger<T> {
    proxy:         CcProxy<T>,
    chip:          ChipInfo,
    poll_interval: Duration,
    max_polls:     usize,
}

impl<T: Read + Write> CcDebugger<T> {
    /// Ping the proxy, put the chip in debug mode and read its identity.
    pub fn open(link: T) -> Result<Self> {
        let mut proxy = CcProxy::new(link);
        proxy.ping()?;
        proxy.enter()?;

        let id = proxy.chip_id()?;
        let chip_id = (id >> 8) as u8;
        let name = chip_name(chip_id).ok_or(CcError::UnknownChip(chip_id))?;

        let mut dbg = Self {
            proxy,
            chip: ChipInfo {
                chip_id,
                revision: id as u8,
                name,
                flash_kb: 0,
                sram_kb: 0,
                usb: false,
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls:     DEFAULT_MAX_POLLS,
        };

        let info = dbg.read_xdata(X_CHIPINFO0, 2)?;
        dbg.chip.apply_chipinfo(info[0], info[1]);

        let status = dbg.status()?;
        let config = dbg.config()?;
        debug!(?status, ?config, "debug interface state");
        info!(
            chip = dbg.chip.name,
            revision = dbg.chip.revision,
            flash_kb = dbg.chip.flash_kb,
            "entered debug mode"
        );
        Ok(dbg)
    }

    /// Poll cadence used while waiting on the chip. Zero is fine for tests.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn chip(&self) -> &ChipInfo {
        &self.chip
    }

    pub fn instruction_version(&mut self) -> Result<u16> {
        self.proxy.instruction_version()
    }

    pub fn ieee_address(&mut self) -> Result<[u8; 8]> {
        let raw = self.read_xdata(XDATA_IEEE_ADDR, 8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(&raw);
        Ok(out)
    }

    pub fn pc(&mut self) -> Result<u16> {
        self.proxy.pc()
    }

    pub fn status(&mut self) -> Result<DebugStatus> {
        self.proxy.status().map(DebugStatus::from_bits_retain)
    }

    pub fn config(&mut self) -> Result<DebugConfig> {
        self.proxy.read_config().map(DebugConfig::from_bits_retain)
    }

    pub fn set_config(&mut self, config: DebugConfig) -> Result<()> {
        self.proxy.write_config(config.bits())
    }

    pub fn pause_dma(&mut self, pause: bool) -> Result<()> {
        let mut cfg = self.config()?;
        cfg.set(DebugConfig::DMA_PAUSE, pause);
        self.set_config(cfg)
    }

    pub fn halt(&mut self) -> Result<()> {
        self.proxy.halt()
    }

    pub fn resume(&mut self) -> Result<()> {
        self.proxy.resume()
    }

    pub fn step(&mut self) -> Result<u8> {
        self.proxy.step()
    }

    fn exec(&mut self, instr: &[u8]) -> Result<u8> {
        self.proxy.exec(instr)
    }

    fn set_dptr(&mut self, addr: u16) -> Result<()> {
        let [hi, lo] = addr.to_be_bytes();
        self.exec(&[OP_MOV_DPTR, hi, lo]).map(drop)
    }

    pub fn read_xdata(&mut self, addr: u16, len: usize) -> Result<Vec<u8>> {
        self.set_dptr(addr)?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.exec(&[OP_MOVX_READ])?);
            self.exec(&[OP_INC_DPTR])?;
        }
        Ok(out)
    }

    pub fn write_xdata(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        self.set_dptr(addr)?;
        for &b in data {
            self.exec(&[OP_MOV_A_IMM, b])?;
            self.exec(&[OP_MOVX_WRITE])?;
            self.exec(&[OP_INC_DPTR])?;
        }
        Ok(())
    }

    fn read_register(&mut self, addr: u16) -> Result<u8> {
        Ok(self.read_xdata(addr, 1)?[0])
    }

    fn write_register(&mut self, addr: u16, value: u8) -> Result<()> {
        self.write_xdata(addr, &[value])
    }

    /// Read code memory. Addresses past the common bank go through FMAP.
    pub fn read_code(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut cur = addr;

        while out.len() < len {
            let bank = cur / COMMON_BANK;
            let offset = cur % COMMON_BANK;
            let n = ((COMMON_BANK - offset) as usize).min(len - out.len());

            let window = if bank == 0 {
                offset as u16
            } else {
                self.exec(&[OP_MOV_DIRECT, SFR_FMAP, bank as u8])?;
                (COMMON_BANK + offset) as u16
            };
            self.set_dptr(window)?;
            for _ in 0..n {
                self.exec(&[OP_CLR_A])?;
                out.push(self.exec(&[OP_MOVC])?);
                self.exec(&[OP_INC_DPTR])?;
            }
            cur += n as u32;
        }
        Ok(out)
    }

    /// Erase the whole chip and wait for the controller to finish.
    pub fn chip_erase(&mut self) -> Result<()> {
        self.proxy.chip_erase()?;
        for _ in 0..self.max_polls {
            if !self.status()?.contains(DebugStatus::CHIP_ERASE_BUSY) {
                info!("chip erased");
                return Ok(());
            }
            std::thread::sleep(self.poll_interval);
        }
        Err(CcError::Timeout("chip erase"))
    }

    fn configure_dma(&mut self, index: u8, ch: DmaChannel) -> Result<()> {
        let desc_addr = DMA_DESC_BASE + u16::from(index) * 8;
        self.write_xdata(desc_addr, &ch.descriptor())?;

        // Channel 0 has its own pointer; channels 1–4 share a table.
        let (cfg_reg, table) = if index == 0 {
            (X_DMA0CFGL, desc_addr)
        } else {
            (X_DMA1CFGL, DMA_DESC_BASE + 8)
        };
        let [hi, lo] = table.to_be_bytes();
        self.write_xdata(cfg_reg, &[lo, hi])
    }

    fn configure_transfer(&mut self, len: usize) -> Result<()> {
        let len = len as u16;
        self.configure_dma(0, DmaChannel {
            src:      X_DBGDATA,
            dst:      DMA_BUFFER,
            trigger:  DMA_TRIG_DBG_BW,
            len,
            src_inc:  false,
            dst_inc:  true,
            priority: 1,
        })?;
        self.configure_dma(1, DmaChannel {
            src:      DMA_BUFFER,
            dst:      X_FWDATA,
            trigger:  DMA_TRIG_FLASH,
            len,
            src_inc:  true,
            dst_inc:  false,
            priority: 2,
        })
    }

    fn arm_dma(&mut self, ch: u8) -> Result<()> {
        let armed = self.read_register(X_DMAARM)?;
        self.write_register(X_DMAARM, armed | (1 << ch))
    }

    fn disarm_dma(&mut self, ch: u8) -> Result<()> {
        self.write_register(X_DMAARM, DMAARM_ABORT | (1 << ch))
    }

    fn dma_irq(&mut self, ch: u8) -> Result<bool> {
        Ok(self.read_register(X_DMAIRQ)? & (1 << ch) != 0)
    }

    fn clear_dma_irq(&mut self, ch: u8) -> Result<()> {
        let irq = self.read_register(X_DMAIRQ)?;
        self.write_register(X_DMAIRQ, irq & !(1 << ch))
    }

    fn clear_flash_status(&mut self) -> Result<()> {
        let fctl = self.read_register(X_FCTL)?;
        if fctl & FCTL_BUSY != 0 {
            return Err(CcError::Timeout("flash controller to go idle"));
        }
        self.write_register(X_FCTL, fctl & 0x1F)
    }

    fn wait_dma(&mut self, ch: u8, page: Option<u32>) -> Result<()> {
        for _ in 0..self.max_polls {
            if self.dma_irq(ch)? {
                return self.clear_dma_irq(ch);
            }
            if let Some(page) = page {
                if self.read_register(X_FCTL)? & FCTL_ABORT != 0 {
                    self.disarm_dma(ch)?;
                    return Err(CcError::FlashLocked { page });
                }
            }
            std::thread::sleep(self.poll_interval);
        }
        Err(CcError::Timeout(if ch == 0 { "DMA upload to RAM" } else { "DMA write to flash" }))
    }

    /// Program `data` at flash address `addr`, one flash page at a time.
    ///
    /// The flash controller writes whole 32-bit words, so the data is padded
    /// with 0xFF (which leaves flash bits untouched) out to word boundaries.
    /// `progress` receives (bytes written, total) after every chunk.
    pub fn write_code(
        &mut self,
        addr:     u32,
        data:     &[u8],
        verify:   bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let lead = (addr % FLASH_WORD_SIZE) as usize;
        let base = addr - lead as u32;
        let mut image = vec![0xFF; lead];
        image.extend_from_slice(data);
        image.resize(image.len().next_multiple_of(FLASH_WORD_SIZE as usize), 0xFF);
        let payload = lead..lead + data.len();
        if image.len() != data.len() {
            debug!(addr, base, len = data.len(), padded = image.len(), "padded to flash words");
        }

        let chunk_len = FLASH_PAGE_SIZE.min(MAX_BURST);
        self.pause_dma(false)?;
        self.configure_transfer(chunk_len)?;
        self.clear_flash_status()?;
        for ch in [0, 1] {
            self.clear_dma_irq(ch)?;
            self.disarm_dma(ch)?;
        }

        let mut configured = chunk_len;
        let mut retries = 0;
        let mut ofs = 0;

        while ofs < image.len() {
            let len = chunk_len.min(image.len() - ofs);
            if len != configured {
                self.configure_transfer(len)?;
                configured = len;
            }
            let chunk = &image[ofs..ofs + len];
            let flash_addr = base + ofs as u32;
            let page = flash_addr / FLASH_PAGE_SIZE as u32;

            self.arm_dma(0)?;
            self.proxy.burst_write(chunk)?;
            self.wait_dma(0, None)?;

            let word = flash_addr / FLASH_WORD_SIZE;
            self.write_xdata(X_FADDRL, &[word as u8, (word >> 8) as u8])?;
            self.arm_dma(1)?;
            let fctl = self.read_register(X_FCTL)?;
            self.write_register(X_FCTL, fctl | FCTL_WRITE)?;
            self.wait_dma(1, Some(page))?;
            debug!(addr = flash_addr, len, "chunk written");

            if verify {
                let back = self.read_code(flash_addr, len)?;
                let mismatch = back
                    .iter()
                    .zip(chunk)
                    .enumerate()
                    .position(|(i, (a, b))| payload.contains(&(ofs + i)) && a != b);
                if let Some(i) = mismatch {
                    let bad = flash_addr + i as u32;
                    if retries < VERIFY_RETRIES {
                        retries += 1;
                        warn!(addr = bad, retries, "verify mismatch, rewriting chunk");
                        continue;
                    }
                    return Err(CcError::VerifyFailed { addr: bad });
                }
            }

            retries = 0;
            ofs += len;
            progress(ofs.saturating_sub(lead).min(data.len()), data.len());
        }
        Ok(())
    }

    /// Leave debug mode and hand back the transport.
    pub fn close(mut self) -> Result<T> {
        self.proxy.exit()?;
        Ok(self.proxy.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cclib::proxy::{
        ANS_OK, ANS_READY, CMD_BURST_WR, CMD_CHIP_ERASE, CMD_CHIP_ID, CMD_ENTER,
        CMD_EXEC_1, CMD_EXEC_2, CMD_EXEC_3, CMD_EXIT, CMD_PC, CMD_PING, CMD_RD_CFG,
        CMD_STATUS, CMD_WR_CFG,
    };
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::io;

    /// Behavioural model of a CC2530 behind the proxy: interprets the
    /// instructions this module issues, runs both DMA channels and the
    /// flash controller.
    struct SimChip {
        xdata:       Vec<u8>,
        code:        Vec<u8>,
        dptr:        u16,
        acc:         u8,
        fmap:        u8,
        config:      u8,
        erase_polls: usize,
        locked:      bool,
        /// Corrupt this many flash writes before behaving.
        flaky:       usize,
        frame:       Vec<u8>,
        burst:       Option<usize>,
        out:         VecDeque<u8>,
        exited:      bool,
    }

    impl SimChip {
        fn new() -> Self {
            let mut xdata = vec![0u8; 0x10000];
            xdata[X_CHIPINFO0 as usize] = 0x48; // 256 KiB, USB
            xdata[X_CHIPINFO0 as usize + 1] = 0x07; // 8 KiB SRAM
            xdata[XDATA_IEEE_ADDR as usize..XDATA_IEEE_ADDR as usize + 8]
                .copy_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
            Self {
                xdata,
                code:        vec![0xFF; 256 * 1024],
                dptr:        0,
                acc:         0,
                fmap:        0,
                config:      DebugConfig::DMA_PAUSE.bits(),
                erase_polls: 0,
                locked:      false,
                flaky:       0,
                frame:       Vec::new(),
                burst:       None,
                out:         VecDeque::new(),
                exited:      false,
            }
        }

        fn answer(&mut self, value: u16) {
            self.out.extend([ANS_OK, (value >> 8) as u8, value as u8]);
        }

        fn reg(&self, addr: u16) -> u8 {
            self.xdata[addr as usize]
        }

        fn descriptor(&self, cfg_reg: u16) -> (u16, u16, usize) {
            let at = u16::from_le_bytes([self.reg(cfg_reg), self.reg(cfg_reg + 1)]) as usize;
            let d = &self.xdata[at..at + 8];
            let src = u16::from_be_bytes([d[0], d[1]]);
            let dst = u16::from_be_bytes([d[2], d[3]]);
            let len = (usize::from(d[4] & 0x1F) << 8) | usize::from(d[5]);
            (src, dst, len)
        }

        fn store(&mut self, addr: u16, value: u8) {
            if addr == X_DMAARM && value & DMAARM_ABORT != 0 {
                self.xdata[addr as usize] &= !(value & 0x1F);
            } else {
                self.xdata[addr as usize] = value;
            }
            if addr == X_FCTL && value & FCTL_WRITE != 0 {
                self.flash_write();
            }
        }

        fn flash_write(&mut self) {
            self.xdata[X_FCTL as usize] &= !FCTL_WRITE;
            if self.reg(X_DMAARM) & 0x02 == 0 {
                return;
            }
            if self.locked {
                self.xdata[X_FCTL as usize] |= FCTL_ABORT;
                return;
            }
            let (src, dst, len) = self.descriptor(X_DMA1CFGL);
            assert_eq!(dst, X_FWDATA);
            assert_eq!(len % FLASH_WORD_SIZE as usize, 0, "flash writes whole words");
            let word = u16::from_le_bytes([self.reg(X_FADDRL), self.reg(X_FADDRL + 1)]) as usize;
            let base = word * FLASH_WORD_SIZE as usize;
            for i in 0..len {
                let mut b = self.xdata[src as usize + i];
                if self.flaky > 0 && i == 0 {
                    b ^= 0x01;
                }
                // programming only clears bits
                self.code[base + i] &= b;
            }
            self.flaky = self.flaky.saturating_sub(1);
            self.xdata[X_DMAARM as usize] &= !0x02;
            self.xdata[X_DMAIRQ as usize] |= 0x02;
        }

        fn exec(&mut self, instr: &[u8]) -> u8 {
            match *instr {
                [OP_MOV_DPTR, hi, lo] => self.dptr = u16::from_be_bytes([hi, lo]),
                [OP_MOV_A_IMM, v] => self.acc = v,
                [OP_MOVX_WRITE] => self.store(self.dptr, self.acc),
                [OP_MOVX_READ] => self.acc = self.reg(self.dptr),
                [OP_INC_DPTR] => self.dptr = self.dptr.wrapping_add(1),
                [OP_CLR_A] => self.acc = 0,
                [OP_MOVC] => {
                    let a = self.dptr as u32 + u32::from(self.acc);
                    let phys = if a >= COMMON_BANK {
                        u32::from(self.fmap) * COMMON_BANK + (a - COMMON_BANK)
                    } else {
                        a
                    };
                    self.acc = self.code[phys as usize];
                }
                [OP_MOV_DIRECT, SFR_FMAP, bank] => self.fmap = bank,
                _ => panic!("unexpected instruction {instr:02x?}"),
            }
            self.acc
        }

        fn dispatch(&mut self, f: [u8; 4]) {
            match f[0] {
                CMD_PING | CMD_ENTER => self.answer(0),
                CMD_EXIT => {
                    self.exited = true;
                    self.answer(0)
                }
                CMD_CHIP_ID => self.answer(0xA523),
                CMD_PC => self.answer(0x1234),
                CMD_STATUS => {
                    let busy = if self.erase_polls > 0 {
                        self.erase_polls -= 1;
                        DebugStatus::CHIP_ERASE_BUSY.bits()
                    } else {
                        0
                    };
                    self.answer(u16::from(busy | 0x22))
                }
                CMD_RD_CFG => self.answer(u16::from(self.config)),
                CMD_WR_CFG => {
                    self.config = f[1];
                    self.answer(0)
                }
                CMD_CHIP_ERASE => {
                    self.code.fill(0xFF);
                    self.erase_polls = 3;
                    self.answer(0)
                }
                CMD_EXEC_1 => {
                    let a = self.exec(&f[1..2]);
                    self.answer(u16::from(a))
                }
                CMD_EXEC_2 => {
                    let a = self.exec(&f[1..3]);
                    self.answer(u16::from(a))
                }
                CMD_EXEC_3 => {
                    let a = self.exec(&f[1..4]);
                    self.answer(u16::from(a))
                }
                CMD_BURST_WR => {
                    self.burst = Some((usize::from(f[1]) << 8) | usize::from(f[2]));
                    self.out.push_back(ANS_READY);
                }
                other => panic!("unexpected command 0x{other:02x}"),
            }
        }

        fn burst_payload(&mut self, data: &[u8]) {
            assert_eq!(self.config & DebugConfig::DMA_PAUSE.bits(), 0, "DMA still paused");
            assert_ne!(self.reg(X_DMAARM) & 0x01, 0, "channel 0 not armed");
            let (src, dst, len) = self.descriptor(X_DMA0CFGL);
            assert_eq!(src, X_DBGDATA);
            assert_eq!(len, data.len());
            self.xdata[dst as usize..dst as usize + len].copy_from_slice(data);
            self.xdata[X_DMAARM as usize] &= !0x01;
            self.xdata[X_DMAIRQ as usize] |= 0x01;
            self.answer(0);
        }
    }

    impl Read for SimChip {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.out.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.out.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for SimChip {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for &b in buf {
                self.frame.push(b);
                match self.burst {
                    Some(len) if self.frame.len() == len => {
                        let payload = std::mem::take(&mut self.frame);
                        self.burst = None;
                        self.burst_payload(&payload);
                    }
                    Some(_) => {}
                    None if self.frame.len() == 4 => {
                        let f = [self.frame[0], self.frame[1], self.frame[2], self.frame[3]];
                        self.frame.clear();
                        self.dispatch(f);
                    }
                    None => {}
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn open(sim: SimChip) -> CcDebugger<SimChip> {
        CcDebugger::open(sim).unwrap().with_poll_interval(Duration::ZERO)
    }

    #[test]
    fn open_reads_chip_identity() {
        let mut dbg = open(SimChip::new());
        assert_eq!(
            dbg.chip(),
            &ChipInfo { chip_id: 0xA5, revision: 0x23, name: "CC2530", flash_kb: 256, sram_kb: 8, usb: true }
        );
        assert_eq!(dbg.chip().flash_size(), 262_144);
        assert_eq!(dbg.pc().unwrap(), 0x1234);
        assert_eq!(
            dbg.ieee_address().unwrap(),
            [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );
    }

    #[test]
    fn unknown_chip_is_rejected() {
        use crate::cclib::proxy::tests::ScriptedLink;
        let mut link = ScriptedLink::default();
        link.ok(0).ok(0).ok(0x1200);
        assert!(matches!(CcDebugger::open(link), Err(CcError::UnknownChip(0x12))));
    }

    #[test]
    fn xdata_round_trip() {
        let mut dbg = open(SimChip::new());
        dbg.write_xdata(0x0100, &[9, 8, 7]).unwrap();
        assert_eq!(dbg.read_xdata(0x0100, 3).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn read_code_crosses_into_banked_flash() {
        let mut sim = SimChip::new();
        sim.code[0x7FFE..0x8002].copy_from_slice(&[1, 2, 3, 4]);
        sim.code[0x18000] = 0x5A;
        let mut dbg = open(sim);

        assert_eq!(dbg.read_code(0x7FFE, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(dbg.read_code(0x18000, 1).unwrap(), vec![0x5A]);
    }

    #[test]
    fn pause_dma_toggles_config_bit() {
        let mut dbg = open(SimChip::new());
        assert!(dbg.config().unwrap().contains(DebugConfig::DMA_PAUSE));
        dbg.pause_dma(false).unwrap();
        assert!(!dbg.config().unwrap().contains(DebugConfig::DMA_PAUSE));
        dbg.pause_dma(true).unwrap();
        assert!(dbg.config().unwrap().contains(DebugConfig::DMA_PAUSE));
    }

    #[test]
    fn chip_erase_waits_for_busy_to_clear() {
        let mut sim = SimChip::new();
        sim.code[0] = 0x00;
        let mut dbg = open(sim);
        dbg.chip_erase().unwrap();
        assert!(!dbg.status().unwrap().contains(DebugStatus::CHIP_ERASE_BUSY));
        assert_eq!(dbg.read_code(0, 1).unwrap(), vec![0xFF]);
    }

    #[test]
    fn write_code_programs_and_verifies() {
        let mut dbg = open(SimChip::new());
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        let mut seen = Vec::new();

        dbg.write_code(0x8000, &data, true, &mut |done, total| seen.push((done, total)))
            .unwrap();

        assert_eq!(seen, vec![(2048, 5000), (4096, 5000), (5000, 5000)]);
        assert_eq!(dbg.read_code(0x8000, data.len()).unwrap(), data);

        let sim = dbg.close().unwrap();
        assert!(sim.exited);
    }

    #[test]
    fn unaligned_block_lands_at_its_address() {
        let mut dbg = open(SimChip::new());
        let mut seen = Vec::new();
        dbg.write_code(0x802, &[1, 2, 3, 4], true, &mut |done, total| seen.push((done, total)))
            .unwrap();

        assert_eq!(dbg.read_code(0x800, 8).unwrap(), vec![0xFF, 0xFF, 1, 2, 3, 4, 0xFF, 0xFF]);
        assert_eq!(seen, vec![(4, 4)]);
    }

    #[test]
    fn padding_keeps_neighbouring_bytes() {
        let mut dbg = open(SimChip::new());
        dbg.write_code(0x100, &[0xA1, 0xA2, 0xA3], true, &mut |_, _| {}).unwrap();
        dbg.write_code(0x103, &[0xB1, 0xB2], true, &mut |_, _| {}).unwrap();
        assert_eq!(
            dbg.read_code(0x100, 8).unwrap(),
            vec![0xA1, 0xA2, 0xA3, 0xB1, 0xB2, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn verify_retries_then_succeeds() {
        let mut sim = SimChip::new();
        sim.flaky = 2;
        let mut dbg = open(sim);
        let data = vec![0x42; 100];
        dbg.write_code(0, &data, true, &mut |_, _| {}).unwrap();
        assert_eq!(dbg.read_code(0, 100).unwrap(), data);
    }

    #[test]
    fn verify_gives_up_after_three_retries() {
        let mut sim = SimChip::new();
        sim.flaky = 10;
        let mut dbg = open(sim);
        let err = dbg.write_code(0x800, &[0x42; 16], true, &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, CcError::VerifyFailed { addr: 0x800 }));
    }

    #[test]
    fn locked_page_aborts() {
        let mut sim = SimChip::new();
        sim.locked = true;
        let mut dbg = open(sim);
        let err = dbg.write_code(0x1000, &[1, 2, 3], false, &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, CcError::FlashLocked { page: 2 }));
    }

    #[test]
    fn descriptor_layout() {
        let ch = DmaChannel {
            src: 0x6260, dst: 0x0000, trigger: 0x1F, len: 0x0800,
            src_inc: false, dst_inc: true, priority: 1,
        };
        assert_eq!(ch.descriptor(), [0x62, 0x60, 0x00, 0x00, 0x08, 0x00, 0x1F, 0x19]);
    }
}
