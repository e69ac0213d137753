// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: cclib :: hex  —  Intel HEX firmware loader
//
//  Record layout (after the leading ':'):
//
//      count (u8) | addr (u16 BE) | type (u8) | data (count) | checksum (u8)
//
//  Types 00 data, 01 end of file, 02 extended segment address, 03 start
//  segment address, 04 extended linear address, 05 start linear address.
//  Adjacent data records are merged into contiguous memory blocks.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::Path;

use super::{CcError, Result};

const REC_DATA:        u8 = 0x00;
const REC_EOF:         u8 = 0x01;
const REC_EXT_SEGMENT: u8 = 0x02;
const REC_START_SEG:   u8 = 0x03;
const REC_EXT_LINEAR:  u8 = 0x04;
const REC_START_LIN:   u8 = 0x05;

/// A contiguous run of firmware bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemBlock {
    pub addr:  u32,
    pub bytes: Vec<u8>,
}

impl MemBlock {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// One past the last address of the block.
    pub fn end(&self) -> u32 {
        self.addr + self.bytes.len() as u32
    }
}

pub fn load(path: &Path) -> Result<Vec<MemBlock>> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| CcError::Firmware { path: path.to_path_buf(), source })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<Vec<MemBlock>> {
    let mut base: u32 = 0;
    let mut segments: Vec<MemBlock> = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let bad = |reason: &str| CcError::Hex { line: line_no, reason: reason.to_string() };

        let body = line.strip_prefix(':').ok_or_else(|| bad("record does not start with ':'"))?;
        let rec = ::hex::decode(body).map_err(|e| bad(&e.to_string()))?;
        if rec.len() < 5 {
            return Err(bad("record too short"));
        }
        let count = rec[0] as usize;
        if rec.len() != count + 5 {
            return Err(bad(&format!("byte count {count} does not match record length")));
        }
        if rec.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) != 0 {
            return Err(bad("checksum mismatch"));
        }

        let offset = u32::from(u16::from_be_bytes([rec[1], rec[2]]));
        let data = &rec[4..4 + count];

        match rec[3] {
            REC_DATA => {
                let addr = base + offset;
                match segments.last_mut() {
                    Some(last) if last.end() == addr => last.bytes.extend_from_slice(data),
                    _ => segments.push(MemBlock { addr, bytes: data.to_vec() }),
                }
            }
            REC_EOF => break,
            REC_EXT_SEGMENT if count == 2 => {
                base = u32::from(u16::from_be_bytes([data[0], data[1]])) << 4;
            }
            REC_EXT_LINEAR if count == 2 => {
                base = u32::from(u16::from_be_bytes([data[0], data[1]])) << 16;
            }
            REC_START_SEG | REC_START_LIN => {}
            other => return Err(bad(&format!("unsupported record type 0x{other:02x}"))),
        }
    }

    merge(segments)
}

/// Sort by address and join touching blocks; overlapping data is an error.
fn merge(mut segments: Vec<MemBlock>) -> Result<Vec<MemBlock>> {
    segments.sort_by_key(|b| b.addr);
    let mut out: Vec<MemBlock> = Vec::with_capacity(segments.len());
    for seg in segments {
        match out.last_mut() {
            Some(last) if seg.addr < last.end() => {
                return Err(CcError::Hex {
                    line:   0,
                    reason: format!("data at 0x{:05x} overlaps block ending at 0x{:05x}", seg.addr, last.end()),
                });
            }
            Some(last) if seg.addr == last.end() => last.bytes.extend(seg.bytes),
            _ => out.push(seg),
        }
    }
    Ok(out)
}
