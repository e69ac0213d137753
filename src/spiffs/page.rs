// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: spiffs :: page  —  on-flash page encoding
//
//  Every usable page starts with the same header:
//
//      obj_id (object_id_len) | span_ix (span_index_len) | flags (u8)
//
//  Flag bits are active-low, so a freshly erased page reads 0xFF:
//
//      0x01 USED   0x02 FINAL   0x04 INDEX   0x40 IXDELE   0x80 DELET
//
//  Object index pages set the top bit of obj_id. The first index page of an
//  object (span 0) carries size, type and name; every index page then lists
//  the absolute page numbers of its data pages.
// ─────────────────────────────────────────────────────────────────────────────

use crate::error::{Error, Result};
use crate::spiffs::config::{BuildConfig, INDEX_SIZE_LEN, INDEX_TYPE_LEN};

pub const FLAG_USED:   u8 = 0x01;
pub const FLAG_FINAL:  u8 = 0x02;
pub const FLAG_INDEX:  u8 = 0x04;
pub const FLAG_IXDELE: u8 = 0x40;
pub const FLAG_DELET:  u8 = 0x80;

/// Flags of a finalized object index page.
pub const FLAGS_INDEX_FINAL: u8 = 0xFF & !(FLAG_USED | FLAG_FINAL | FLAG_INDEX);
/// Flags of a finalized data page.
pub const FLAGS_DATA_FINAL:  u8 = 0xFF & !(FLAG_USED | FLAG_FINAL);

pub const OBJ_TYPE_FILE: u8 = 1;

pub const ERASED: u8 = 0xFF;

/// Name, size and type stored in the first index page of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    pub size:     u32,
    pub obj_type: u8,
    pub name:     String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPage {
    /// Object id without the index flag.
    pub obj_id:  u64,
    pub span_ix: u64,
    /// Present on span 0 only.
    pub header:  Option<ObjectHeader>,
    /// Absolute page numbers of the data pages this index page covers.
    pub pages:   Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPage {
    pub obj_id:   u64,
    pub span_ix:  u64,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Free,
    ObjectIndex(IndexPage),
    ObjectData(DataPage),
    Deleted,
}

impl Page {
    /// The object lookup entry describing this page.
    pub fn lookup_entry(&self, cfg: &BuildConfig) -> u64 {
        match self {
            Page::Free           => cfg.erased_id(),
            Page::Deleted        => 0,
            Page::ObjectIndex(p) => p.obj_id | cfg.index_id_flag(),
            Page::ObjectData(p)  => p.obj_id,
        }
    }

    /// Serialize into `out`, which must be exactly one page long.
    pub fn encode(&self, cfg: &BuildConfig, out: &mut [u8]) {
        debug_assert_eq!(out.len(), cfg.page_size);
        out.fill(ERASED);

        match self {
            Page::Free => {}
            Page::Deleted => {
                out[..cfg.data_header_len()].fill(0);
            }
            Page::ObjectIndex(p) => {
                let id = p.obj_id | cfg.index_id_flag();
                let mut pos = put_header(cfg, out, id, p.span_ix, FLAGS_INDEX_FINAL);
                pos += cfg.index_header_pad();

                if let Some(h) = &p.header {
                    cfg.byte_order.put(&mut out[pos..], h.size as u64, INDEX_SIZE_LEN);
                    pos += INDEX_SIZE_LEN;
                    out[pos] = h.obj_type;
                    pos += INDEX_TYPE_LEN;

                    let name_field = &mut out[pos..pos + cfg.object_name_max_len + cfg.meta_len];
                    name_field.fill(0);
                    name_field[..h.name.len()].copy_from_slice(h.name.as_bytes());
                    pos += cfg.object_name_max_len + cfg.meta_len;
                }

                for &page in &p.pages {
                    cfg.byte_order.put(&mut out[pos..], page, cfg.page_index_len);
                    pos += cfg.page_index_len;
                }
            }
            Page::ObjectData(p) => {
                let pos = put_header(cfg, out, p.obj_id, p.span_ix, FLAGS_DATA_FINAL);
                out[pos..pos + p.contents.len()].copy_from_slice(&p.contents);
            }
        }
    }

    /// Parse one page given its lookup entry.
    ///
    /// Data pages keep their full payload area; the owning object's size
    /// decides how much of it is file content.
    pub fn decode(cfg: &BuildConfig, entry: u64, bytes: &[u8]) -> Result<Page> {
        let hdr_len = cfg.data_header_len();
        let flags = bytes[hdr_len - 1];

        if entry == cfg.erased_id() {
            if flags != ERASED {
                return Err(Error::Corrupt(format!(
                    "page marked free in lookup but has flags 0x{flags:02x}"
                )));
            }
            return Ok(Page::Free);
        }
        if entry == 0 || flags & FLAG_DELET == 0 {
            return Ok(Page::Deleted);
        }
        if flags & FLAG_USED != 0 {
            return Err(Error::Corrupt(format!(
                "lookup entry 0x{entry:x} points at an unused page"
            )));
        }

        let raw_id  = cfg.byte_order.get(bytes, cfg.object_id_len);
        let span_ix = cfg.byte_order.get(&bytes[cfg.object_id_len..], cfg.span_index_len);
        if raw_id != entry {
            return Err(Error::Corrupt(format!(
                "lookup entry 0x{entry:x} disagrees with page header id 0x{raw_id:x}"
            )));
        }

        let flagged = raw_id & cfg.index_id_flag() != 0;
        let is_index = flags & FLAG_INDEX == 0;
        if flagged != is_index {
            return Err(Error::Corrupt(format!(
                "object 0x{raw_id:x} has index flag {flagged} but page flags 0x{flags:02x}"
            )));
        }

        if !is_index {
            return Ok(Page::ObjectData(DataPage {
                obj_id:   raw_id,
                span_ix,
                contents: bytes[hdr_len..].to_vec(),
            }));
        }

        let mut pos = hdr_len + cfg.index_header_pad();
        let header = if span_ix == 0 {
            let size = cfg.byte_order.get(&bytes[pos..], INDEX_SIZE_LEN) as u32;
            pos += INDEX_SIZE_LEN;
            let obj_type = bytes[pos];
            pos += INDEX_TYPE_LEN;

            let field = &bytes[pos..pos + cfg.object_name_max_len];
            let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            let name = String::from_utf8(field[..end].to_vec())
                .map_err(|_| Error::Corrupt(format!("object 0x{raw_id:x} has a non UTF-8 name")))?;
            pos += cfg.object_name_max_len + cfg.meta_len;

            Some(ObjectHeader { size, obj_type, name })
        } else {
            None
        };

        let erased_ix = crate::spiffs::config::width_mask(cfg.page_index_len);
        let mut pages = Vec::new();
        while pos + cfg.page_index_len <= bytes.len() {
            let page = cfg.byte_order.get(&bytes[pos..], cfg.page_index_len);
            if page == erased_ix {
                break;
            }
            pages.push(page);
            pos += cfg.page_index_len;
        }

        Ok(Page::ObjectIndex(IndexPage {
            obj_id: raw_id & !cfg.index_id_flag(),
            span_ix,
            header,
            pages,
        }))
    }
}

fn put_header(cfg: &BuildConfig, out: &mut [u8], obj_id: u64, span_ix: u64, flags: u8) -> usize {
    cfg.byte_order.put(out, obj_id, cfg.object_id_len);
    cfg.byte_order.put(&mut out[cfg.object_id_len..], span_ix, cfg.span_index_len);
    let flags_at = cfg.object_id_len + cfg.span_index_len;
    out[flags_at] = flags;
    flags_at + 1
}
