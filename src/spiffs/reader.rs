// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: spiffs :: reader  —  parse an image back into files
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::spiffs::config::BuildConfig;
use crate::spiffs::page::{ObjectHeader, Page};

/// A file recovered from an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiffsFile {
    pub path:     String,
    pub contents: Vec<u8>,
}

/// Page counts by kind, across the whole image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageUsage {
    pub free:    usize,
    pub index:   usize,
    pub data:    usize,
    pub deleted: usize,
}

#[derive(Debug)]
pub struct SpiffsImage {
    config:      BuildConfig,
    block_count: usize,
    /// Usable pages of every block, with their absolute page number.
    pages:       Vec<(u64, Page)>,
    /// Raw lookup entries of each block (all entries, magic slot included).
    lookups:     Vec<Vec<u64>>,
}

impl SpiffsImage {
    pub fn parse(bytes: &[u8], config: BuildConfig) -> Result<Self> {
        config.validate()?;
        if bytes.is_empty() || bytes.len() % config.block_size != 0 {
            return Err(Error::Corrupt(format!(
                "image of {} bytes is not a whole number of {}-byte blocks",
                bytes.len(), config.block_size
            )));
        }

        let block_count = bytes.len() / config.block_size;
        let lookup_pages = config.lookup_pages_per_block();
        let entries = lookup_pages * config.lookup_entries_per_page();

        let mut pages = Vec::with_capacity(block_count * config.usable_pages_per_block());
        let mut lookups = Vec::with_capacity(block_count);

        for (bix, block) in bytes.chunks_exact(config.block_size).enumerate() {
            let lookup: Vec<u64> = (0..entries)
                .map(|i| config.byte_order.get(&block[i * config.object_id_len..], config.object_id_len))
                .collect();

            for slot in 0..config.usable_pages_per_block() {
                let start = (lookup_pages + slot) * config.page_size;
                let raw = &block[start..start + config.page_size];
                let page = Page::decode(&config, lookup[slot], raw).map_err(|e| match e {
                    Error::Corrupt(msg) => Error::Corrupt(format!("block {bix} page {slot}: {msg}")),
                    other => other,
                })?;
                let page_no = (bix * config.pages_per_block() + lookup_pages + slot) as u64;
                pages.push((page_no, page));
            }
            lookups.push(lookup);
        }

        Ok(Self { config, block_count, pages, lookups })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Every usable page with its absolute page number.
    pub fn pages(&self) -> impl Iterator<Item = (u64, &Page)> {
        self.pages.iter().map(|(n, p)| (*n, p))
    }

    pub fn usage(&self) -> PageUsage {
        let mut usage = PageUsage::default();
        for (_, page) in &self.pages {
            match page {
                Page::Free           => usage.free += 1,
                Page::ObjectIndex(_) => usage.index += 1,
                Page::ObjectData(_)  => usage.data += 1,
                Page::Deleted        => usage.deleted += 1,
            }
        }
        usage
    }

    /// Check the block magic of every block.
    pub fn check_magic(&self) -> Result<()> {
        if !self.config.use_magic {
            return Ok(());
        }
        let per_page = self.config.lookup_entries_per_page();
        let last_page_start = (self.config.lookup_pages_per_block() - 1) * per_page;
        let used_in_last = self
            .config
            .usable_pages_per_block()
            .saturating_sub(last_page_start);
        if per_page - used_in_last < 2 {
            return Ok(());
        }

        for (bix, lookup) in self.lookups.iter().enumerate() {
            let found = lookup[last_page_start + per_page - 2];
            let expected = self.config.magic(self.block_count, bix);
            if found != expected {
                return Err(Error::Corrupt(format!(
                    "block {bix} magic is 0x{found:x}, expected 0x{expected:x}"
                )));
            }
        }
        Ok(())
    }

    /// Reassemble every live object, ordered by object id.
    pub fn files(&self) -> Result<Vec<SpiffsFile>> {
        let mut headers: BTreeMap<u64, &ObjectHeader> = BTreeMap::new();
        let mut chunks: BTreeMap<u64, BTreeMap<u64, &[u8]>> = BTreeMap::new();

        for (_, page) in &self.pages {
            match page {
                Page::ObjectIndex(ix) => {
                    if let Some(h) = &ix.header {
                        headers.insert(ix.obj_id, h);
                    }
                }
                Page::ObjectData(d) => {
                    chunks.entry(d.obj_id).or_default().insert(d.span_ix, d.contents.as_slice());
                }
                Page::Free | Page::Deleted => {}
            }
        }

        let mut files = Vec::with_capacity(headers.len());
        for (obj_id, header) in headers {
            let size = header.size as usize;
            let mut contents = Vec::with_capacity(size);
            let spans = chunks.remove(&obj_id).unwrap_or_default();

            for (expected, (span, chunk)) in spans.into_iter().enumerate() {
                if contents.len() >= size {
                    break;
                }
                if span != expected as u64 {
                    return Err(Error::Corrupt(format!(
                        "'{}' is missing data span {expected}", header.name
                    )));
                }
                let take = (size - contents.len()).min(chunk.len());
                contents.extend_from_slice(&chunk[..take]);
            }

            if contents.len() != size {
                return Err(Error::Corrupt(format!(
                    "'{}' holds {} of {} bytes", header.name, contents.len(), size
                )));
            }
            files.push(SpiffsFile { path: header.name.clone(), contents });
        }
        Ok(files)
    }
}
