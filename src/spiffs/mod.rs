// ─────────────────────────────────────────────────────────────────────────────
//  z2mflasher_core :: spiffs  —  SPIFFS image builder
//
//  Produces an image that a device-side SPIFFS mounts as-is: the whole
//  region is laid out in memory, block by block, and returned in one piece.
//
//  Block layout:
//
//      ┌──────────────┬────────┬────────┬─────┬────────┐
//      │ lookup page  │ page 0 │ page 1 │ ... │ page N │   N = usable - 1
//      └──────────────┴────────┴────────┴─────┴────────┘
//
//  The lookup page holds one object id per usable page (index pages flagged
//  with the id's top bit) and, near its end, the block magic. Files are
//  placed in the order they were added: an index page, then data pages, with
//  continuation index pages once the first one runs out of entries.
// ─────────────────────────────────────────────────────────────────────────────

pub mod config;
pub mod page;
pub mod reader;

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

pub use config::{BuildConfig, ByteOrder};
pub use page::{DataPage, IndexPage, ObjectHeader, Page};
pub use reader::{SpiffsFile, SpiffsImage};

use config::width_mask;
use page::OBJ_TYPE_FILE;

/// One file waiting to be laid out.
#[derive(Debug, Clone)]
struct ObjectEntry {
    path:     String,
    contents: Vec<u8>,
}

#[derive(Debug)]
pub struct SpiffsBuilder {
    image_size: usize,
    config:     BuildConfig,
    objects:    Vec<ObjectEntry>,
    paths:      HashSet<String>,
}

impl SpiffsBuilder {
    pub fn new(image_size: usize, config: BuildConfig) -> Result<Self> {
        config.validate()?;

        if image_size == 0 || image_size % config.block_size != 0 {
            return Err(Error::InvalidConfig(format!(
                "image size {} is not a multiple of block size {}",
                image_size, config.block_size
            )));
        }
        let block_count = image_size / config.block_size;
        if block_count <= config.reserved_blocks {
            return Err(Error::InvalidConfig(format!(
                "all {} blocks are reserved", block_count
            )));
        }
        if (image_size / config.page_size - 1) as u64 > width_mask(config.page_index_len) {
            return Err(Error::InvalidConfig(format!(
                "{} pages do not fit a {}-byte page index",
                image_size / config.page_size, config.page_index_len
            )));
        }
        if (block_count - 1) as u64 > width_mask(config.block_index_len) {
            return Err(Error::InvalidConfig(format!(
                "{} blocks do not fit a {}-byte block index",
                block_count, config.block_index_len
            )));
        }

        Ok(Self { image_size, config, objects: Vec::new(), paths: HashSet::new() })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Virtual paths added so far, in insertion order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|o| o.path.as_str())
    }

    /// Queue the content of `source` under `virtual_path`.
    pub fn add_file(&mut self, virtual_path: &str, source: impl AsRef<Path>) -> Result<()> {
        self.check_path(virtual_path)?;
        let source = source.as_ref();
        let contents = std::fs::read(source).map_err(|e| Error::io(source, e))?;
        self.push(virtual_path, contents);
        Ok(())
    }

    /// Queue in-memory content under `virtual_path`.
    pub fn add_bytes(&mut self, virtual_path: &str, contents: impl Into<Vec<u8>>) -> Result<()> {
        self.check_path(virtual_path)?;
        self.push(virtual_path, contents.into());
        Ok(())
    }

    /// Queue every regular file below `root` as `/<relative path>`.
    ///
    /// Entries are visited in file-name order so the image does not depend on
    /// the host filesystem's directory order.
    pub fn add_dir(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                Error::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let virtual_path = virtual_path(rel);
            debug!(source = %entry.path().display(), %virtual_path, "adding file");
            self.add_file(&virtual_path, entry.path())?;
        }
        Ok(())
    }

    fn check_path(&self, virtual_path: &str) -> Result<()> {
        let len = virtual_path.len();
        if len > self.config.object_name_max_len {
            return Err(Error::PathTooLong {
                path: virtual_path.to_owned(),
                len,
                max: self.config.object_name_max_len,
            });
        }
        if self.paths.contains(virtual_path) {
            return Err(Error::DuplicatePath(virtual_path.to_owned()));
        }
        Ok(())
    }

    fn push(&mut self, path: &str, contents: Vec<u8>) {
        self.paths.insert(path.to_owned());
        self.objects.push(ObjectEntry { path: path.to_owned(), contents });
    }

    /// Lay out every queued object and return the complete image.
    pub fn finalize(self) -> Result<Vec<u8>> {
        let block_count = self.image_size / self.config.block_size;
        let mut layout = Layout::new(&self.config, block_count - self.config.reserved_blocks);

        for (i, obj) in self.objects.iter().enumerate() {
            let obj_id = i as u64 + 1;
            if obj_id >= self.config.index_id_flag() {
                return Err(Error::InvalidConfig(format!(
                    "more objects than a {}-byte object id can number",
                    self.config.object_id_len
                )));
            }
            layout.place(obj_id, obj)?;
        }

        debug!(
            objects = self.objects.len(),
            blocks_used = layout.blocks.len(),
            block_count,
            "layout complete"
        );
        Ok(layout.serialize(self.image_size, block_count))
    }
}

/// `dir/sub/file.txt` → `/dir/sub/file.txt`, whatever the host separator.
pub fn virtual_path(rel: &Path) -> String {
    let mut out = String::new();
    for part in rel.components() {
        out.push('/');
        out.push_str(&part.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
//  Page allocation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Slot {
    block: usize,
    page:  usize,
}

struct Layout<'a> {
    cfg:         &'a BuildConfig,
    /// Usable pages of each opened block, in allocation order.
    blocks:      Vec<Vec<Page>>,
    block_limit: usize,
}

impl<'a> Layout<'a> {
    fn new(cfg: &'a BuildConfig, block_limit: usize) -> Self {
        Self { cfg, blocks: Vec::new(), block_limit }
    }

    /// Free usable pages in the current block.
    fn remaining(&self) -> usize {
        self.blocks
            .last()
            .map(|b| self.cfg.usable_pages_per_block() - b.len())
            .unwrap_or(0)
    }

    fn open_block(&mut self, path: &str) -> Result<()> {
        if self.blocks.len() >= self.block_limit {
            return Err(Error::InsufficientSpace {
                path:       path.to_owned(),
                blocks:     self.block_limit,
                block_size: self.cfg.block_size,
            });
        }
        debug!(block = self.blocks.len(), "opening block");
        self.blocks.push(Vec::with_capacity(self.cfg.usable_pages_per_block()));
        Ok(())
    }

    fn push(&mut self, page: Page) -> Slot {
        let block = self.blocks.len() - 1;
        let pages = &mut self.blocks[block];
        pages.push(page);
        Slot { block, page: pages.len() - 1 }
    }

    fn absolute_page(&self, slot: Slot) -> u64 {
        (slot.block * self.cfg.pages_per_block() + self.cfg.lookup_pages_per_block() + slot.page) as u64
    }

    fn index_page_mut(&mut self, slot: Slot) -> &mut IndexPage {
        match &mut self.blocks[slot.block][slot.page] {
            Page::ObjectIndex(p) => p,
            other => unreachable!("slot {slot:?} holds {other:?}, not an index page"),
        }
    }

    fn place(&mut self, obj_id: u64, obj: &ObjectEntry) -> Result<()> {
        let cfg = self.cfg;
        let size = u32::try_from(obj.contents.len()).map_err(|_| Error::InsufficientSpace {
            path:       obj.path.clone(),
            blocks:     self.block_limit,
            block_size: cfg.block_size,
        })?;

        // The index page may take the last page of a block; data follows in
        // the next one.
        if self.remaining() == 0 {
            self.open_block(&obj.path)?;
        }
        let mut index = self.push(Page::ObjectIndex(IndexPage {
            obj_id,
            span_ix: 0,
            header:  Some(ObjectHeader { size, obj_type: OBJ_TYPE_FILE, name: obj.path.clone() }),
            pages:   Vec::new(),
        }));
        let mut index_span = 1u64;
        let mut index_room = cfg.index_entries_head();
        let mut data_span  = 0u64;

        for chunk in obj.contents.chunks(cfg.data_content_len()) {
            loop {
                if self.remaining() == 0 {
                    self.open_block(&obj.path)?;
                    continue;
                }
                if index_room == 0 {
                    index = self.push(Page::ObjectIndex(IndexPage {
                        obj_id,
                        span_ix: index_span,
                        header:  None,
                        pages:   Vec::new(),
                    }));
                    index_span += 1;
                    index_room = cfg.index_entries_cont();
                    continue;
                }

                if data_span > width_mask(cfg.span_index_len) {
                    return Err(Error::InvalidConfig(format!(
                        "'{}' needs more data pages than a {}-byte span index can number",
                        obj.path, cfg.span_index_len
                    )));
                }
                let at = self.push(Page::ObjectData(DataPage {
                    obj_id,
                    span_ix:  data_span,
                    contents: chunk.to_vec(),
                }));
                let page_no = self.absolute_page(at);
                self.index_page_mut(index).pages.push(page_no);
                index_room -= 1;
                data_span += 1;
                break;
            }
        }

        debug!(path = %obj.path, obj_id, size, data_pages = data_span, "object placed");
        Ok(())
    }

    fn serialize(&self, image_size: usize, block_count: usize) -> Vec<u8> {
        let cfg = self.cfg;
        let mut image = vec![page::ERASED; image_size];

        for bix in 0..block_count {
            let pages = match self.blocks.get(bix) {
                Some(pages) => pages.as_slice(),
                None if cfg.use_magic => &[],
                None => continue,
            };
            let block = &mut image[bix * cfg.block_size..(bix + 1) * cfg.block_size];
            write_block(cfg, block, pages, block_count, bix);
        }
        image
    }
}

fn write_block(cfg: &BuildConfig, block: &mut [u8], pages: &[Page], block_count: usize, bix: usize) {
    let id_len   = cfg.object_id_len;
    let per_page = cfg.lookup_entries_per_page();
    let lookup   = cfg.lookup_pages_per_block();

    for (i, page) in pages.iter().enumerate() {
        let at = (i / per_page) * cfg.page_size + (i % per_page) * id_len;
        cfg.byte_order.put(&mut block[at..], page.lookup_entry(cfg), id_len);
    }

    if cfg.use_magic {
        // The magic takes the second-to-last entry of the last lookup page,
        // provided that page still has two entries to spare.
        let in_last = pages.len().saturating_sub((lookup - 1) * per_page);
        if per_page - in_last >= 2 {
            let at = (lookup - 1) * cfg.page_size + (per_page - 2) * id_len;
            cfg.byte_order.put(&mut block[at..], cfg.magic(block_count, bix), id_len);
        }
    }

    for (i, page) in pages.iter().enumerate() {
        let start = (lookup + i) * cfg.page_size;
        page.encode(cfg, &mut block[start..start + cfg.page_size]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const IMAGE_SIZE: usize = 110_592;

    fn builder() -> SpiffsBuilder {
        SpiffsBuilder::new(IMAGE_SIZE, BuildConfig::default()).unwrap()
    }

    #[test]
    fn config_json_scenario() {
        let contents: Vec<u8> = (0..120u8).collect();
        let mut b = builder();
        b.add_bytes("/config.json", contents.clone()).unwrap();
        let image = b.finalize().unwrap();
        assert_eq!(image.len(), IMAGE_SIZE);

        // Lookup page of block 0: index entry, data entry, then erased.
        assert_eq!(&image[0..4], &[0x01, 0x80, 0x01, 0x00]);
        assert!(image[4..252].iter().all(|&b| b == 0xFF));
        assert_eq!(&image[252..254], &[0x29, 0x04]);
        assert_eq!(&image[254..256], &[0xFF, 0xFF]);

        // Index page (page 1) references data page 2.
        let index = &image[256..512];
        assert_eq!(index[4], 0xF8);
        assert_eq!(&index[46..48], &[0x02, 0x00]);
        assert!(index[48..].iter().all(|&b| b == 0xFF));

        // Data page (page 2) holds the 120 bytes.
        let data = &image[512..768];
        assert_eq!(&data[..5], &[0x01, 0x00, 0x00, 0x00, 0xFC]);
        assert_eq!(&data[5..125], contents.as_slice());
        assert!(data[125..].iter().all(|&b| b == 0xFF));

        // Remaining pages of block 0 are erased.
        assert!(image[768..4096].iter().all(|&b| b == 0xFF));

        // Every other block is formatted: erased lookup with magic only.
        for bix in 1..IMAGE_SIZE / 4096 {
            let block = &image[bix * 4096..(bix + 1) * 4096];
            assert_eq!(&block[252..254], &[0x29, 0x04], "block {bix}");
            assert!(block[..252].iter().all(|&b| b == 0xFF));
            assert!(block[256..].iter().all(|&b| b == 0xFF));
        }
    }

    #[test]
    fn empty_file_gets_index_page_only() {
        let mut b = builder();
        b.add_bytes("/empty", Vec::new()).unwrap();
        b.add_bytes("/next", b"x".to_vec()).unwrap();
        let image = b.finalize().unwrap();

        // /empty: index page 1; /next: index page 2, data page 3.
        assert_eq!(&image[0..6], &[0x01, 0x80, 0x02, 0x80, 0x02, 0x00]);
        assert!(image[256 + 46..512].iter().all(|&b| b == 0xFF));
        assert_eq!(&image[512 + 46..512 + 48], &[0x03, 0x00]);
    }

    #[test]
    fn object_index_may_take_last_page_of_block() {
        let cfg = BuildConfig::default();
        let mut b = SpiffsBuilder::new(3 * 4096, cfg.clone()).unwrap();
        // index + 13 data pages leaves one page free in block 0.
        b.add_bytes("/a", vec![0xAA; 13 * cfg.data_content_len()]).unwrap();
        b.add_bytes("/b", b"b".to_vec()).unwrap();
        let image = b.finalize().unwrap();

        // /b's index page is the last page of block 0, its data opens block 1.
        assert_eq!(&image[28..30], &[0x02, 0x80]);
        assert_eq!(&image[4096..4098], &[0x02, 0x00]);
        // Index page (absolute page 15) points at absolute page 17.
        assert_eq!(&image[15 * 256 + 46..15 * 256 + 48], &[0x11, 0x00]);
    }

    #[test]
    fn continuation_index_may_take_last_page_of_block() {
        let cfg = BuildConfig::default();
        let head = cfg.index_entries_head();
        let usable = cfg.usable_pages_per_block();
        // index + `head` data pages, sized so the head index runs out of
        // slots exactly when one page is left in the current block.
        let blocks_before = (1 + head + 1).div_ceil(usable);
        let pages_before = 1 + head;
        let filler = blocks_before * usable - pages_before - 1;
        assert!(filler >= 2);

        let mut b = SpiffsBuilder::new((blocks_before + 1) * 4096, cfg.clone()).unwrap();
        b.add_bytes("/pad", vec![0x11; (filler - 1) * cfg.data_content_len()]).unwrap();
        b.add_bytes("/big", vec![0x5A; (head + 1) * cfg.data_content_len()]).unwrap();
        let image = b.finalize().unwrap();

        let files = SpiffsImage::parse(&image, cfg).unwrap().files().unwrap();
        assert_eq!(files[1].contents.len(), (head + 1) * 251);
        // Continuation index sits on the last page of the block before.
        let last = (blocks_before - 1) * 4096 + (usable - 1) * 2;
        assert_eq!(&image[last..last + 2], &[0x02, 0x80]);
    }

    #[test]
    fn large_file_spills_into_continuation_index() {
        let cfg = BuildConfig::default();
        let head = cfg.index_entries_head();
        let mut b = SpiffsBuilder::new(16 * 4096, cfg.clone()).unwrap();
        b.add_bytes("/big", vec![0x5A; (head + 1) * cfg.data_content_len()]).unwrap();
        let image = b.finalize().unwrap();

        let parsed = SpiffsImage::parse(&image, cfg).unwrap();
        let index_spans: Vec<u64> = parsed
            .pages()
            .filter_map(|(_, p)| match p {
                Page::ObjectIndex(ix) => Some(ix.span_ix),
                _ => None,
            })
            .collect();
        assert_eq!(index_spans, vec![0, 1]);
    }

    #[test]
    fn reserved_blocks_are_not_allocated() {
        let cfg = BuildConfig { reserved_blocks: 1, ..Default::default() };
        let mut b = SpiffsBuilder::new(2 * 4096, cfg.clone()).unwrap();
        b.add_bytes("/fits", vec![0; 14 * cfg.data_content_len()]).unwrap();
        assert!(b.finalize().is_ok());

        let mut b = SpiffsBuilder::new(2 * 4096, cfg.clone()).unwrap();
        b.add_bytes("/spills", vec![0; 14 * cfg.data_content_len() + 1]).unwrap();
        assert!(matches!(b.finalize(), Err(Error::InsufficientSpace { .. })));
    }

    #[test]
    fn no_magic_leaves_untouched_blocks_erased() {
        let cfg = BuildConfig { use_magic: false, ..Default::default() };
        let mut b = SpiffsBuilder::new(2 * 4096, cfg).unwrap();
        b.add_bytes("/x", b"x".to_vec()).unwrap();
        let image = b.finalize().unwrap();
        assert!(image[252..256].iter().all(|&b| b == 0xFF));
        assert!(image[4096..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn image_size_must_be_block_multiple() {
        assert!(matches!(
            SpiffsBuilder::new(4096 * 2 + 256, BuildConfig::default()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn virtual_path_uses_forward_slashes() {
        let rel = Path::new("sub").join("dir").join("file.txt");
        assert_eq!(virtual_path(&rel), "/sub/dir/file.txt");
    }
}
