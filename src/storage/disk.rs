use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::meta::{DirEntry, TableMeta};
use super::options::TableOptions;
use super::table::{check_entries, check_span, TableAccess};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::pager::{BlockCache, CacheStats};
use crate::types::{ArborError, BlockId, Result};

/// Name of the block file inside a table directory.
pub const DATA_FILE: &str = "table.dat";
/// Name of the metadata file inside a table directory.
pub const META_FILE: &str = "table.meta";

/// Record table stored in fixed-size blocks.
///
/// The directory maps each used block to the pre of its first record. Blocks
/// fill up to the configured fill limit when they are created so later inserts
/// usually shift records inside one block only. Blocks that become empty are
/// reused, lowest id first; partially filled neighbors are never merged.
pub struct DiskTable {
    dir: PathBuf,
    options: TableOptions,
    cache: Mutex<BlockCache>,
    directory: Vec<DirEntry>,
    free: BTreeSet<u32>,
    total_blocks: u32,
    len: usize,
    last_id: u32,
    meta_dirty: bool,
    closed: bool,
}

impl DiskTable {
    /// Creates an empty table in `dir`, creating the directory if needed.
    pub fn create(dir: impl AsRef<Path>, options: TableOptions) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        if dir.join(META_FILE).exists() {
            return Err(ArborError::Invalid("table already exists"));
        }
        let io = StdFileIo::open(dir.join(DATA_FILE))?;
        io.truncate(0)?;
        let cache = BlockCache::new(
            Arc::new(io),
            options.block_size as usize,
            options.cache_blocks,
        )?;
        let mut table = Self {
            dir,
            options,
            cache: Mutex::new(cache),
            directory: Vec::new(),
            free: BTreeSet::new(),
            total_blocks: 0,
            len: 0,
            last_id: 0,
            meta_dirty: true,
            closed: false,
        };
        table.write_meta()?;
        info!(
            path = %table.dir.display(),
            block_size = table.options.block_size,
            record_power = table.options.record_power,
            "disk.create"
        );
        Ok(table)
    }

    /// Opens an existing table.
    ///
    /// The persisted geometry wins over `options`; only `cache_blocks` is
    /// taken from the caller.
    pub fn open(dir: impl AsRef<Path>, options: TableOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = TableMeta::read_from(&dir.join(META_FILE))?;
        let options = TableOptions {
            block_size: meta.block_size,
            record_power: meta.record_power,
            fill_factor: f64::from(meta.fill_permille) / 1000.0,
            cache_blocks: options.cache_blocks,
        };
        options
            .validate()
            .map_err(|_| ArborError::Corruption("table meta has invalid geometry"))?;
        let len = usize::try_from(meta.len)
            .map_err(|_| ArborError::Corruption("record count out of range"))?;

        let io = StdFileIo::open(dir.join(DATA_FILE))?;
        meta.validate(io.len()?)?;
        let used: BTreeSet<u32> = meta.directory.iter().map(|e| e.block.0).collect();
        let free = (0..meta.total_blocks)
            .filter(|b| !used.contains(b))
            .collect();
        let cache = BlockCache::new(
            Arc::new(io),
            options.block_size as usize,
            options.cache_blocks,
        )?;
        info!(
            path = %dir.display(),
            records = len,
            blocks = meta.directory.len(),
            "disk.open"
        );
        Ok(Self {
            dir,
            options,
            cache: Mutex::new(cache),
            directory: meta.directory,
            free,
            total_blocks: meta.total_blocks,
            len,
            last_id: meta.last_id,
            meta_dirty: false,
            closed: false,
        })
    }

    /// Directory holding the table files.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Effective options, including the persisted geometry.
    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    /// Number of blocks currently holding records.
    pub fn block_count(&self) -> usize {
        self.directory.len()
    }

    /// Number of blocks ever allocated in the data file.
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Number of allocated blocks available for reuse.
    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Records held by each used block, in pre order.
    pub fn occupancies(&self) -> Vec<usize> {
        (0..self.directory.len()).map(|i| self.occupancy(i)).collect()
    }

    /// Block cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ArborError::Closed)
        } else {
            Ok(())
        }
    }

    /// Index of the directory entry whose block holds `pre`.
    fn locate(&self, pre: usize) -> usize {
        self.directory
            .partition_point(|entry| entry.first_pre <= pre)
            .saturating_sub(1)
    }

    fn occupancy(&self, index: usize) -> usize {
        let end = match self.directory.get(index + 1) {
            Some(next) => next.first_pre,
            None => self.len,
        };
        end - self.directory[index].first_pre
    }

    fn allocate_block(&mut self) -> Result<BlockId> {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = self.total_blocks;
                self.total_blocks = self
                    .total_blocks
                    .checked_add(1)
                    .ok_or(ArborError::Invalid("block id space exhausted"))?;
                id
            }
        };
        let block = BlockId(id);
        self.cache.get_mut().allocate(block)?;
        debug!(block = id, "disk.allocate_block");
        Ok(block)
    }

    fn release_block(&mut self, block: BlockId) {
        self.cache.get_mut().discard(block);
        self.free.insert(block.0);
        debug!(block = block.0, "disk.reclaim_block");
    }

    fn read_records(&mut self, block: BlockId, from: usize, to: usize) -> Result<Vec<u8>> {
        let rs = self.record_size();
        self.cache
            .get_mut()
            .with_block(block, |data| data[from * rs..to * rs].to_vec())
    }

    fn write_records(&mut self, block: BlockId, at: usize, bytes: &[u8]) -> Result<()> {
        let start = at * self.record_size();
        self.cache
            .get_mut()
            .with_block_mut(block, |data| data[start..start + bytes.len()].copy_from_slice(bytes))
    }

    /// Inserts `entries` into block `index` at record offset `split` when
    /// they do not fit, spreading the run over new blocks.
    fn split_insert(&mut self, index: usize, split: usize, entries: &[u8]) -> Result<()> {
        let rs = self.record_size();
        let epb = self.options.entries_per_block();
        let fill = self.options.fill_limit();
        let entry = self.directory[index];
        let occupancy = self.occupancy(index);
        let inserted = entries.len() / rs;

        let mut run = Vec::with_capacity(entries.len() + (occupancy - split) * rs);
        run.extend_from_slice(entries);
        run.extend_from_slice(&self.read_records(entry.block, split, occupancy)?);
        let run_len = run.len() / rs;

        let keep = split.max(fill);
        let head = keep - split;
        self.write_records(entry.block, split, &run[..head * rs])?;

        let mut chunks: Vec<&[u8]> = run[head * rs..].chunks(fill * rs).collect();
        let mut merged = 0;
        if let Some(last) = chunks.last().copied() {
            let last_len = last.len() / rs;
            if last_len < fill && index + 1 < self.directory.len() {
                let next = self.directory[index + 1];
                let next_occupancy = self.occupancy(index + 1);
                if next_occupancy + last_len <= epb {
                    self.cache.get_mut().with_block_mut(next.block, |data| {
                        data.copy_within(0..next_occupancy * rs, last_len * rs);
                        data[..last_len * rs].copy_from_slice(last);
                    })?;
                    merged = last_len;
                    chunks.pop();
                }
            }
        }

        for later in &mut self.directory[index + 1..] {
            later.first_pre += inserted;
        }
        if merged > 0 {
            self.directory[index + 1].first_pre -= merged;
        }

        let mut first_pre = entry.first_pre + keep;
        let mut new_entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let block = self.allocate_block()?;
            self.write_records(block, 0, chunk)?;
            new_entries.push(DirEntry { first_pre, block });
            first_pre += chunk.len() / rs;
        }
        debug!(
            block = entry.block.0,
            split,
            run = run_len,
            new_blocks = new_entries.len(),
            merged,
            "disk.split"
        );
        let tail = self.directory.split_off(index + 1);
        self.directory.extend(new_entries);
        self.directory.extend(tail);
        Ok(())
    }

    fn write_meta(&mut self) -> Result<()> {
        let meta = TableMeta {
            record_power: self.options.record_power,
            block_size: self.options.block_size,
            fill_permille: self.options.fill_permille(),
            len: self.len as u64,
            last_id: self.last_id,
            total_blocks: self.total_blocks,
            directory: self.directory.clone(),
        };
        meta.write_to(&self.dir.join(META_FILE))?;
        self.meta_dirty = false;
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        self.cache.get_mut().flush()?;
        if self.meta_dirty {
            self.write_meta()?;
        }
        Ok(())
    }
}

impl TableAccess for DiskTable {
    fn record_size(&self) -> usize {
        self.options.record_size()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read_into(&self, pre: usize, off: usize, dst: &mut [u8]) -> Result<()> {
        self.check_pre(pre)?;
        let rs = self.options.record_size();
        check_span(rs, off, dst.len())?;
        let entry = self.directory[self.locate(pre)];
        let start = (pre - entry.first_pre) * rs + off;
        self.cache
            .lock()
            .with_block(entry.block, |data| dst.copy_from_slice(&data[start..start + dst.len()]))
    }

    fn write_from(&mut self, pre: usize, off: usize, src: &[u8]) -> Result<()> {
        self.check_pre(pre)?;
        let rs = self.options.record_size();
        check_span(rs, off, src.len())?;
        let entry = self.directory[self.locate(pre)];
        let start = (pre - entry.first_pre) * rs + off;
        self.cache
            .get_mut()
            .with_block_mut(entry.block, |data| data[start..start + src.len()].copy_from_slice(src))
    }

    fn insert(&mut self, pre: usize, entries: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let rs = self.options.record_size();
        let count = check_entries(rs, entries)?;
        if pre > self.len {
            return Err(ArborError::OutOfRange { pre, len: self.len });
        }
        if count == 0 {
            return Ok(());
        }
        let fresh = self.directory.is_empty();
        if fresh {
            let block = self.allocate_block()?;
            self.directory.push(DirEntry {
                first_pre: 0,
                block,
            });
        }

        let index = if pre == 0 { 0 } else { self.locate(pre - 1) };
        let entry = self.directory[index];
        let split = pre - entry.first_pre;
        let occupancy = self.occupancy(index);
        // A newly populated block only takes the fill limit.
        let capacity = if fresh {
            self.options.fill_limit()
        } else {
            self.options.entries_per_block()
        };

        if occupancy + count <= capacity {
            self.cache.get_mut().with_block_mut(entry.block, |data| {
                data.copy_within(split * rs..occupancy * rs, (split + count) * rs);
                data[split * rs..(split + count) * rs].copy_from_slice(entries);
            })?;
            for later in &mut self.directory[index + 1..] {
                later.first_pre += count;
            }
        } else {
            self.split_insert(index, split, entries)?;
        }
        self.len += count;
        self.meta_dirty = true;
        Ok(())
    }

    fn delete(&mut self, pre: usize, count: usize) -> Result<()> {
        self.ensure_open()?;
        if count == 0 {
            return Ok(());
        }
        let end = match pre.checked_add(count) {
            Some(end) if end <= self.len => end,
            _ => {
                return Err(ArborError::OutOfRange {
                    pre,
                    len: self.len,
                })
            }
        };
        let rs = self.options.record_size();
        let start_index = self.locate(pre);

        let mut emptied = Vec::new();
        let mut index = start_index;
        while index < self.directory.len() && self.directory[index].first_pre < end {
            let entry = self.directory[index];
            let occupancy = self.occupancy(index);
            let lo = pre.max(entry.first_pre) - entry.first_pre;
            let hi = end.min(entry.first_pre + occupancy) - entry.first_pre;
            if lo == 0 && hi == occupancy {
                emptied.push(index);
            } else {
                self.cache.get_mut().with_block_mut(entry.block, |data| {
                    data.copy_within(hi * rs..occupancy * rs, lo * rs);
                })?;
            }
            index += 1;
        }

        for entry in &mut self.directory[start_index + 1..] {
            if entry.first_pre >= end {
                entry.first_pre -= count;
            } else if entry.first_pre > pre {
                entry.first_pre = pre;
            }
        }
        for &index in emptied.iter().rev() {
            let entry = self.directory.remove(index);
            self.release_block(entry.block);
        }
        self.len -= count;
        self.meta_dirty = true;
        Ok(())
    }

    fn last_id(&self) -> u32 {
        self.last_id
    }

    fn set_last_id(&mut self, id: u32) -> Result<()> {
        self.ensure_open()?;
        self.last_id = id;
        self.meta_dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_all()
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_all()?;
        self.closed = true;
        info!(
            path = %self.dir.display(),
            records = self.len,
            stats = %self.cache.get_mut().stats(),
            "disk.close"
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for DiskTable {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.flush_all() {
            warn!(path = %self.dir.display(), error = %err, "disk.drop_flush_failed");
        }
    }
}

impl std::fmt::Debug for DiskTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTable")
            .field("dir", &self.dir)
            .field("len", &self.len)
            .field("blocks", &self.directory.len())
            .field("last_id", &self.last_id)
            .field("closed", &self.closed)
            .finish()
    }
}
