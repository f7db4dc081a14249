use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::trace;

use super::frame::Block;
use crate::primitives::io::FileIo;
use crate::types::{ArborError, BlockId, Result};

/// Number of blocks kept in memory when the caller passes zero.
pub const DEFAULT_CACHE_BLOCKS: usize = 64;

/// Counters describing cache behavior since open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from memory.
    pub hits: u64,
    /// Lookups that had to read the file.
    pub misses: u64,
    /// Blocks pushed out by the LRU policy.
    pub evictions: u64,
    /// Dirty blocks written to the file.
    pub dirty_writebacks: u64,
}

/// LRU cache of fixed-size blocks with write-back of dirty frames.
///
/// Blocks past the end of the file read as zeros; they only exist once a
/// dirty frame for them is written back.
pub struct BlockCache {
    io: Arc<dyn FileIo>,
    block_size: usize,
    cache: LruCache<BlockId, Block>,
    file_len: u64,
    stats: CacheStats,
}

impl BlockCache {
    /// Creates a cache over `io` holding at most `capacity` blocks.
    pub fn new(io: Arc<dyn FileIo>, block_size: usize, capacity: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(ArborError::Invalid("block size must be positive"));
        }
        let file_len = io.len()?;
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CACHE_BLOCKS))
            .ok_or(ArborError::Invalid("cache capacity must be positive"))?;
        Ok(Self {
            io,
            block_size,
            cache: LruCache::new(capacity),
            file_len,
            stats: CacheStats::default(),
        })
    }

    /// Size of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Current length of the backing file.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Returns a copy of the cache counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Runs `f` over the block contents.
    pub fn with_block<F, T>(&mut self, id: BlockId, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> T,
    {
        let block = self.fetch(id)?;
        Ok(f(&block.data))
    }

    /// Runs `f` over the mutable block contents and marks the block dirty.
    pub fn with_block_mut<F, T>(&mut self, id: BlockId, f: F) -> Result<T>
    where
        F: FnOnce(&mut [u8]) -> T,
    {
        let block = self.fetch(id)?;
        let result = f(&mut block.data);
        block.dirty = true;
        Ok(result)
    }

    /// Installs a zeroed, dirty frame for `id` without reading the file.
    pub fn allocate(&mut self, id: BlockId) -> Result<()> {
        let mut block = Block::new(id, self.block_size);
        block.dirty = true;
        self.install(block)
    }

    /// Drops a cached frame without writing it back.
    pub fn discard(&mut self, id: BlockId) {
        self.cache.pop(&id);
    }

    /// Writes every dirty block in block order and syncs the file.
    pub fn flush(&mut self) -> Result<()> {
        let mut dirty: Vec<BlockId> = self
            .cache
            .iter()
            .filter_map(|(&id, block)| block.dirty.then_some(id))
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }
        dirty.sort_unstable();
        for id in dirty {
            let data = match self.cache.peek(&id) {
                Some(block) => block.data.clone(),
                None => return Err(ArborError::Corruption("dirty block missing from cache")),
            };
            self.write_block(id, &data)?;
            if let Some(block) = self.cache.peek_mut(&id) {
                block.dirty = false;
            }
        }
        self.io.sync_all()
    }

    fn fetch(&mut self, id: BlockId) -> Result<&mut Block> {
        if self.cache.contains(&id) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            let mut block = Block::new(id, self.block_size);
            self.read_block(&mut block)?;
            self.install(block)?;
        }
        self.cache
            .get_mut(&id)
            .ok_or(ArborError::Corruption("block missing from cache"))
    }

    fn install(&mut self, block: Block) -> Result<()> {
        let id = block.id;
        if let Some((evicted_id, evicted)) = self.cache.push(id, block) {
            if evicted_id != id {
                self.stats.evictions += 1;
                if evicted.dirty {
                    self.write_block(evicted_id, &evicted.data)?;
                }
            }
        }
        Ok(())
    }

    fn read_block(&mut self, block: &mut Block) -> Result<()> {
        let off = self.offset(block.id);
        if off >= self.file_len {
            return Ok(());
        }
        let available = (self.file_len - off).min(self.block_size as u64) as usize;
        self.io.read_at(off, &mut block.data[..available])
    }

    fn write_block(&mut self, id: BlockId, data: &[u8]) -> Result<()> {
        let off = self.offset(id);
        trace!(block = id.0, off, "cache.write_block");
        self.io.write_at(off, data)?;
        self.stats.dirty_writebacks += 1;
        self.file_len = self.file_len.max(off + data.len() as u64);
        Ok(())
    }

    fn offset(&self, id: BlockId) -> u64 {
        u64::from(id.0) * self.block_size as u64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} dirty_writebacks={}",
            self.hits, self.misses, self.evictions, self.dirty_writebacks
        )
    }
}
