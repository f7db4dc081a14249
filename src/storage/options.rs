use serde::{Deserialize, Serialize};

use super::record::MIN_RECORD_POWER;
use crate::primitives::pager::DEFAULT_CACHE_BLOCKS;
use crate::types::{ArborError, Result};

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
/// Default record power (16-byte records).
pub const DEFAULT_RECORD_POWER: u8 = MIN_RECORD_POWER;
/// Default fraction of a block filled when it is first populated.
pub const DEFAULT_FILL_FACTOR: f64 = 0.9;
/// Largest supported record power.
pub const MAX_RECORD_POWER: u8 = 8;

/// Configuration of a paged table.
///
/// `block_size`, `record_power`, and `fill_factor` are fixed when the table is
/// created and persisted with it; `cache_blocks` is a runtime setting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Size of each block in bytes.
    pub block_size: u32,
    /// Records are `2^record_power` bytes wide.
    pub record_power: u8,
    /// Share of a block filled when a block is first populated, in (0, 1] and
    /// a multiple of 0.001.
    pub fill_factor: f64,
    /// Number of blocks kept in the cache.
    pub cache_blocks: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            record_power: DEFAULT_RECORD_POWER,
            fill_factor: DEFAULT_FILL_FACTOR,
            cache_blocks: DEFAULT_CACHE_BLOCKS,
        }
    }
}

impl TableOptions {
    /// Parses options from TOML; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: TableOptions =
            toml::from_str(text).map_err(|err| ArborError::Options(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Sets the block size.
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the record power.
    pub fn record_power(mut self, power: u8) -> Self {
        self.record_power = power;
        self
    }

    /// Sets the fill factor.
    pub fn fill_factor(mut self, factor: f64) -> Self {
        self.fill_factor = factor;
        self
    }

    /// Sets the number of cached blocks.
    pub fn cache_blocks(mut self, blocks: usize) -> Self {
        self.cache_blocks = blocks;
        self
    }

    /// Width of one record in bytes.
    pub fn record_size(&self) -> usize {
        1usize << self.record_power
    }

    /// Number of records a block can hold.
    pub fn entries_per_block(&self) -> usize {
        self.block_size as usize >> self.record_power
    }

    /// Number of records a freshly populated block receives.
    pub fn fill_limit(&self) -> usize {
        let limit = (self.entries_per_block() as f64 * self.fill_factor).floor() as usize;
        limit.clamp(1, self.entries_per_block().max(1))
    }

    /// Fill factor in permille, as persisted.
    pub fn fill_permille(&self) -> u16 {
        (self.fill_factor * 1000.0).round() as u16
    }

    /// Checks that the geometry is usable.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_RECORD_POWER..=MAX_RECORD_POWER).contains(&self.record_power) {
            return Err(ArborError::Invalid("record power out of range"));
        }
        if !self.block_size.is_power_of_two() {
            return Err(ArborError::Invalid("block size must be a power of two"));
        }
        if (self.block_size as usize) < self.record_size() {
            return Err(ArborError::Invalid("block size smaller than a record"));
        }
        if !(self.fill_factor > 0.0 && self.fill_factor <= 1.0) {
            return Err(ArborError::Invalid("fill factor must be in (0, 1]"));
        }
        // Persisted in permille; the factor must read back unchanged.
        let permille = self.fill_permille();
        if permille == 0 || f64::from(permille) / 1000.0 != self.fill_factor {
            return Err(ArborError::Invalid("fill factor must be a multiple of 0.001"));
        }
        Ok(())
    }
}
