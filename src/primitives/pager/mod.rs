#![forbid(unsafe_code)]

mod cache;
mod frame;

pub use cache::{BlockCache, CacheStats, DEFAULT_CACHE_BLOCKS};
