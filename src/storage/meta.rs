//! Persisted table header and block directory.
//!
//! Image layout, big-endian unless noted:
//!
//! ```text
//! 0..4    magic "ARBT"
//! 4..6    format version
//! 6       record power
//! 7       reserved (zero)
//! 8..12   block size
//! 12..14  fill factor, permille
//! 14..22  record count
//! 22..26  last id
//! 26..30  total allocated blocks
//! ..      varint entry count, then varint (first_pre, block) pairs
//! ..      crc32 of everything before it
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::ops::Range;
use std::path::Path;

use crate::primitives::bytes::{be, buf::Cursor, var};
use crate::types::{meta_crc32, ArborError, BlockId, Result};

/// File magic.
pub const META_MAGIC: [u8; 4] = *b"ARBT";
/// Current metadata format.
pub const META_FORMAT_VERSION: u16 = 1;

const MAGIC: Range<usize> = 0..4;
const FORMAT_VERSION: Range<usize> = 4..6;
const RECORD_POWER: usize = 6;
const RESERVED: usize = 7;
const BLOCK_SIZE: Range<usize> = 8..12;
const FILL_PERMILLE: Range<usize> = 12..14;
const RECORD_COUNT: Range<usize> = 14..22;
const LAST_ID: Range<usize> = 22..26;
const TOTAL_BLOCKS: Range<usize> = 26..30;
const HEADER_LEN: usize = 30;
const CRC_LEN: usize = 4;

/// One used block and the pre of its first record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Pre of the first record stored in the block.
    pub first_pre: usize,
    /// Block holding the records.
    pub block: BlockId,
}

/// Decoded contents of `table.meta`.
#[derive(Clone, Debug, PartialEq)]
pub struct TableMeta {
    /// Records are `2^record_power` bytes wide.
    pub record_power: u8,
    /// Block size in bytes.
    pub block_size: u32,
    /// Fill factor in permille.
    pub fill_permille: u16,
    /// Number of records.
    pub len: u64,
    /// Last node id handed out.
    pub last_id: u32,
    /// Blocks ever allocated in the data file.
    pub total_blocks: u32,
    /// Used blocks in pre order.
    pub directory: Vec<DirEntry>,
}

impl TableMeta {
    /// Serializes the metadata including its trailing checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        out[MAGIC].copy_from_slice(&META_MAGIC);
        out[FORMAT_VERSION].copy_from_slice(&META_FORMAT_VERSION.to_be_bytes());
        out[RECORD_POWER] = self.record_power;
        out[RESERVED] = 0;
        be::put_u32(&mut out[BLOCK_SIZE], self.block_size);
        out[FILL_PERMILLE].copy_from_slice(&self.fill_permille.to_be_bytes());
        out[RECORD_COUNT].copy_from_slice(&self.len.to_be_bytes());
        be::put_u32(&mut out[LAST_ID], self.last_id);
        be::put_u32(&mut out[TOTAL_BLOCKS], self.total_blocks);
        var::encode_u64(self.directory.len() as u64, &mut out);
        for entry in &self.directory {
            var::encode_u64(entry.first_pre as u64, &mut out);
            var::encode_u64(u64::from(entry.block.0), &mut out);
        }
        let crc = meta_crc32(META_FORMAT_VERSION, &out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Parses and checks an image produced by [`TableMeta::encode`].
    ///
    /// Verifies framing and the checksum only; geometry and directory
    /// consistency are checked by [`TableMeta::validate`].
    pub fn decode(image: &[u8]) -> Result<Self> {
        if image.len() < HEADER_LEN + CRC_LEN {
            return Err(ArborError::Corruption("table meta truncated"));
        }
        if image[MAGIC] != META_MAGIC {
            return Err(ArborError::Corruption("table meta has wrong magic"));
        }
        let version = be::get_u16(&image[FORMAT_VERSION]);
        if version != META_FORMAT_VERSION {
            return Err(ArborError::Corruption("unsupported table meta version"));
        }
        let (body, tail) = image.split_at(image.len() - CRC_LEN);
        if meta_crc32(version, body) != be::get_u32(tail) {
            return Err(ArborError::Corruption("table meta crc mismatch"));
        }
        if body[RESERVED] != 0 {
            return Err(ArborError::Corruption("table meta reserved byte non-zero"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&body[RECORD_COUNT]);

        let mut cur = Cursor::new(body);
        cur.off = HEADER_LEN;
        let entries = cur
            .varint()
            .ok_or(ArborError::Corruption("table meta directory truncated"))?;
        // Each entry takes at least two bytes.
        if entries > (cur.remaining() / 2) as u64 {
            return Err(ArborError::Corruption("table meta directory truncated"));
        }
        let mut directory = Vec::with_capacity(entries as usize);
        for _ in 0..entries {
            let first_pre = cur.varint();
            let block = cur.varint();
            let (first_pre, block) = match (first_pre, block) {
                (Some(pre), Some(block)) => (pre, block),
                _ => return Err(ArborError::Corruption("table meta directory truncated")),
            };
            let first_pre = usize::try_from(first_pre)
                .map_err(|_| ArborError::Corruption("directory pre out of range"))?;
            let block = u32::try_from(block)
                .map_err(|_| ArborError::Corruption("directory block out of range"))?;
            directory.push(DirEntry {
                first_pre,
                block: BlockId(block),
            });
        }
        if cur.remaining() != 0 {
            return Err(ArborError::Corruption("table meta has trailing bytes"));
        }
        Ok(Self {
            record_power: body[RECORD_POWER],
            block_size: be::get_u32(&body[BLOCK_SIZE]),
            fill_permille: be::get_u16(&body[FILL_PERMILLE]),
            len: u64::from_be_bytes(len_bytes),
            last_id: be::get_u32(&body[LAST_ID]),
            total_blocks: be::get_u32(&body[TOTAL_BLOCKS]),
            directory,
        })
    }

    /// Checks the directory against the geometry and the data file length.
    pub fn validate(&self, data_len: u64) -> Result<()> {
        let entries_per_block = (self.block_size >> self.record_power) as u64;
        if self.directory.is_empty() {
            return if self.len == 0 {
                Ok(())
            } else {
                Err(ArborError::Corruption("records without blocks"))
            };
        }
        if self.directory[0].first_pre != 0 {
            return Err(ArborError::Corruption("directory does not start at pre 0"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for (i, entry) in self.directory.iter().enumerate() {
            let end = match self.directory.get(i + 1) {
                Some(next) => next.first_pre as u64,
                None => self.len,
            };
            let start = entry.first_pre as u64;
            if end <= start {
                return Err(ArborError::Corruption("directory not strictly increasing"));
            }
            if end - start > entries_per_block {
                return Err(ArborError::Corruption("block occupancy exceeds capacity"));
            }
            if entry.block.0 >= self.total_blocks {
                return Err(ArborError::Corruption("directory block beyond allocation"));
            }
            if !seen.insert(entry.block.0) {
                return Err(ArborError::Corruption("block referenced twice"));
            }
            let needed = (u64::from(entry.block.0) + 1) * u64::from(self.block_size);
            if data_len < needed {
                return Err(ArborError::Corruption("data file shorter than directory"));
            }
        }
        Ok(())
    }

    /// Atomically replaces the metadata file at `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("meta.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&self.encode())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reads and decodes the metadata file at `path`.
    pub fn read_from(path: &Path) -> Result<Self> {
        let image = fs::read(path)?;
        Self::decode(&image)
    }
}
