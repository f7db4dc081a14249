use super::table::{check_entries, check_span, TableAccess};
use crate::types::{ArborError, Result};

/// Table kept in a single growable buffer.
///
/// Used for fragments and small transient trees; inserts and deletes splice
/// the buffer directly.
#[derive(Clone, Debug)]
pub struct MemTable {
    buf: Vec<u8>,
    record_power: u8,
    last_id: u32,
    closed: bool,
}

impl MemTable {
    /// Creates an empty table of `2^record_power`-byte records.
    pub fn new(record_power: u8) -> Self {
        Self {
            buf: Vec::new(),
            record_power,
            last_id: 0,
            closed: false,
        }
    }

    /// Creates an empty table with room for `records` records.
    pub fn with_capacity(record_power: u8, records: usize) -> Self {
        let mut table = Self::new(record_power);
        table.buf.reserve(records << record_power);
        table
    }

    /// Raw bytes of all records.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ArborError::Closed)
        } else {
            Ok(())
        }
    }

    fn byte_range(&self, pre: usize, off: usize, len: usize) -> Result<std::ops::Range<usize>> {
        self.check_pre(pre)?;
        check_span(self.record_size(), off, len)?;
        let start = (pre << self.record_power) + off;
        Ok(start..start + len)
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new(super::options::DEFAULT_RECORD_POWER)
    }
}

impl TableAccess for MemTable {
    fn record_size(&self) -> usize {
        1 << self.record_power
    }

    fn len(&self) -> usize {
        self.buf.len() >> self.record_power
    }

    fn read_into(&self, pre: usize, off: usize, dst: &mut [u8]) -> Result<()> {
        let range = self.byte_range(pre, off, dst.len())?;
        dst.copy_from_slice(&self.buf[range]);
        Ok(())
    }

    fn write_from(&mut self, pre: usize, off: usize, src: &[u8]) -> Result<()> {
        let range = self.byte_range(pre, off, src.len())?;
        self.buf[range].copy_from_slice(src);
        Ok(())
    }

    fn insert(&mut self, pre: usize, entries: &[u8]) -> Result<()> {
        self.ensure_open()?;
        check_entries(self.record_size(), entries)?;
        let len = self.len();
        if pre > len {
            return Err(ArborError::OutOfRange { pre, len });
        }
        let at = pre << self.record_power;
        self.buf.splice(at..at, entries.iter().copied());
        Ok(())
    }

    fn delete(&mut self, pre: usize, count: usize) -> Result<()> {
        self.ensure_open()?;
        if count == 0 {
            return Ok(());
        }
        let len = self.len();
        match pre.checked_add(count) {
            Some(end) if end <= len => {}
            _ => return Err(ArborError::OutOfRange { pre, len }),
        }
        let start = pre << self.record_power;
        self.buf.drain(start..start + (count << self.record_power));
        Ok(())
    }

    fn last_id(&self) -> u32 {
        self.last_id
    }

    fn set_last_id(&mut self, id: u32) -> Result<()> {
        self.ensure_open()?;
        self.last_id = id;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
