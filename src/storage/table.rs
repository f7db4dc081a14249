use crate::primitives::bytes::be;
use crate::types::{ArborError, Result};

/// Ordered sequence of fixed-width records addressed by pre value.
///
/// Implemented by the paged [`super::DiskTable`] and the in-memory
/// [`super::MemTable`]; the tree facade is written against this trait only.
/// All methods fail with [`ArborError::Closed`] once the table is closed.
pub trait TableAccess {
    /// Width of one record in bytes.
    fn record_size(&self) -> usize;

    /// Number of records.
    fn len(&self) -> usize;

    /// Copies `dst.len()` bytes starting at byte `off` of record `pre`.
    fn read_into(&self, pre: usize, off: usize, dst: &mut [u8]) -> Result<()>;

    /// Overwrites bytes starting at byte `off` of record `pre`.
    fn write_from(&mut self, pre: usize, off: usize, src: &[u8]) -> Result<()>;

    /// Inserts whole records so that the first lands at `pre`.
    fn insert(&mut self, pre: usize, entries: &[u8]) -> Result<()>;

    /// Removes `count` records starting at `pre`.
    fn delete(&mut self, pre: usize, count: usize) -> Result<()>;

    /// Replaces the `count` records starting at `pre` with `entries`.
    ///
    /// The overlapping prefix is overwritten in place; surplus records are
    /// inserted after it and missing ones deleted.
    fn replace(&mut self, pre: usize, entries: &[u8], count: usize) -> Result<()> {
        if self.is_closed() {
            return Err(ArborError::Closed);
        }
        let rs = self.record_size();
        let new = check_entries(rs, entries)?;
        let len = self.len();
        match pre.checked_add(count) {
            Some(end) if end <= len => {}
            _ => return Err(ArborError::OutOfRange { pre, len }),
        }
        let common = new.min(count);
        for (i, record) in entries[..common * rs].chunks(rs).enumerate() {
            self.write_from(pre + i, 0, record)?;
        }
        if new > count {
            self.insert(pre + common, &entries[common * rs..])
        } else {
            self.delete(pre + common, count - common)
        }
    }

    /// Last node id handed out.
    fn last_id(&self) -> u32;

    /// Records the last node id handed out.
    fn set_last_id(&mut self, id: u32) -> Result<()>;

    /// Persists pending changes.
    fn flush(&mut self) -> Result<()>;

    /// Flushes and releases the table; later calls fail.
    fn close(&mut self) -> Result<()>;

    /// Whether [`TableAccess::close`] was called.
    fn is_closed(&self) -> bool;

    /// Whether the table holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails unless the table is open and `pre` addresses a record.
    fn check_pre(&self, pre: usize) -> Result<()> {
        if self.is_closed() {
            return Err(ArborError::Closed);
        }
        let len = self.len();
        if pre >= len {
            return Err(ArborError::OutOfRange { pre, len });
        }
        Ok(())
    }

    /// Reads one byte of record `pre`.
    fn read1(&self, pre: usize, off: usize) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(pre, off, &mut buf)?;
        Ok(buf[0])
    }

    /// Reads a big-endian u16 of record `pre`.
    fn read2(&self, pre: usize, off: usize) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(pre, off, &mut buf)?;
        Ok(be::get_u16(&buf))
    }

    /// Reads a big-endian u32 of record `pre`.
    fn read4(&self, pre: usize, off: usize) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(pre, off, &mut buf)?;
        Ok(be::get_u32(&buf))
    }

    /// Reads a big-endian 40-bit value of record `pre`.
    fn read5(&self, pre: usize, off: usize) -> Result<u64> {
        let mut buf = [0u8; 5];
        self.read_into(pre, off, &mut buf)?;
        Ok(be::get_u40(&buf))
    }

    /// Writes one byte of record `pre`.
    fn write1(&mut self, pre: usize, off: usize, v: u8) -> Result<()> {
        self.write_from(pre, off, &[v])
    }

    /// Writes a big-endian u16 into record `pre`.
    fn write2(&mut self, pre: usize, off: usize, v: u16) -> Result<()> {
        self.write_from(pre, off, &v.to_be_bytes())
    }

    /// Writes a big-endian u32 into record `pre`.
    fn write4(&mut self, pre: usize, off: usize, v: u32) -> Result<()> {
        self.write_from(pre, off, &v.to_be_bytes())
    }

    /// Writes a big-endian 40-bit value into record `pre`.
    fn write5(&mut self, pre: usize, off: usize, v: u64) -> Result<()> {
        let mut buf = [0u8; 5];
        be::put_u40(&mut buf, v);
        self.write_from(pre, off, &buf)
    }

    /// Returns a copy of record `pre`.
    fn read_record(&self, pre: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.record_size()];
        self.read_into(pre, 0, &mut buf)?;
        Ok(buf)
    }

    /// Overwrites record `pre` with `bytes`, which must be one record wide.
    fn write_record(&mut self, pre: usize, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.record_size() {
            return Err(ArborError::Invalid("record image has the wrong width"));
        }
        self.write_from(pre, 0, bytes)
    }
}

/// Fails unless `off..off + len` lies inside one record.
pub(crate) fn check_span(record_size: usize, off: usize, len: usize) -> Result<()> {
    match off.checked_add(len) {
        Some(end) if end <= record_size => Ok(()),
        _ => Err(ArborError::Invalid("field access crosses record boundary")),
    }
}

/// Number of whole records in `entries`.
pub(crate) fn check_entries(record_size: usize, entries: &[u8]) -> Result<usize> {
    if entries.len() % record_size != 0 {
        return Err(ArborError::Invalid("entries are not whole records"));
    }
    Ok(entries.len() / record_size)
}
