#![forbid(unsafe_code)]
//! CRC32 checksums over persisted metadata.

/// Incremental checksum over byte slices.
pub trait Checksum {
    /// Clears accumulated state.
    fn reset(&mut self);
    /// Feeds more bytes.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the checksum of everything fed so far.
    fn finalize(&self) -> u32;
}

/// CRC32 backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// Checksum of a metadata image, seeded with its format version so that
/// images written by another format never verify by accident.
pub fn meta_crc32(format_version: u16, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&format_version.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
