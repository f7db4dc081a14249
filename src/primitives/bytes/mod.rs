#![forbid(unsafe_code)]
//! Fixed-width fields, varints, and buffer utilities shared across storage layers.

pub mod be {
    //! Big-endian fixed-width fields as laid out inside node records.
    //!
    //! Callers pass slices that start at the field; lengths are checked by
    //! slicing, so a short slice is a caller bug and panics.

    /// Largest value representable in a 40-bit field.
    pub const U40_MAX: u64 = (1 << 40) - 1;

    /// Reads a big-endian u16.
    #[inline]
    pub fn get_u16(src: &[u8]) -> u16 {
        u16::from_be_bytes([src[0], src[1]])
    }

    /// Writes a big-endian u16.
    #[inline]
    pub fn put_u16(dst: &mut [u8], v: u16) {
        dst[..2].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u32.
    #[inline]
    pub fn get_u32(src: &[u8]) -> u32 {
        u32::from_be_bytes([src[0], src[1], src[2], src[3]])
    }

    /// Writes a big-endian u32.
    #[inline]
    pub fn put_u32(dst: &mut [u8], v: u32) {
        dst[..4].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian 40-bit unsigned integer.
    #[inline]
    pub fn get_u40(src: &[u8]) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[3..].copy_from_slice(&src[..5]);
        u64::from_be_bytes(bytes)
    }

    /// Writes the low 40 bits of `v` big-endian.
    #[inline]
    pub fn put_u40(dst: &mut [u8], v: u64) {
        debug_assert!(v <= U40_MAX, "value exceeds 40 bits");
        dst[..5].copy_from_slice(&v.to_be_bytes()[3..]);
    }
}

pub mod var {
    //! Unsigned varints.

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    ///
    /// Returns `None` for truncated or overlong input.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Option<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src.get(*off)?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return None;
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Some(result);
            }
            shift += 7;
        }
        None
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing persisted images.

    use core::fmt;

    use super::var;

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes, or `None` when fewer remain.
        pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
            let end = self.off.checked_add(n)?;
            let slice = self.buf.get(self.off..end)?;
            self.off = end;
            Some(slice)
        }

        /// Reads one unsigned varint.
        pub fn varint(&mut self) -> Option<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
