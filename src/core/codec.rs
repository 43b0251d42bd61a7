//! Wire Primitives
//!
//! All multi-byte values are big-endian. `bytes::Buf` getters panic on a
//! short buffer, so every read here checks the remaining length first and
//! reports a [`WireError`] instead.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Longest name that fits behind a signed one-byte length prefix.
pub const MAX_NAME_BYTES: usize = i8::MAX as usize;

/// Errors raised while decoding a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes remained than the field needs.
    #[error("truncated {what}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field being read
        what: &'static str,
        /// Bytes required
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// A field decoded to a value outside its domain.
    #[error("invalid {what}: {value}")]
    Invalid {
        /// Field being read
        what: &'static str,
        /// Offending raw value
        value: i64,
    },

    /// Name bytes were not UTF-8.
    #[error("name is not valid UTF-8")]
    Utf8,
}

/// Checked big-endian reads over any [`Buf`].
pub trait WireRead: Buf {
    /// Fail unless `n` bytes remain.
    fn need(&self, n: usize, what: &'static str) -> Result<(), WireError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(WireError::Truncated { what, needed: n, remaining });
        }
        Ok(())
    }

    /// Read a `u8`.
    fn read_u8(&mut self, what: &'static str) -> Result<u8, WireError> {
        self.need(1, what)?;
        Ok(self.get_u8())
    }

    /// Read an `i8`.
    fn read_i8(&mut self, what: &'static str) -> Result<i8, WireError> {
        self.need(1, what)?;
        Ok(self.get_i8())
    }

    /// Read an `i16`.
    fn read_i16(&mut self, what: &'static str) -> Result<i16, WireError> {
        self.need(2, what)?;
        Ok(self.get_i16())
    }

    /// Read a `u32`.
    fn read_u32(&mut self, what: &'static str) -> Result<u32, WireError> {
        self.need(4, what)?;
        Ok(self.get_u32())
    }

    /// Read an `i32`.
    fn read_i32(&mut self, what: &'static str) -> Result<i32, WireError> {
        self.need(4, what)?;
        Ok(self.get_i32())
    }

    /// Read an `f32`.
    fn read_f32(&mut self, what: &'static str) -> Result<f32, WireError> {
        self.need(4, what)?;
        Ok(self.get_f32())
    }

    /// Read a `[len i8][utf8 bytes]` name.
    fn read_name(&mut self) -> Result<String, WireError> {
        let len = self.read_i8("name length")?;
        if len < 0 {
            return Err(WireError::Invalid { what: "name length", value: len as i64 });
        }
        let len = len as usize;
        self.need(len, "name")?;
        let mut raw = vec![0u8; len];
        self.copy_to_slice(&mut raw);
        String::from_utf8(raw).map_err(|_| WireError::Utf8)
    }
}

impl<B: Buf + ?Sized> WireRead for B {}

/// Write a `[len i8][utf8 bytes]` name, cutting it at a char boundary if
/// it exceeds [`MAX_NAME_BYTES`].
pub fn put_name<B: BufMut>(buf: &mut B, name: &str) {
    let name = truncate_name(name);
    buf.put_i8(name.len() as i8);
    buf.put_slice(name.as_bytes());
}

/// Longest prefix of `name` that fits in [`MAX_NAME_BYTES`].
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_BYTES {
        return name;
    }
    let mut end = MAX_NAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
