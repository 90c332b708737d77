//! Fixed-width little-endian wire primitives.
//!
//! There is no self-describing schema: both ends agree on the field order of
//! every record. Variable-length arrays carry a `u16` count and strings a
//! `u16` byte length followed by UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::Vec2;
use relaysync_core::{EntityId, Rect};
use thiserror::Error;

/// Errors produced while encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Input ended before a field could be read.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the field.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },
    /// Payload was empty.
    #[error("empty payload")]
    Empty,
    /// Leading message tag is not registered.
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    /// An enum discriminant byte had no matching variant.
    #[error("invalid {what} discriminant {value}")]
    InvalidDiscriminant {
        /// Name of the field.
        what: &'static str,
        /// Value found on the wire.
        value: u8,
    },
    /// A string field was not UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// A string or array exceeded its limit.
    #[error("{what} length {len} exceeds {max}")]
    TooLong {
        /// Name of the field.
        what: &'static str,
        /// Actual length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// Bytes remained after the message was fully decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    /// The message decoded but violates a protocol limit.
    #[error("invalid message: {0}")]
    Invalid(&'static str),
}

/// Result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// A record with a fixed field order on the wire.
pub trait WireRecord: Sized {
    /// Append this record's fields.
    fn write(&self, w: &mut WireWriter) -> WireResult<()>;
    /// Read a record's fields in the same order.
    fn read(r: &mut WireReader<'_>) -> WireResult<Self>;
}

/// Growable output buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a `u8`.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Write a `u16`.
    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    /// Write a `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Write a `u64`.
    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Write an `f32`.
    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    /// Write a boolean as one byte.
    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Write an entity id.
    pub fn put_entity(&mut self, id: EntityId) {
        self.put_u32(id.0);
    }

    /// Write a vector as two `f32`s.
    pub fn put_vec2(&mut self, value: Vec2) {
        self.put_f32(value.x);
        self.put_f32(value.y);
    }

    /// Write a rectangle as four `f32`s (x, y, w, h).
    pub fn put_rect(&mut self, rect: &Rect) {
        self.put_f32(rect.x);
        self.put_f32(rect.y);
        self.put_f32(rect.w);
        self.put_f32(rect.h);
    }

    /// Write a `u16` length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) -> WireResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| WireError::TooLong {
            what: "string",
            len: value.len(),
            max: u16::MAX as usize,
        })?;
        self.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Write a `u16` count followed by each record.
    pub fn put_list<T: WireRecord>(&mut self, items: &[T]) -> WireResult<()> {
        let count = u16::try_from(items.len()).map_err(|_| WireError::TooLong {
            what: "array",
            len: items.len(),
            max: u16::MAX as usize,
        })?;
        self.put_u16(count);
        for item in items {
            item.write(self)?;
        }
        Ok(())
    }

    /// Freeze into an immutable buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over received bytes. Every read checks the remaining length first.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    /// Start reading `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> WireResult<()> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a `u8`.
    pub fn u8(&mut self) -> WireResult<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a `u16`.
    pub fn u16(&mut self) -> WireResult<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a `u32`.
    pub fn u32(&mut self) -> WireResult<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read a `u64`.
    pub fn u64(&mut self) -> WireResult<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Read an `f32`.
    pub fn f32(&mut self) -> WireResult<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    /// Read a boolean byte (0 or 1).
    pub fn bool(&mut self) -> WireResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(WireError::InvalidDiscriminant {
                what: "bool",
                value,
            }),
        }
    }

    /// Read an entity id.
    pub fn entity(&mut self) -> WireResult<EntityId> {
        Ok(EntityId(self.u32()?))
    }

    /// Read a vector.
    pub fn vec2(&mut self) -> WireResult<Vec2> {
        let x = self.f32()?;
        let y = self.f32()?;
        Ok(Vec2::new(x, y))
    }

    /// Read a rectangle.
    pub fn rect(&mut self) -> WireResult<Rect> {
        let x = self.f32()?;
        let y = self.f32()?;
        let w = self.f32()?;
        let h = self.f32()?;
        Ok(Rect::new(x, y, w, h))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> WireResult<String> {
        let len = self.u16()? as usize;
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        let text = std::str::from_utf8(head).map_err(|_| WireError::InvalidUtf8)?;
        self.buf = tail;
        Ok(text.to_string())
    }

    /// Read a count-prefixed list of records.
    pub fn list<T: WireRecord>(&mut self) -> WireResult<Vec<T>> {
        let count = self.u16()? as usize;
        // Cap the preallocation by what the input could possibly hold.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(T::read(self)?);
        }
        Ok(items)
    }

    /// Fail if any bytes remain.
    pub fn finish(self) -> WireResult<()> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_little_endian_fixed_width() {
        let mut w = WireWriter::new();
        w.put_u32(0x0102_0304);
        w.put_u16(0x0506);
        w.put_f32(1.0);
        let bytes = w.finish();

        assert_eq!(&bytes[..6], &[0x04, 0x03, 0x02, 0x01, 0x06, 0x05]);
        assert_eq!(&bytes[6..], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_string_is_length_prefixed() {
        let mut w = WireWriter::new();
        w.put_str("añb").unwrap();
        let bytes = w.finish();

        assert_eq!(&bytes[..2], &[4, 0]);
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.string().unwrap(), "añb");
        r.finish().unwrap();
    }

    #[test]
    fn test_truncated_reads_fail() {
        let mut r = WireReader::new(&[1, 2, 3]);
        assert_eq!(
            r.u32(),
            Err(WireError::Truncated {
                needed: 4,
                remaining: 3
            })
        );
    }

    #[test]
    fn test_string_length_beyond_input_fails() {
        let mut r = WireReader::new(&[10, 0, b'a']);
        assert!(matches!(r.string(), Err(WireError::Truncated { .. })));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut r = WireReader::new(&[2, 0, 0xff, 0xfe]);
        assert_eq!(r.string(), Err(WireError::InvalidUtf8));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let mut r = WireReader::new(&[1, 9]);
        r.u8().unwrap();
        assert_eq!(r.finish(), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn test_bool_rejects_other_values() {
        let mut r = WireReader::new(&[2]);
        assert!(matches!(r.bool(), Err(WireError::InvalidDiscriminant { .. })));
    }
}
