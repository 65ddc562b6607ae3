//! Binary codec shared by the save format and every persistable object.
//!
//! Integers are little-endian, booleans are a single `0`/`1` byte, strings are
//! UTF-8 behind a 7-bit variable-length prefix, and opaque blocks carry an
//! `i32` length prefix.
//!
//! # Invariants
//! - A reader built over a block can never observe bytes outside that block.
//! - A failed wrapped decode leaves the outer cursor past the whole block.

use crate::types::{Handle, PersistentId, Transform};
use glam::{Quat, Vec3};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Errors raised while encoding or decoding binary state.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of block: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    #[error("block of {0} bytes does not fit an i32 length prefix")]
    BlockTooLarge(usize),
    #[error("malformed string length prefix")]
    MalformedStringLength,
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Invalid(String),
}

impl CodecError {
    /// Build an error for state that decoded cleanly but makes no sense.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Growable sink for encoded state.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Apply one `WriteBytesExt` call to the buffer. Writes into a `Vec<u8>`
    /// do not fail.
    fn put<F>(&mut self, write: F)
    where
        F: FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
    {
        if let Err(error) = write(&mut self.buf) {
            tracing::error!(%error, "in-memory write failed");
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put(|b| b.write_u8(value));
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.put(|b| b.write_i32::<LittleEndian>(value));
    }

    pub fn write_u32(&mut self, value: u32) {
        self.put(|b| b.write_u32::<LittleEndian>(value));
    }

    pub fn write_u64(&mut self, value: u64) {
        self.put(|b| b.write_u64::<LittleEndian>(value));
    }

    pub fn write_f32(&mut self, value: f32) {
        self.put(|b| b.write_f32::<LittleEndian>(value));
    }

    /// Write a string behind a 7-bit variable-length byte count.
    pub fn write_string(&mut self, value: &str) {
        let mut len = value.len();
        while len >= 0x80 {
            self.buf.push((len as u8 & 0x7f) | 0x80);
            len >>= 7;
        }
        self.buf.push(len as u8);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Append raw bytes with no framing.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append `bytes` behind an `i32` length prefix.
    pub fn write_prefixed(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = i32::try_from(bytes.len()).map_err(|_| CodecError::BlockTooLarge(bytes.len()))?;
        self.write_i32(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_id(&mut self, id: PersistentId) {
        self.write_u64(id.0);
    }

    pub fn write_handle(&mut self, handle: Handle) {
        self.write_u64(handle.0);
    }

    /// Position, rotation (xyzw) and scale as ten `f32`s.
    pub fn write_transform(&mut self, t: &Transform) {
        for v in t.position.to_array() {
            self.write_f32(v);
        }
        for v in t.rotation.to_array() {
            self.write_f32(v);
        }
        for v in t.scale.to_array() {
            self.write_f32(v);
        }
    }

    /// Run `encode` against a private buffer and append its output as one
    /// length-prefixed block.
    ///
    /// When `encode` fails nothing is appended to `self`.
    pub fn write_wrapped<F>(&mut self, encode: F) -> Result<(), CodecError>
    where
        F: FnOnce(&mut ByteWriter) -> Result<(), CodecError>,
    {
        let mut block = ByteWriter::new();
        encode(&mut block)?;
        self.write_prefixed(&block.buf)
    }
}

/// Bounded cursor over encoded state.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::UnexpectedEnd { needed, remaining });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.ensure(8)?;
        Ok(self.cursor.read_u64::<LittleEndian>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.ensure(4)?;
        Ok(self.cursor.read_f32::<LittleEndian>()?)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(len)?;
        let start = self.position();
        let bytes: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&bytes[start..start + len])
    }

    /// Read an `i32` length prefix and borrow that many bytes.
    pub fn read_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        self.read_raw(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let mut len: usize = 0;
        let mut shift = 0u32;
        loop {
            if shift >= 35 {
                return Err(CodecError::MalformedStringLength);
            }
            let byte = self.read_u8()?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let bytes = self.read_raw(len)?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    pub fn read_id(&mut self) -> Result<PersistentId, CodecError> {
        Ok(PersistentId(self.read_u64()?))
    }

    pub fn read_handle(&mut self) -> Result<Handle, CodecError> {
        Ok(Handle(self.read_u64()?))
    }

    pub fn read_transform(&mut self) -> Result<Transform, CodecError> {
        let position = Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?);
        let rotation = Quat::from_xyzw(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        );
        let scale = Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?);
        Ok(Transform {
            position,
            rotation,
            scale,
        })
    }

    /// Read one length-prefixed block and return a reader bounded to it.
    ///
    /// The outer cursor is past the block whether or not the inner reader
    /// is ever used.
    pub fn read_block(&mut self) -> Result<ByteReader<'a>, CodecError> {
        Ok(ByteReader::new(self.read_prefixed()?))
    }

    /// Read one block and run `decode` against it.
    ///
    /// Only the outer framing can fail this call. An error from `decode` is
    /// logged and yields `Ok(None)`; the outer cursor still ends up past the
    /// block.
    pub fn read_wrapped<T, F>(&mut self, decode: F) -> Result<Option<T>, CodecError>
    where
        F: FnOnce(&mut ByteReader<'a>) -> Result<T, CodecError>,
    {
        let mut block = self.read_block()?;
        match decode(&mut block) {
            Ok(value) => {
                if !block.is_empty() {
                    tracing::trace!(unread = block.remaining(), "wrapped block not fully consumed");
                }
                Ok(Some(value))
            }
            Err(e) => {
                tracing::error!(error = %e, "wrapped block decode failed; block skipped");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut w = ByteWriter::new();
        w.write_i32(1);
        w.write_u64(0x0102_0304_0506_0708);
        assert_eq!(&w.as_bytes()[..4], &[1, 0, 0, 0]);
        assert_eq!(&w.as_bytes()[4..], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn written_primitives_read_back_at_their_limits() {
        let mut w = ByteWriter::new();
        w.write_u8(u8::MAX);
        w.write_bool(true);
        w.write_i32(i32::MIN);
        w.write_u32(u32::MAX);
        w.write_u64(u64::MAX);
        w.write_f32(-0.5);
        assert_eq!(w.len(), 1 + 1 + 4 + 4 + 8 + 4);
        assert_eq!(&w.as_bytes()[2..6], &[0x00, 0x00, 0x00, 0x80]);
        assert_eq!(&w.as_bytes()[18..], &(-0.5f32).to_le_bytes());

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), u8::MAX);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.read_u32().unwrap(), u32::MAX);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_f32().unwrap(), -0.5);
        assert!(r.is_empty());
    }

    #[test]
    fn long_strings_use_multi_byte_prefix() {
        let text = "x".repeat(300);
        let mut w = ByteWriter::new();
        w.write_string(&text);
        // 300 = 0b1_0010_1100 -> 0xac 0x02
        assert_eq!(&w.as_bytes()[..2], &[0xac, 0x02]);

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), text);
        assert!(r.is_empty());
    }

    #[test]
    fn truncated_read_reports_shortfall() {
        let bytes = [1u8, 2, 3];
        let mut r = ByteReader::new(&bytes);
        match r.read_u64() {
            Err(CodecError::UnexpectedEnd { needed, remaining }) => {
                assert_eq!(needed, 8);
                assert_eq!(remaining, 3);
            }
            other => panic!("expected UnexpectedEnd, got {other:?}"),
        }
        // A failed read does not move the cursor.
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn invalid_bool_rejected() {
        let bytes = [2u8];
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(r.read_bool(), Err(CodecError::InvalidBool(2))));
    }

    #[test]
    fn negative_block_length_rejected() {
        let mut w = ByteWriter::new();
        w.write_i32(-4);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(r.read_block(), Err(CodecError::NegativeLength(-4))));
    }

    #[test]
    fn wrapped_decode_cannot_read_past_its_block() {
        let mut w = ByteWriter::new();
        w.write_wrapped(|b| {
            b.write_u32(7);
            Ok(())
        })
        .unwrap();
        w.write_u32(99);
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        let inner = r
            .read_wrapped(|b| {
                let first = b.read_u32()?;
                // Reading on would hit the sibling value if the view leaked.
                let second = b.read_u32()?;
                Ok((first, second))
            })
            .unwrap();
        assert!(inner.is_none());
        assert_eq!(r.read_u32().unwrap(), 99);
    }

    #[test]
    fn failing_encode_appends_nothing() {
        let mut w = ByteWriter::new();
        w.write_u8(5);
        let result = w.write_wrapped(|b| {
            b.write_u64(1);
            Err(CodecError::invalid("refused"))
        });
        assert!(result.is_err());
        assert_eq!(w.as_bytes(), &[5]);
    }

    #[test]
    fn unread_tail_of_block_is_skipped() {
        let mut w = ByteWriter::new();
        w.write_wrapped(|b| {
            b.write_u32(1);
            b.write_u32(2);
            Ok(())
        })
        .unwrap();
        w.write_bool(true);
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        let first = r.read_wrapped(|b| b.read_u32()).unwrap();
        assert_eq!(first, Some(1));
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn handles_are_fixed_width() {
        let mut w = ByteWriter::new();
        w.write_handle(Handle(42));
        w.write_handle(Handle::NONE);
        assert_eq!(w.len(), 16);

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_handle().unwrap(), Handle(42));
        assert!(r.read_handle().unwrap().is_none());
    }

    #[test]
    fn transform_is_ten_floats() {
        let t = Transform {
            position: Vec3::new(1.0, -2.5, 3.0),
            rotation: Quat::from_rotation_y(0.5),
            scale: Vec3::splat(2.0),
        };
        let mut w = ByteWriter::new();
        w.write_transform(&t);
        assert_eq!(w.len(), 40);

        let bytes = w.into_bytes();
        let back = ByteReader::new(&bytes).read_transform().unwrap();
        assert_eq!(back, t);
    }
}
