//! Frame codec for encoding/decoding tagged values
//!
//! Handles the byte layout of frames. The same codec serves the engine socket,
//! the peer link and FISH files; a [`Dialect`] restricts which tags are legal
//! and an [`IntLayout`] selects the padded-int variant some engines write.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;

use super::{Tag, Value};

/// Maximum Text/Blob payload size (256 MB)
const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown type tag {0} (protocol desync)")]
    UnknownTag(i32),

    #[error("Cannot encode {0} values in this dialect")]
    UnsupportedValue(Tag),

    #[error("Negative payload length {0}")]
    NegativeLength(i32),

    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Which tags a stream may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Engine socket: Int, Float, Text, Vec2, Vec3
    Engine,
    /// Peer-to-peer link: the engine set plus Blob
    Peer,
    /// FISH binary file: the engine set plus Bool
    File,
}

impl Dialect {
    pub fn accepts(self, tag: Tag) -> bool {
        match tag {
            Tag::Int | Tag::Float | Tag::Text | Tag::Vec2 | Tag::Vec3 => true,
            Tag::Blob => self == Dialect::Peer,
            Tag::Bool => self == Dialect::File,
        }
    }
}

/// Width of every Int32 field in a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntLayout {
    /// 4 bytes
    #[default]
    Standard,
    /// 4 bytes followed by a 4 byte zero word
    Padded,
}

impl IntLayout {
    fn width(self) -> usize {
        match self {
            IntLayout::Standard => 4,
            IntLayout::Padded => 8,
        }
    }
}

/// Size of a Text payload once padded to the next 4 byte boundary
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

/// Encodes and decodes frames. Stateless; decode only consumes complete frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    dialect: Dialect,
    layout: IntLayout,
}

impl FrameCodec {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            layout: IntLayout::Standard,
        }
    }

    pub fn with_layout(mut self, layout: IntLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn layout(&self) -> IntLayout {
        self.layout
    }

    /// Encode one frame into a buffer
    pub fn encode(&self, value: &Value, buf: &mut BytesMut) -> CodecResult<()> {
        let tag = value.tag();
        if !self.dialect.accepts(tag) {
            return Err(CodecError::UnsupportedValue(tag));
        }

        self.put_int(buf, tag.code());
        match value {
            Value::Int(v) => self.put_int(buf, *v),
            Value::Float(v) => buf.put_f64_le(*v),
            Value::Vec2(v) => v.iter().for_each(|x| buf.put_f64_le(*x)),
            Value::Vec3(v) => v.iter().for_each(|x| buf.put_f64_le(*x)),
            Value::Bool(v) => self.put_int(buf, i32::from(*v)),
            Value::Text(s) => {
                let len = checked_len(s.len())?;
                self.put_int(buf, len);
                buf.put_slice(s.as_bytes());
                buf.put_bytes(b' ', padded_len(s.len()) - s.len());
            }
            Value::Blob(data) => {
                let len = checked_len(data.len())?;
                self.put_int(buf, len);
                buf.put_slice(data);
            }
        }
        Ok(())
    }

    /// Encode a bare Int32 with no tag (handshake word, file header)
    pub fn encode_raw_int(&self, value: i32, buf: &mut BytesMut) {
        self.put_int(buf, value);
    }

    /// Attempt to decode a frame from the buffer.
    /// Returns Ok(None) if more data is needed; the buffer is left untouched in that case.
    pub fn decode(&self, buf: &mut BytesMut) -> CodecResult<Option<Value>> {
        let mut src = &buf[..];
        let value = need!(self.parse(&mut src)?);
        let consumed = buf.len() - src.len();
        buf.advance(consumed);
        Ok(Some(value))
    }

    /// Attempt to decode a bare Int32 with no tag
    pub fn decode_raw_int(&self, buf: &mut BytesMut) -> Option<i32> {
        let mut src = &buf[..];
        let value = self.take_int(&mut src)?;
        let consumed = buf.len() - src.len();
        buf.advance(consumed);
        Some(value)
    }

    fn parse(&self, src: &mut &[u8]) -> CodecResult<Option<Value>> {
        let code = need!(self.take_int(src));
        let tag = Tag::from_code(code)
            .filter(|tag| self.dialect.accepts(*tag))
            .ok_or(CodecError::UnknownTag(code))?;

        let value = match tag {
            Tag::Int => Value::Int(need!(self.take_int(src))),
            Tag::Float => Value::Float(need!(take_f64(src))),
            Tag::Vec2 => {
                if src.len() < 16 {
                    return Ok(None);
                }
                Value::Vec2([src.get_f64_le(), src.get_f64_le()])
            }
            Tag::Vec3 => {
                if src.len() < 24 {
                    return Ok(None);
                }
                Value::Vec3([src.get_f64_le(), src.get_f64_le(), src.get_f64_le()])
            }
            Tag::Bool => Value::Bool(need!(self.take_int(src)) != 0),
            Tag::Text => {
                let len = payload_len(need!(self.take_int(src)))?;
                let padded = padded_len(len);
                if src.len() < padded {
                    return Ok(None);
                }
                // filler after `len` is never exposed; bytes that are not
                // UTF-8 become U+FFFD so the frame is still consumed whole
                let text = String::from_utf8_lossy(&src[..len]).into_owned();
                src.advance(padded);
                Value::Text(text)
            }
            Tag::Blob => {
                let len = payload_len(need!(self.take_int(src)))?;
                if src.len() < len {
                    return Ok(None);
                }
                let data = Bytes::copy_from_slice(&src[..len]);
                src.advance(len);
                Value::Blob(data)
            }
        };
        Ok(Some(value))
    }

    fn put_int(&self, buf: &mut BytesMut, value: i32) {
        buf.put_i32_le(value);
        if self.layout == IntLayout::Padded {
            buf.put_i32_le(0);
        }
    }

    fn take_int(&self, src: &mut &[u8]) -> Option<i32> {
        if src.len() < self.layout.width() {
            return None;
        }
        let value = src.get_i32_le();
        if self.layout == IntLayout::Padded {
            src.advance(4);
        }
        Some(value)
    }
}

fn take_f64(src: &mut &[u8]) -> Option<f64> {
    if src.len() < 8 {
        return None;
    }
    Some(src.get_f64_le())
}

fn checked_len(len: usize) -> CodecResult<i32> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(len, MAX_PAYLOAD_SIZE));
    }
    Ok(len as i32)
}

fn payload_len(len: i32) -> CodecResult<usize> {
    let len = usize::try_from(len).map_err(|_| CodecError::NegativeLength(len))?;
    if len > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(len, MAX_PAYLOAD_SIZE));
    }
    Ok(len)
}
