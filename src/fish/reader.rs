//! FISH binary file reader

use bytes::BytesMut;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::{FileLayout, FishError, FishResult};
use crate::protocol::{Dialect, FrameCodec, Tag, Value, FISH_MAGIC};

const CHUNK_SIZE: usize = 8192;

/// Reads values one at a time from a FISH binary file.
///
/// The header is checked on construction. `read` returns
/// [`FishError::EndOfSequence`] once every value has been consumed, and the
/// `Iterator` impl stops there.
pub struct FishReader<R = BufReader<File>> {
    source: R,
    codec: FrameCodec,
    buf: BytesMut,
    eof: bool,
    done: bool,
}

impl FishReader {
    /// Open a file written with 4 byte integers
    pub fn open(path: impl AsRef<Path>) -> FishResult<Self> {
        Self::open_with_layout(path, FileLayout::Standard)
    }

    pub fn open_with_layout(path: impl AsRef<Path>, layout: FileLayout) -> FishResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Opening FISH file {}", path.display());
        let file = File::open(path)?;
        Self::new(BufReader::new(file), layout)
    }
}

impl<R: Read> FishReader<R> {
    /// Wrap any reader; fails with `BadFileFormat` unless it starts with the magic number
    pub fn new(source: R, layout: FileLayout) -> FishResult<Self> {
        let mut reader = Self {
            source,
            codec: FrameCodec::new(Dialect::File).with_layout(layout.into()),
            buf: BytesMut::with_capacity(CHUNK_SIZE),
            eof: false,
            done: false,
        };
        reader.read_header()?;
        Ok(reader)
    }

    /// Read the next value
    pub fn read(&mut self) -> FishResult<Value> {
        loop {
            if let Some(value) = self.codec.decode(&mut self.buf)? {
                return Ok(value);
            }
            if self.eof {
                return if self.buf.is_empty() {
                    Err(FishError::EndOfSequence)
                } else {
                    Err(FishError::Truncated)
                };
            }
            self.fill()?;
        }
    }

    /// Read every remaining value
    pub fn read_all(&mut self) -> FishResult<Vec<Value>> {
        self.by_ref().collect()
    }

    /// Read every remaining value as a float; the file must hold only floats
    pub fn read_floats(&mut self) -> FishResult<Vec<f64>> {
        self.by_ref()
            .map(|value| {
                let value = value?;
                value.as_float().ok_or(FishError::UnexpectedValue {
                    expected: Tag::Float,
                    found: value.tag(),
                })
            })
            .collect()
    }

    /// Read every remaining value as 3-vectors, either as Vec3 values or as
    /// consecutive float triplets
    pub fn read_vec3s(&mut self) -> FishResult<Vec<[f64; 3]>> {
        let mut out = Vec::new();
        let mut pending = Vec::with_capacity(3);
        for value in self.by_ref() {
            match value? {
                Value::Vec3(v) if pending.is_empty() => out.push(v),
                Value::Float(x) => {
                    pending.push(x);
                    if pending.len() == 3 {
                        out.push([pending[0], pending[1], pending[2]]);
                        pending.clear();
                    }
                }
                other => {
                    return Err(FishError::UnexpectedValue {
                        expected: Tag::Float,
                        found: other.tag(),
                    })
                }
            }
        }
        if !pending.is_empty() {
            return Err(FishError::RaggedTriplets(pending.len()));
        }
        Ok(out)
    }

    fn read_header(&mut self) -> FishResult<()> {
        loop {
            if let Some(magic) = self.codec.decode_raw_int(&mut self.buf) {
                if magic != FISH_MAGIC {
                    return Err(FishError::BadFileFormat { found: Some(magic) });
                }
                return Ok(());
            }
            if self.eof {
                return Err(FishError::BadFileFormat { found: None });
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> FishResult<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let n = self.source.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}

impl<R: Read + Seek> FishReader<R> {
    /// Go back to the first value after the header
    pub fn rewind(&mut self) -> FishResult<()> {
        self.source.seek(SeekFrom::Start(0))?;
        self.buf.clear();
        self.eof = false;
        self.done = false;
        self.read_header()
    }
}

impl<R: Read> Iterator for FishReader<R> {
    type Item = FishResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read() {
            Ok(value) => Some(Ok(value)),
            Err(FishError::EndOfSequence) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
