//! FISH binary file writer

use bytes::BytesMut;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{FileLayout, FishError, FishResult};
use crate::protocol::{Dialect, FrameCodec, Tag, Value, FISH_MAGIC};

/// Writes Int and Float values to a FISH binary file
pub struct FishWriter<W: Write = BufWriter<File>> {
    sink: W,
    codec: FrameCodec,
    buf: BytesMut,
    count: usize,
}

impl FishWriter {
    /// Create (or truncate) a file and write the header
    pub fn create(path: impl AsRef<Path>, layout: FileLayout) -> FishResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Creating FISH file {}", path.display());
        Self::new(BufWriter::new(File::create(path)?), layout)
    }

    /// Write a whole file in one go.
    ///
    /// Every value is checked before the file is touched, so an unsupported value
    /// leaves no partial file behind.
    pub fn write_file<I>(path: impl AsRef<Path>, values: I, layout: FileLayout) -> FishResult<usize>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if let Some(bad) = values.iter().find(|v| !writable(v.tag())) {
            return Err(FishError::UnsupportedWrite(bad.tag()));
        }

        let mut writer = Self::create(path, layout)?;
        for value in &values {
            writer.write(value)?;
        }
        let count = writer.count();
        writer.finish()?;
        Ok(count)
    }
}

impl<W: Write> FishWriter<W> {
    pub fn new(mut sink: W, layout: FileLayout) -> FishResult<Self> {
        let codec = FrameCodec::new(Dialect::File).with_layout(layout.into());
        let mut buf = BytesMut::with_capacity(64);
        codec.encode_raw_int(FISH_MAGIC, &mut buf);
        sink.write_all(&buf)?;

        Ok(Self {
            sink,
            codec,
            buf,
            count: 0,
        })
    }

    /// Append one value; only Int and Float are accepted
    pub fn write(&mut self, value: &Value) -> FishResult<()> {
        if !writable(value.tag()) {
            return Err(FishError::UnsupportedWrite(value.tag()));
        }
        self.buf.clear();
        self.codec.encode(value, &mut self.buf)?;
        self.sink.write_all(&self.buf)?;
        self.count += 1;
        Ok(())
    }

    /// Number of values written so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> FishResult<W> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}

fn writable(tag: Tag) -> bool {
    matches!(tag, Tag::Int | Tag::Float)
}
