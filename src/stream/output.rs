use alloc::vec::Vec;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::ImageError;

/// Byte sink that encoders write through.
pub trait OutputStream {
    /// Append `data`.
    fn write(&mut self, data: &[u8]) -> Result<(), ImageError>;

    /// Push buffered bytes to the destination.
    fn flush(&mut self) -> Result<(), ImageError> {
        Ok(())
    }

    /// Total bytes accepted so far.
    fn written(&self) -> usize;
}

/// Sink into a growable buffer, optionally capped.
#[derive(Clone, Debug, Default)]
pub struct BufferPackerStream {
    buf: Vec<u8>,
    max_size: Option<usize>,
}

impl BufferPackerStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would grow the buffer past `max_size` bytes.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_size: Some(max_size),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl OutputStream for BufferPackerStream {
    fn write(&mut self, data: &[u8]) -> Result<(), ImageError> {
        let needed = self.buf.len() + data.len();
        if let Some(max) = self.max_size
            && needed > max
        {
            return Err(ImageError::BufferTooSmall {
                needed,
                actual: max,
            });
        }
        self.buf
            .try_reserve(data.len())
            .map_err(|_| ImageError::MallocAbnormal(data.len()))?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn written(&self) -> usize {
        self.buf.len()
    }
}

/// Sink into a file.
#[derive(Debug)]
pub struct FilePackerStream {
    out: BufWriter<File>,
    written: usize,
}

impl FilePackerStream {
    /// Create (or truncate) `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        Ok(Self::from_file(File::create(path)?))
    }

    pub fn from_file(file: File) -> Self {
        Self {
            out: BufWriter::new(file),
            written: 0,
        }
    }
}

impl OutputStream for FilePackerStream {
    fn write(&mut self, data: &[u8]) -> Result<(), ImageError> {
        self.out.write_all(data)?;
        self.written += data.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ImageError> {
        self.out.flush()?;
        Ok(())
    }

    fn written(&self) -> usize {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_respects_cap() {
        let mut sink = BufferPackerStream::with_max_size(4);
        sink.write(&[1, 2, 3]).unwrap();
        assert!(sink.write(&[4, 5]).is_err());
        sink.write(&[4]).unwrap();
        assert_eq!(sink.written(), 4);
        assert_eq!(sink.into_inner(), [1, 2, 3, 4]);
    }

    #[test]
    fn file_sink_counts_bytes() {
        let path = std::env::temp_dir().join(alloc::format!(
            "zenpixmap-{}-sink",
            std::process::id()
        ));
        let mut sink = FilePackerStream::create(&path).unwrap();
        sink.write(b"hello").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.written(), 5);
        drop(sink);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        std::fs::remove_file(path).unwrap();
    }
}
