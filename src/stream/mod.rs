//! Pull-based byte sources that every decoder reads through, and the byte
//! sinks encoders write to.
//!
//! Three [`SourceStream`] variants exist:
//! - [`BufferSourceStream`]: a private heap copy of a complete input.
//! - [`FileSourceStream`]: a path or duplicated descriptor, read on demand.
//! - [`IncrementalSourceStream`]: starts empty and grows through
//!   [`SourceStream::update_data`] until the last chunk arrives.
//!
//! Reads that address bytes which have not arrived yet fail with
//! [`ImageError::SourceIncomplete`]; the same read on a completed stream
//! fails with [`ImageError::UnexpectedEof`]. Callers retry the former after
//! feeding more data and treat the latter as truncated input.

mod buffer;
mod file;
mod incremental;
mod output;

pub use buffer::BufferSourceStream;
pub use file::FileSourceStream;
pub use incremental::IncrementalSourceStream;
pub use output::{BufferPackerStream, FilePackerStream, OutputStream};

use crate::error::ImageError;

/// A seekable, pull-based byte source.
pub trait SourceStream: Send {
    /// Up to `desired` bytes at the cursor, without moving it.
    ///
    /// Never returns an empty slice: fails if `desired == 0` or no byte is
    /// available at the cursor.
    fn peek(&mut self, desired: usize) -> Result<&[u8], ImageError>;

    /// As [`peek`](SourceStream::peek), then advances the cursor by the
    /// returned length.
    fn read(&mut self, desired: usize) -> Result<&[u8], ImageError>;

    /// Move the cursor. Fails without moving it if `position` is past the
    /// known size.
    fn seek(&mut self, position: usize) -> Result<(), ImageError>;

    /// Current cursor position.
    fn tell(&self) -> usize;

    /// Bytes known so far. Final once the stream is completed.
    fn stream_size(&self) -> usize;

    /// True once no more bytes will ever be supplied.
    fn is_stream_completed(&self) -> bool;

    /// Every known byte, contiguous.
    fn data(&mut self) -> Result<&[u8], ImageError>;

    /// Append bytes to an incremental stream.
    ///
    /// Only [`IncrementalSourceStream`] accepts data; other variants are
    /// complete from construction.
    fn update_data(&mut self, data: &[u8], is_last_chunk: bool) -> Result<(), ImageError> {
        let _ = (data, is_last_chunk);
        Err(ImageError::InvalidParameter(
            "stream does not accept incremental data".into(),
        ))
    }

    /// Bytes between the cursor and the end of known data.
    fn remaining(&self) -> usize {
        self.stream_size().saturating_sub(self.tell())
    }

    /// The error for a read that runs past the known data.
    fn shortfall(&self) -> ImageError {
        if self.is_stream_completed() {
            ImageError::UnexpectedEof
        } else {
            ImageError::SourceIncomplete
        }
    }

    /// Exactly `len` bytes at the cursor, without moving it.
    fn peek_exact(&mut self, len: usize) -> Result<&[u8], ImageError> {
        if self.remaining() < len {
            return Err(self.shortfall());
        }
        self.peek(len)
    }

    /// Exactly `len` bytes at the cursor, advancing past them.
    fn read_exact(&mut self, len: usize) -> Result<&[u8], ImageError> {
        if self.remaining() < len {
            return Err(self.shortfall());
        }
        self.read(len)
    }
}

/// Validate a peek/read request against the cursor. Shared by the variants.
pub(crate) fn check_request(
    desired: usize,
    position: usize,
    known: usize,
    completed: bool,
) -> Result<usize, ImageError> {
    if desired == 0 {
        return Err(ImageError::InvalidParameter(
            "zero-length stream request".into(),
        ));
    }
    if position >= known {
        return Err(if completed {
            ImageError::UnexpectedEof
        } else {
            ImageError::SourceIncomplete
        });
    }
    Ok(desired.min(known - position))
}

/// [`std::io::Read`] over a [`SourceStream`].
///
/// This is the byte-source callback handed to external codec crates. Missing
/// bytes surface as end-of-file; the caller consults the stream's completion
/// flag to tell "wait for more" from "truncated".
pub struct StreamReader<'a> {
    stream: &'a mut dyn SourceStream,
}

impl<'a> StreamReader<'a> {
    pub fn new(stream: &'a mut dyn SourceStream) -> Self {
        Self { stream }
    }
}

impl std::io::Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.read(buf.len()) {
            Ok(bytes) => {
                let n = bytes.len();
                buf[..n].copy_from_slice(bytes);
                Ok(n)
            }
            Err(ImageError::SourceIncomplete | ImageError::UnexpectedEof) => Ok(0),
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn reader_drains_stream_then_reports_eof() {
        let mut stream = BufferSourceStream::new(&[1, 2, 3, 4, 5]);
        let mut reader = StreamReader::new(&mut stream);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert_eq!(stream.tell(), 5);
    }

    #[test]
    fn exact_reads_distinguish_incomplete_from_eof() {
        let mut stream = IncrementalSourceStream::new();
        stream.update_data(&[1, 2], false).unwrap();
        assert!(matches!(
            stream.read_exact(3),
            Err(ImageError::SourceIncomplete)
        ));
        assert_eq!(stream.tell(), 0);
        stream.update_data(&[], true).unwrap();
        assert!(matches!(stream.read_exact(3), Err(ImageError::UnexpectedEof)));
        assert_eq!(stream.read_exact(2).unwrap(), &[1, 2]);
    }
}
