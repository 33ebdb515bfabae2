use alloc::vec::Vec;

use log::debug;

use super::{SourceStream, check_request};
use crate::error::ImageError;

/// A stream fed chunk by chunk as bytes arrive.
///
/// Starts empty. [`update_data`](SourceStream::update_data) appends; the
/// chunk flagged as last marks the stream completed, after which further
/// data is rejected.
#[derive(Clone, Debug, Default)]
pub struct IncrementalSourceStream {
    data: Vec<u8>,
    pos: usize,
    completed: bool,
}

impl IncrementalSourceStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the internal buffer when the final size is known upfront.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }
}

impl SourceStream for IncrementalSourceStream {
    fn peek(&mut self, desired: usize) -> Result<&[u8], ImageError> {
        let n = check_request(desired, self.pos, self.data.len(), self.completed)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    fn read(&mut self, desired: usize) -> Result<&[u8], ImageError> {
        let n = check_request(desired, self.pos, self.data.len(), self.completed)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    fn seek(&mut self, position: usize) -> Result<(), ImageError> {
        if position > self.data.len() {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "seek to {position} past known size {}",
                self.data.len()
            )));
        }
        self.pos = position;
        Ok(())
    }

    fn tell(&self) -> usize {
        self.pos
    }

    fn stream_size(&self) -> usize {
        self.data.len()
    }

    fn is_stream_completed(&self) -> bool {
        self.completed
    }

    fn data(&mut self) -> Result<&[u8], ImageError> {
        Ok(&self.data)
    }

    fn update_data(&mut self, data: &[u8], is_last_chunk: bool) -> Result<(), ImageError> {
        if self.completed {
            return Err(ImageError::InvalidParameter(
                "stream already completed".into(),
            ));
        }
        self.data
            .try_reserve(data.len())
            .map_err(|_| ImageError::MallocAbnormal(data.len()))?;
        self.data.extend_from_slice(data);
        self.completed = is_last_chunk;
        debug!(
            "incremental stream: +{} bytes, {} known, completed={}",
            data.len(),
            self.data.len(),
            self.completed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_incomplete() {
        let mut s = IncrementalSourceStream::new();
        assert_eq!(s.stream_size(), 0);
        assert!(!s.is_stream_completed());
        assert!(matches!(s.peek(1), Err(ImageError::SourceIncomplete)));
    }

    #[test]
    fn reads_grow_with_updates() {
        let mut s = IncrementalSourceStream::new();
        s.update_data(&[1, 2], false).unwrap();
        assert_eq!(s.read(5).unwrap(), &[1, 2]);
        assert!(matches!(s.read(1), Err(ImageError::SourceIncomplete)));
        s.update_data(&[3], true).unwrap();
        assert!(s.is_stream_completed());
        assert_eq!(s.read(5).unwrap(), &[3]);
        assert!(matches!(s.read(1), Err(ImageError::UnexpectedEof)));
    }

    #[test]
    fn data_after_completion_is_rejected() {
        let mut s = IncrementalSourceStream::new();
        s.update_data(&[1], true).unwrap();
        assert!(s.update_data(&[2], false).is_err());
        assert_eq!(s.stream_size(), 1);
    }

    #[test]
    fn seek_is_bounded_by_known_bytes() {
        let mut s = IncrementalSourceStream::new();
        s.update_data(&[0; 10], false).unwrap();
        s.seek(10).unwrap();
        assert!(s.seek(11).is_err());
        assert_eq!(s.tell(), 10);
    }
}
