use alloc::vec::Vec;

use super::{SourceStream, check_request};
use crate::error::ImageError;

/// A complete input held in a private heap copy.
#[derive(Clone, Debug)]
pub struct BufferSourceStream {
    data: Vec<u8>,
    pos: usize,
}

impl BufferSourceStream {
    /// Copy `data` into a new stream.
    pub fn new(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Take ownership of `data` without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl SourceStream for BufferSourceStream {
    fn peek(&mut self, desired: usize) -> Result<&[u8], ImageError> {
        let n = check_request(desired, self.pos, self.data.len(), true)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    fn read(&mut self, desired: usize) -> Result<&[u8], ImageError> {
        let n = check_request(desired, self.pos, self.data.len(), true)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    fn seek(&mut self, position: usize) -> Result<(), ImageError> {
        if position > self.data.len() {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "seek to {position} past stream size {}",
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
        true
    }

    fn data(&mut self) -> Result<&[u8], ImageError> {
        Ok(&self.data)
    }
}
