//! Moving PixelMaps between processes.
//!
//! A [`MessageParcel`] carries plain bytes plus a queue of descriptors.
//! [`PixelMap::marshal`](crate::PixelMap::marshal) writes a map into one;
//! [`socket`] moves a parcel over a Unix stream socket with the descriptors
//! in `SCM_RIGHTS` ancillary data.

mod marshal;
pub mod socket;

pub use marshal::MAX_MARSHAL_BYTES;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use crate::error::ImageError;

/// Little-endian data bytes plus owned descriptors, read back in the order
/// they were written.
#[derive(Debug, Default)]
pub struct MessageParcel {
    data: Vec<u8>,
    pos: usize,
    fds: VecDeque<OwnedFd>,
}

impl MessageParcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble a received parcel, positioned at its start.
    pub fn from_parts(data: Vec<u8>, fds: Vec<OwnedFd>) -> Self {
        Self {
            data,
            pos: 0,
            fds: fds.into(),
        }
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<OwnedFd>) {
        (self.data, self.fds.into())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Descriptors not yet taken, in queue order.
    pub fn fds(&self) -> impl Iterator<Item = BorrowedFd<'_>> {
        self.fds.iter().map(|fd| fd.as_fd())
    }

    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Offset of the next read.
    pub fn read_position(&self) -> usize {
        self.pos
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ImageError> {
        self.data
            .try_reserve(bytes.len())
            .map_err(|_| ImageError::MallocAbnormal(bytes.len()))?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Queue a descriptor. The parcel owns it until it is taken or dropped.
    pub fn write_fd(&mut self, fd: OwnedFd) {
        self.fds.push_back(fd);
    }

    pub fn read_i32(&mut self) -> Result<i32, ImageError> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], ImageError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| {
                ImageError::Parcel(alloc::format!(
                    "read of {len} bytes at {} overruns {} byte parcel",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let s = &self.data[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    /// Take the next queued descriptor.
    pub fn take_fd(&mut self) -> Result<OwnedFd, ImageError> {
        self.fds
            .pop_front()
            .ok_or_else(|| ImageError::Parcel("parcel has no descriptor left".into()))
    }
}
