use alloc::vec::Vec;

use crate::error::ImageError;

/// Pixel memory on the process heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapBuffer {
    data: Vec<u8>,
}

impl HeapBuffer {
    /// Allocate `len` zero bytes, reporting failure instead of aborting.
    pub fn zeroed(len: usize) -> Result<Self, ImageError> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ImageError::MallocAbnormal(len))?;
        data.resize(len, 0);
        Ok(Self { data })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}
