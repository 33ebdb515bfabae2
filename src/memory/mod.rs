//! Output pixel memory: process heap or anonymous shared memory.
//!
//! A [`PixelBuffer`] has exactly one owner and releases its memory on drop
//! according to how it was obtained. The requested size is always checked
//! against [`Limits`] before anything is allocated.

mod heap;
#[cfg(unix)]
mod shared;

pub use heap::HeapBuffer;
#[cfg(unix)]
pub use shared::SharedMemory;

use log::debug;

use crate::error::ImageError;
use crate::limits::Limits;

/// Where a pixel buffer lives. The discriminant is the marshaled value.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum AllocatorType {
    /// Private process heap, zero-filled.
    #[default]
    Heap = 1,
    /// Anonymous shared memory whose descriptor can be sent to another process.
    SharedMemory = 2,
}

impl AllocatorType {
    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Heap),
            2 => Some(Self::SharedMemory),
            _ => None,
        }
    }
}

/// An owned, zero-initialized pixel memory region.
#[derive(Debug)]
pub enum PixelBuffer {
    Heap(HeapBuffer),
    #[cfg(unix)]
    Shared(SharedMemory),
}

impl PixelBuffer {
    /// Allocate `byte_count` zeroed bytes with `allocator`.
    ///
    /// Fails with a too-large error before allocating if `byte_count` exceeds
    /// `limits`; nothing is retained on any failure.
    pub fn allocate(
        byte_count: usize,
        allocator: AllocatorType,
        limits: &Limits,
    ) -> Result<Self, ImageError> {
        if byte_count == 0 {
            return Err(ImageError::InvalidParameter(
                "zero-sized pixel buffer".into(),
            ));
        }
        limits.check_memory(byte_count)?;
        debug!("allocating {byte_count} byte pixel buffer ({allocator:?})");
        match allocator {
            AllocatorType::Heap => Ok(Self::Heap(HeapBuffer::zeroed(byte_count)?)),
            #[cfg(unix)]
            AllocatorType::SharedMemory => Ok(Self::Shared(SharedMemory::create(
                "zenpixmap",
                byte_count,
            )?)),
            #[cfg(not(unix))]
            AllocatorType::SharedMemory => Err(ImageError::UnsupportedVariant(
                "shared memory requires a unix platform".into(),
            )),
        }
    }

    pub fn allocator_type(&self) -> AllocatorType {
        match self {
            Self::Heap(_) => AllocatorType::Heap,
            #[cfg(unix)]
            Self::Shared(_) => AllocatorType::SharedMemory,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Heap(h) => h.as_slice(),
            #[cfg(unix)]
            Self::Shared(s) => s.as_slice(),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Heap(h) => h.as_mut_slice(),
            #[cfg(unix)]
            Self::Shared(s) => s.as_mut_slice(),
        }
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }

    /// The shared-memory descriptor, if this buffer has one.
    #[cfg(unix)]
    pub fn fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        match self {
            Self::Heap(_) => None,
            Self::Shared(s) => Some(s.fd()),
        }
    }

    /// Deep copy into a new buffer of the same allocator type.
    pub fn try_clone(&self, limits: &Limits) -> Result<Self, ImageError> {
        let mut copy = Self::allocate(self.len(), self.allocator_type(), limits)?;
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        Ok(copy)
    }
}
