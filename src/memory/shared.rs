//! Anonymous shared memory: a mapping and the descriptor that backs it, owned
//! together.
#![allow(unsafe_code)]

use core::ptr::NonNull;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use log::{debug, warn};

use crate::error::ImageError;

/// A read/write shared mapping plus its descriptor.
///
/// Dropping unmaps the region and then closes the descriptor. There is no
/// way to release one without the other.
#[derive(Debug)]
pub struct SharedMemory {
    ptr: NonNull<u8>,
    len: usize,
    fd: OwnedFd,
}

// SAFETY: the mapping is exclusively owned by this value; access goes through
// `&self`/`&mut self`.
unsafe impl Send for SharedMemory {}
// SAFETY: shared references only hand out `&[u8]`.
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Create a new anonymous segment of `len` zero bytes and map it.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn create(name: &str, len: usize) -> Result<Self, ImageError> {
        let cname = std::ffi::CString::new(name)
            .map_err(|_| ImageError::InvalidParameter("shared memory name has NUL".into()))?;
        // SAFETY: `cname` is a valid NUL-terminated string for the duration of the call.
        let raw = unsafe { libc::memfd_create(cname.as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            warn!("memfd_create failed: {}", std::io::Error::last_os_error());
            return Err(ImageError::MallocAbnormal(len));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(raw) };
        let file = File::from(fd);
        if let Err(e) = file.set_len(len as u64) {
            warn!("sizing shared memory to {len} bytes failed: {e}");
            return Err(ImageError::MallocAbnormal(len));
        }
        Self::map(OwnedFd::from(file), len)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn create(_name: &str, _len: usize) -> Result<Self, ImageError> {
        Err(ImageError::UnsupportedVariant(
            "anonymous shared memory is only available on linux and android".into(),
        ))
    }

    /// Map `len` bytes of an existing segment, taking ownership of `fd`.
    ///
    /// Fails if `fd` does not refer to a segment of at least `len` bytes.
    pub fn map(fd: OwnedFd, len: usize) -> Result<Self, ImageError> {
        if len == 0 {
            return Err(ImageError::InvalidParameter(
                "cannot map an empty segment".into(),
            ));
        }
        let size = File::from(fd.try_clone()?)
            .metadata()
            .map_err(|e| ImageError::Parcel(alloc::format!("invalid descriptor: {e}")))?
            .len();
        if size < len as u64 {
            return Err(ImageError::Parcel(alloc::format!(
                "segment holds {size} bytes, {len} required"
            )));
        }
        // SAFETY: mapping a descriptor we own with a non-zero length; the
        // result is checked against MAP_FAILED below.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            warn!("mmap of {len} bytes failed: {}", std::io::Error::last_os_error());
            return Err(ImageError::MallocAbnormal(len));
        }
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(ImageError::MallocAbnormal(len))?;
        debug!("mapped {len} bytes of shared memory (fd {})", fd.as_raw_fd());
        Ok(Self { ptr, len, fd })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` maps `len` readable bytes for the lifetime of `self`.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` maps `len` writable bytes and `&mut self` is unique.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// The backing descriptor.
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// A new descriptor for the same segment, for handing to another owner.
    pub fn try_clone_fd(&self) -> Result<OwnedFd, ImageError> {
        Ok(self.fd.try_clone()?)
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a mapping created in `map` and never
        // unmapped elsewhere. The descriptor closes after this body runs.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if rc != 0 {
            warn!("munmap failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "android")))]
mod tests {
    use super::*;

    #[test]
    fn second_mapping_sees_writes() {
        let mut a = SharedMemory::create("test", 128).unwrap();
        a.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
        let b = SharedMemory::map(a.try_clone_fd().unwrap(), 128).unwrap();
        assert_eq!(&b.as_slice()[..4], &[1, 2, 3, 4]);
        drop(a);
        // The second owner's mapping survives the first owner's release.
        assert_eq!(b.as_slice()[3], 4);
    }

    #[test]
    fn mapping_more_than_segment_fails() {
        let a = SharedMemory::create("test", 16).unwrap();
        let err = SharedMemory::map(a.try_clone_fd().unwrap(), 17).unwrap_err();
        assert!(matches!(err, ImageError::Parcel(_)));
    }
}
