use alloc::vec::Vec;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::{SourceStream, check_request};
use crate::error::ImageError;

/// A file read on demand.
///
/// The stream owns its own handle: opened from a path, or duplicated from a
/// caller's descriptor. The caller's descriptor is never closed or moved.
#[derive(Debug)]
pub struct FileSourceStream {
    file: File,
    size: usize,
    pos: usize,
    /// Bytes most recently pulled from the file, starting at `window_start`.
    window: Vec<u8>,
    window_start: usize,
    /// Whole-file copy, filled the first time `data()` is requested.
    whole: Option<Vec<u8>>,
}

impl FileSourceStream {
    /// Open `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        Self::from_file(File::open(path)?)
    }

    /// Duplicate `fd` and read through the duplicate.
    #[cfg(unix)]
    pub fn from_fd(fd: std::os::fd::BorrowedFd<'_>) -> Result<Self, ImageError> {
        let owned = fd.try_clone_to_owned()?;
        let mut stream = Self::from_file(File::from(owned))?;
        stream.file.seek(SeekFrom::Start(0))?;
        Ok(stream)
    }

    /// Read through an already-open file, from its start.
    pub fn from_file(file: File) -> Result<Self, ImageError> {
        let len = file.metadata()?.len();
        let size = usize::try_from(len)
            .map_err(|_| ImageError::LimitExceeded(alloc::format!("file of {len} bytes")))?;
        Ok(Self {
            file,
            size,
            pos: 0,
            window: Vec::new(),
            window_start: 0,
            whole: None,
        })
    }

    fn window_covers(&self, start: usize, len: usize) -> bool {
        start >= self.window_start && start + len <= self.window_start + self.window.len()
    }

    fn load(&mut self, n: usize) -> Result<(), ImageError> {
        if self.whole.is_some() || self.window_covers(self.pos, n) {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.pos as u64))?;
        self.window.clear();
        self.window.resize(n, 0);
        self.file.read_exact(&mut self.window)?;
        self.window_start = self.pos;
        Ok(())
    }

    fn slice(&self, start: usize, n: usize) -> &[u8] {
        match &self.whole {
            Some(all) => &all[start..start + n],
            None => {
                let off = start - self.window_start;
                &self.window[off..off + n]
            }
        }
    }
}

impl SourceStream for FileSourceStream {
    fn peek(&mut self, desired: usize) -> Result<&[u8], ImageError> {
        let n = check_request(desired, self.pos, self.size, true)?;
        self.load(n)?;
        Ok(self.slice(self.pos, n))
    }

    fn read(&mut self, desired: usize) -> Result<&[u8], ImageError> {
        let n = check_request(desired, self.pos, self.size, true)?;
        self.load(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(self.slice(start, n))
    }

    fn seek(&mut self, position: usize) -> Result<(), ImageError> {
        if position > self.size {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "seek to {position} past file size {}",
                self.size
            )));
        }
        self.pos = position;
        Ok(())
    }

    fn tell(&self) -> usize {
        self.pos
    }

    fn stream_size(&self) -> usize {
        self.size
    }

    fn is_stream_completed(&self) -> bool {
        true
    }

    fn data(&mut self) -> Result<&[u8], ImageError> {
        if self.whole.is_none() {
            let mut all = Vec::new();
            all.try_reserve_exact(self.size)
                .map_err(|_| ImageError::MallocAbnormal(self.size))?;
            self.file.seek(SeekFrom::Start(0))?;
            (&mut self.file).take(self.size as u64).read_to_end(&mut all)?;
            if all.len() != self.size {
                return Err(ImageError::UnexpectedEof);
            }
            self.window = Vec::new();
            self.whole = Some(all);
        }
        Ok(self.whole.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(alloc::format!(
            "zenpixmap-{}-{name}",
            std::process::id()
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn reads_peeks_and_seeks() {
        let path = temp_file("rps", b"0123456789");
        let mut s = FileSourceStream::open(&path).unwrap();
        assert_eq!(s.stream_size(), 10);
        assert_eq!(s.peek(3).unwrap(), b"012");
        assert_eq!(s.read(4).unwrap(), b"0123");
        s.seek(8).unwrap();
        assert_eq!(s.read(5).unwrap(), b"89");
        assert!(matches!(s.read(1), Err(ImageError::UnexpectedEof)));
        assert!(s.seek(11).is_err());
        assert_eq!(s.tell(), 10);
        assert_eq!(s.data().unwrap(), b"0123456789");
        s.seek(2).unwrap();
        assert_eq!(s.read(2).unwrap(), b"23");
        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn fd_is_duplicated_not_taken() {
        use std::os::fd::AsFd;
        let path = temp_file("dup", b"abc");
        let original = File::open(&path).unwrap();
        {
            let mut s = FileSourceStream::from_fd(original.as_fd()).unwrap();
            assert_eq!(s.read(3).unwrap(), b"abc");
        }
        // The caller's handle is still usable after the stream is dropped.
        assert_eq!(original.metadata().unwrap().len(), 3);
        std::fs::remove_file(path).unwrap();
    }
}
