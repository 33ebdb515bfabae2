/// Hard cap on a single output buffer (600 MiB).
///
/// Applies even when every optional limit is `None`; sizes computed from
/// hostile headers are rejected here before any allocation is attempted.
pub const DEFAULT_MAX_ALLOC_BYTES: u64 = 600 * 1024 * 1024;

/// Resource limits for decode operations.
///
/// The optional fields default to `None` (no limit). `max_alloc_bytes` is
/// always enforced.
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_width: Option<u64>,
    pub max_height: Option<u64>,
    /// Maximum pixel count (width * height).
    pub max_pixels: Option<u64>,
    /// Maximum memory bytes for output buffer allocation.
    pub max_memory_bytes: Option<u64>,
    /// Hard maximum for any single pixel buffer.
    pub max_alloc_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_width: None,
            max_height: None,
            max_pixels: None,
            max_memory_bytes: None,
            max_alloc_bytes: DEFAULT_MAX_ALLOC_BYTES,
        }
    }
}

impl Limits {
    /// Set maximum width in pixels.
    pub fn with_max_width(mut self, max: u64) -> Self {
        self.max_width = Some(max);
        self
    }

    /// Set maximum height in pixels.
    pub fn with_max_height(mut self, max: u64) -> Self {
        self.max_height = Some(max);
        self
    }

    /// Set maximum pixel count.
    pub fn with_max_pixels(mut self, max: u64) -> Self {
        self.max_pixels = Some(max);
        self
    }

    /// Set maximum output memory in bytes.
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    /// Lower (or raise) the hard allocation cap.
    pub fn with_max_alloc(mut self, bytes: u64) -> Self {
        self.max_alloc_bytes = bytes;
        self
    }

    /// Check dimensions against limits. Returns Ok(()) or LimitExceeded error.
    pub(crate) fn check(&self, width: u32, height: u32) -> Result<(), crate::ImageError> {
        if let Some(max_w) = self.max_width
            && u64::from(width) > max_w
        {
            return Err(crate::ImageError::LimitExceeded(alloc::format!(
                "width {width} exceeds limit {max_w}"
            )));
        }
        if let Some(max_h) = self.max_height
            && u64::from(height) > max_h
        {
            return Err(crate::ImageError::LimitExceeded(alloc::format!(
                "height {height} exceeds limit {max_h}"
            )));
        }
        if let Some(max_px) = self.max_pixels {
            let pixels = u64::from(width) * u64::from(height);
            if pixels > max_px {
                return Err(crate::ImageError::LimitExceeded(alloc::format!(
                    "pixel count {pixels} exceeds limit {max_px}"
                )));
            }
        }
        Ok(())
    }

    /// Check that an allocation size is within memory limits.
    pub(crate) fn check_memory(&self, bytes: usize) -> Result<(), crate::ImageError> {
        let bytes = bytes as u64;
        if bytes > self.max_alloc_bytes {
            return Err(crate::ImageError::LimitExceeded(alloc::format!(
                "allocation {bytes} bytes exceeds hard maximum {}",
                self.max_alloc_bytes
            )));
        }
        if let Some(max_mem) = self.max_memory_bytes
            && bytes > max_mem
        {
            return Err(crate::ImageError::LimitExceeded(alloc::format!(
                "allocation {bytes} bytes exceeds memory limit {max_mem}"
            )));
        }
        Ok(())
    }
}
