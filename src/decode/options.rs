use crate::bmp::BmpPermissiveness;
use crate::memory::AllocatorType;
use crate::pixel::{AlphaType, PixelFormat, Rect, Size};

/// What the caller wants the decoded PixelMap to look like.
///
/// Everything defaults to "as decoded": full image, native size,
/// [`PixelFormat::Rgba8888`], alpha chosen from the image, heap memory.
///
/// ```
/// use zenpixmap::{DecodeOptions, PixelFormat, Size};
///
/// let opts = DecodeOptions::new()
///     .with_pixel_format(PixelFormat::Bgra8888)
///     .with_desired_size(Size::new(64, 64))
///     .with_allow_partial_image(true);
/// assert!(opts.allow_partial_image);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Output size after cropping. `None` keeps the crop size.
    pub desired_size: Option<Size>,
    /// Region of the source image to decode. `None` is the whole image.
    pub crop: Option<Rect>,
    /// Requested layout. `Unknown` means `Rgba8888`.
    pub pixel_format: PixelFormat,
    /// Requested alpha semantics. `Unknown` picks from the image.
    pub alpha_type: AlphaType,
    pub allocator: AllocatorType,
    /// Return whatever was decoded when the input ends early.
    pub allow_partial_image: bool,
    /// Density tag carried into the PixelMap.
    pub base_density: i32,
    pub bmp_permissiveness: BmpPermissiveness,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            desired_size: None,
            crop: None,
            pixel_format: PixelFormat::Unknown,
            alpha_type: AlphaType::Unknown,
            allocator: AllocatorType::Heap,
            allow_partial_image: false,
            base_density: 0,
            bmp_permissiveness: BmpPermissiveness::Standard,
        }
    }
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scale the (cropped) image to `size`.
    pub fn with_desired_size(mut self, size: Size) -> Self {
        self.desired_size = Some(size);
        self
    }

    /// Decode only `rect` of the source image.
    pub fn with_crop(mut self, rect: Rect) -> Self {
        self.crop = Some(rect);
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_alpha_type(mut self, alpha: AlphaType) -> Self {
        self.alpha_type = alpha;
        self
    }

    pub fn with_allocator(mut self, allocator: AllocatorType) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_allow_partial_image(mut self, allow: bool) -> Self {
        self.allow_partial_image = allow;
        self
    }

    pub fn with_base_density(mut self, density: i32) -> Self {
        self.base_density = density;
        self
    }

    pub fn with_bmp_permissiveness(mut self, level: BmpPermissiveness) -> Self {
        self.bmp_permissiveness = level;
        self
    }
}
