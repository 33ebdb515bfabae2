use crate::error::ImageError;

/// Pixel memory layout of a PixelMap.
///
/// Discriminants are the values written on the wire by marshaling.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum PixelFormat {
    #[default]
    Unknown = 0,
    /// 4 channels, 8-bit A R G B.
    Argb8888 = 1,
    /// 16-bit packed R5 G6 B5 (native endian).
    Rgb565 = 2,
    /// 4 channels, 8-bit R G B A.
    Rgba8888 = 3,
    /// 4 channels, 8-bit B G R A.
    Bgra8888 = 4,
    /// 3 channels, 8-bit R G B.
    Rgb888 = 5,
    /// Single 8-bit alpha channel. Rows are padded to 4 bytes.
    Alpha8 = 6,
    /// 4 channels, IEEE half float R G B A (native endian).
    RgbaF16 = 7,
}

impl PixelFormat {
    /// Bytes per pixel for this format. `Unknown` is 0.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::Alpha8 => 1,
            Self::Rgb565 => 2,
            Self::Rgb888 => 3,
            Self::Argb8888 | Self::Rgba8888 | Self::Bgra8888 => 4,
            Self::RgbaF16 => 8,
        }
    }

    /// Whether the layout carries an alpha channel.
    pub fn has_alpha(&self) -> bool {
        matches!(
            self,
            Self::Argb8888 | Self::Rgba8888 | Self::Bgra8888 | Self::Alpha8 | Self::RgbaF16
        )
    }

    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::Argb8888,
            2 => Self::Rgb565,
            3 => Self::Rgba8888,
            4 => Self::Bgra8888,
            5 => Self::Rgb888,
            6 => Self::Alpha8,
            7 => Self::RgbaF16,
            _ => return None,
        })
    }
}

/// How the alpha channel of a PixelMap is to be interpreted.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum AlphaType {
    #[default]
    Unknown = 0,
    /// Every pixel is fully opaque.
    Opaque = 1,
    /// Color channels are premultiplied by alpha.
    Premul = 2,
    /// Color channels are independent of alpha.
    Unpremul = 3,
}

impl AlphaType {
    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::Opaque,
            2 => Self::Premul,
            3 => Self::Unpremul,
            _ => return None,
        })
    }
}

/// Color space tag. Pixels are never converted between spaces.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ColorSpace {
    #[default]
    Unknown = 0,
    DisplayP3 = 1,
    Srgb = 2,
    LinearSrgb = 3,
    AdobeRgb = 4,
}

impl ColorSpace {
    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::DisplayP3,
            2 => Self::Srgb,
            3 => Self::LinearSrgb,
            4 => Self::AdobeRgb,
            _ => return None,
        })
    }
}

/// Width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Right edge (exclusive), saturating.
    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    /// Bottom edge (exclusive), saturating.
    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Whether the rectangle fits inside an image of `size`.
    pub fn fits_within(&self, size: Size) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= size.width
            && self.bottom() <= size.height
    }
}

/// Bytes per scanline for `width` pixels of `format`.
///
/// `Alpha8` rows are rounded up to a multiple of 4 bytes.
pub fn row_stride(format: PixelFormat, width: u32) -> Result<usize, ImageError> {
    let bpp = format.bytes_per_pixel();
    if bpp == 0 {
        return Err(ImageError::InvalidParameter(
            "unknown pixel format has no row stride".into(),
        ));
    }
    let width = width as usize;
    let stride = if format == PixelFormat::Alpha8 {
        width
            .checked_add(3)
            .map(|w| w / 4 * 4)
            .and_then(|w| w.checked_mul(bpp))
    } else {
        width.checked_mul(bpp)
    };
    stride.ok_or(ImageError::DimensionsTooLarge {
        width: width as u32,
        height: 1,
    })
}

/// Total buffer size for an image, overflow-checked.
pub fn byte_count(format: PixelFormat, width: u32, height: u32) -> Result<usize, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidParameter(alloc::format!(
            "empty image {width}x{height}"
        )));
    }
    row_stride(format, width)?
        .checked_mul(height as usize)
        .ok_or(ImageError::DimensionsTooLarge { width, height })
}

/// Typed pixels that can view a PixelMap buffer without copying.
#[cfg(feature = "rgb")]
pub trait MapPixel: Copy + 'static {
    /// The layout a buffer must have to be reinterpreted as `Self`.
    fn format() -> PixelFormat;
}

#[cfg(feature = "rgb")]
impl MapPixel for rgb::RGBA8 {
    fn format() -> PixelFormat {
        PixelFormat::Rgba8888
    }
}

#[cfg(feature = "rgb")]
impl MapPixel for rgb::alt::BGRA8 {
    fn format() -> PixelFormat {
        PixelFormat::Bgra8888
    }
}

#[cfg(feature = "rgb")]
impl MapPixel for rgb::RGB8 {
    fn format() -> PixelFormat {
        PixelFormat::Rgb888
    }
}
