//! [`PixelMap`]: a decoded image that owns its pixel buffer.

use alloc::vec;

use enough::Stop;

use crate::convert::load_pixel;
use crate::decode::PlImageInfo;
use crate::error::ImageError;
use crate::limits::Limits;
use crate::memory::{AllocatorType, PixelBuffer};
use crate::pixel::{AlphaType, ColorSpace, PixelFormat, Size, byte_count, row_stride};
use crate::stream::OutputStream;

/// Pixels plus the geometry and format needed to interpret them.
///
/// `byte_count() == row_bytes() * height()` always holds. The buffer is
/// released on drop according to its allocator (heap free, or unmap then
/// close for shared memory).
#[derive(Debug)]
pub struct PixelMap {
    buffer: PixelBuffer,
    info: PlImageInfo,
    row_bytes: usize,
}

impl PixelMap {
    /// Wrap a buffer whose size must match `info` exactly.
    pub fn from_decoded(buffer: PixelBuffer, info: &PlImageInfo) -> Result<Self, ImageError> {
        let expected = byte_count(info.pixel_format, info.size.width, info.size.height)?;
        if buffer.len() != expected {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "{} byte buffer for a {expected} byte image",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            info: *info,
            row_bytes: row_stride(info.pixel_format, info.size.width)?,
        })
    }

    /// A zero-filled PixelMap.
    pub fn new(
        info: &PlImageInfo,
        allocator: AllocatorType,
        limits: &Limits,
    ) -> Result<Self, ImageError> {
        limits.check(info.size.width, info.size.height)?;
        let bytes = byte_count(info.pixel_format, info.size.width, info.size.height)?;
        let buffer = PixelBuffer::allocate(bytes, allocator, limits)?;
        Self::from_decoded(buffer, info)
    }

    /// A PixelMap holding a copy of `pixels`, laid out with this format's
    /// row stride.
    pub fn from_pixels(
        pixels: &[u8],
        info: &PlImageInfo,
        allocator: AllocatorType,
        limits: &Limits,
    ) -> Result<Self, ImageError> {
        let mut map = Self::new(info, allocator, limits)?;
        map.write_pixels(pixels)?;
        Ok(map)
    }

    // ── Geometry ─────────────────────────────────────────────────────

    pub fn width(&self) -> u32 {
        self.info.size.width
    }

    pub fn height(&self) -> u32 {
        self.info.size.height
    }

    pub fn size(&self) -> Size {
        self.info.size
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.info.pixel_format
    }

    pub fn alpha_type(&self) -> AlphaType {
        self.info.alpha_type
    }

    pub fn color_space(&self) -> ColorSpace {
        self.info.color_space
    }

    pub fn base_density(&self) -> i32 {
        self.info.base_density
    }

    pub fn info(&self) -> &PlImageInfo {
        &self.info
    }

    /// Bytes per row, including `Alpha8` padding.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn byte_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn allocator_type(&self) -> AllocatorType {
        self.buffer.allocator_type()
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> PixelBuffer {
        self.buffer
    }

    pub fn pixels(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    // ── Pixel access ─────────────────────────────────────────────────

    fn offset(&self, x: u32, y: u32) -> Result<usize, ImageError> {
        if x >= self.width() || y >= self.height() {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "pixel ({x}, {y}) outside {}x{}",
                self.width(),
                self.height()
            )));
        }
        Ok(y as usize * self.row_bytes + x as usize * self.pixel_format().bytes_per_pixel())
    }

    /// The byte at `(x, y)` of a one-byte-per-pixel map.
    pub fn get_pixel8(&self, x: u32, y: u32) -> Result<u8, ImageError> {
        if self.pixel_format().bytes_per_pixel() != 1 {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "get_pixel8 on {:?}",
                self.pixel_format()
            )));
        }
        Ok(self.pixels()[self.offset(x, y)?])
    }

    /// The native-endian word at `(x, y)` of a four-byte-per-pixel map.
    pub fn get_pixel32(&self, x: u32, y: u32) -> Result<u32, ImageError> {
        if self.pixel_format().bytes_per_pixel() != 4 {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "get_pixel32 on {:?}",
                self.pixel_format()
            )));
        }
        let at = self.offset(x, y)?;
        let p = &self.pixels()[at..at + 4];
        Ok(u32::from_ne_bytes([p[0], p[1], p[2], p[3]]))
    }

    /// The pixel at `(x, y)` as RGBA8, in the map's alpha representation.
    pub fn pixel(&self, x: u32, y: u32) -> Result<[u8; 4], ImageError> {
        let at = self.offset(x, y)?;
        let bpp = self.pixel_format().bytes_per_pixel();
        Ok(load_pixel(self.pixel_format(), &self.pixels()[at..at + bpp]))
    }

    /// Copy every byte of the map into `dst`.
    pub fn read_pixels(&self, dst: &mut [u8]) -> Result<(), ImageError> {
        let src = self.pixels();
        let actual = dst.len();
        let dst = dst.get_mut(..src.len()).ok_or(ImageError::BufferTooSmall {
            needed: src.len(),
            actual,
        })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Overwrite every byte of the map from `src`.
    pub fn write_pixels(&mut self, src: &[u8]) -> Result<(), ImageError> {
        let len = self.byte_count();
        let src = src.get(..len).ok_or(ImageError::BufferTooSmall {
            needed: len,
            actual: src.len(),
        })?;
        self.pixels_mut().copy_from_slice(src);
        Ok(())
    }

    /// Retag the alpha channel. Pixels are not converted.
    ///
    /// Formats without alpha only accept [`AlphaType::Opaque`].
    pub fn set_alpha_type(&mut self, alpha: AlphaType) -> Result<(), ImageError> {
        let valid = match alpha {
            AlphaType::Unknown => false,
            AlphaType::Opaque => true,
            _ => self.pixel_format().has_alpha(),
        };
        if !valid {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "{alpha:?} alpha for {:?}",
                self.pixel_format()
            )));
        }
        self.info.alpha_type = alpha;
        Ok(())
    }

    /// Same description and the same bytes.
    pub fn is_same_image(&self, other: &PixelMap) -> bool {
        self.info == other.info && self.pixels() == other.pixels()
    }

    /// Deep copy with the same allocator type.
    pub fn try_clone(&self, limits: &Limits) -> Result<Self, ImageError> {
        Ok(Self {
            buffer: self.buffer.try_clone(limits)?,
            info: self.info,
            row_bytes: self.row_bytes,
        })
    }

    // ── Encoding ─────────────────────────────────────────────────────

    /// Write the map as a BMP: 32-bit when it carries alpha, 24-bit
    /// otherwise. Premultiplied pixels are unpremultiplied first.
    pub fn encode_bmp(&self, out: &mut dyn OutputStream, stop: &dyn Stop) -> Result<(), ImageError> {
        let format = self.pixel_format();
        let premul = self.alpha_type() == AlphaType::Premul;
        let alpha = format.has_alpha() && self.alpha_type() != AlphaType::Opaque;
        let (w, h) = (self.width() as usize, self.height() as usize);
        let bpp = format.bytes_per_pixel();

        let len = w * h * 4;
        let mut rgba = vec![];
        rgba.try_reserve_exact(len)
            .map_err(|_| ImageError::MallocAbnormal(len))?;
        for (y, row) in self.pixels().chunks_exact(self.row_bytes).enumerate() {
            if y % 16 == 0 {
                stop.check()?;
            }
            for px in row[..w * bpp].chunks_exact(bpp) {
                let mut p = load_pixel(format, px);
                if premul {
                    p = unpremultiply(p);
                }
                if !alpha {
                    p[3] = 255;
                }
                rgba.extend_from_slice(&p);
            }
        }
        crate::bmp::encode_bmp(&rgba, self.width(), self.height(), alpha, out, stop)
    }

    // ── Typed views ──────────────────────────────────────────────────

    /// Reinterpret the pixels as `P` without copying.
    #[cfg(feature = "rgb")]
    pub fn as_pixels<P: crate::pixel::MapPixel>(&self) -> Result<&[P], ImageError>
    where
        [u8]: rgb::AsPixels<P>,
    {
        use rgb::AsPixels as _;
        if self.pixel_format() != P::format() {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "{:?} pixels requested from a {:?} map",
                P::format(),
                self.pixel_format()
            )));
        }
        Ok(self.pixels().as_pixels())
    }

    /// Zero-copy [`imgref::ImgRef`] view.
    #[cfg(feature = "imgref")]
    pub fn as_imgref<P: crate::pixel::MapPixel>(&self) -> Result<imgref::ImgRef<'_, P>, ImageError>
    where
        [u8]: rgb::AsPixels<P>,
    {
        let pixels: &[P] = self.as_pixels()?;
        Ok(imgref::ImgRef::new(
            pixels,
            self.width() as usize,
            self.height() as usize,
        ))
    }
}

fn unpremultiply([r, g, b, a]: [u8; 4]) -> [u8; 4] {
    if a == 0 || a == 255 {
        return [r, g, b, a];
    }
    let un = |c: u8| ((u16::from(c) * 255 + u16::from(a) / 2) / u16::from(a)).min(255) as u8;
    [un(r), un(g), un(b), a]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferPackerStream;
    use enough::Unstoppable;

    fn info(width: u32, height: u32, pixel_format: PixelFormat, alpha_type: AlphaType) -> PlImageInfo {
        PlImageInfo {
            size: Size::new(width, height),
            pixel_format,
            alpha_type,
            color_space: ColorSpace::Srgb,
            base_density: 160,
        }
    }

    #[test]
    fn alpha8_rows_are_padded() {
        let mut map = PixelMap::new(
            &info(3, 3, PixelFormat::Alpha8, AlphaType::Premul),
            AllocatorType::Heap,
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(map.byte_count(), 12);
        assert_eq!(map.row_bytes(), 4);
        let bytes: alloc::vec::Vec<u8> = (0..12).collect();
        map.write_pixels(&bytes).unwrap();
        assert_eq!(map.get_pixel8(1, 1).unwrap(), 5);
        assert!(map.get_pixel32(0, 0).is_err());
        assert!(map.get_pixel8(3, 0).is_err());
    }

    #[test]
    fn pixel_reads_each_layout() {
        let map = PixelMap::from_pixels(
            &[1, 2, 3, 4, 5, 6, 7, 8],
            &info(2, 1, PixelFormat::Bgra8888, AlphaType::Unpremul),
            AllocatorType::Heap,
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(map.pixel(1, 0).unwrap(), [7, 6, 5, 8]);
        assert_eq!(
            map.get_pixel32(0, 0).unwrap(),
            u32::from_ne_bytes([1, 2, 3, 4])
        );
        let mut copy = [0u8; 8];
        map.read_pixels(&mut copy).unwrap();
        assert_eq!(copy, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(matches!(
            map.read_pixels(&mut [0u8; 7]),
            Err(ImageError::BufferTooSmall {
                needed: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let buffer = PixelBuffer::allocate(15, AllocatorType::Heap, &Limits::default()).unwrap();
        let err = PixelMap::from_decoded(buffer, &info(2, 2, PixelFormat::Rgba8888, AlphaType::Opaque))
            .unwrap_err();
        assert!(matches!(err, ImageError::InvalidParameter(_)));
    }

    #[test]
    fn alpha_retagging() {
        let mut map = PixelMap::new(
            &info(1, 1, PixelFormat::Rgb888, AlphaType::Opaque),
            AllocatorType::Heap,
            &Limits::default(),
        )
        .unwrap();
        assert!(map.set_alpha_type(AlphaType::Premul).is_err());
        assert!(map.set_alpha_type(AlphaType::Opaque).is_ok());
    }

    #[test]
    fn same_image_compares_info_and_bytes() {
        let i = info(1, 1, PixelFormat::Rgba8888, AlphaType::Premul);
        let a = PixelMap::from_pixels(&[1, 2, 3, 4], &i, AllocatorType::Heap, &Limits::default())
            .unwrap();
        let mut b = a.try_clone(&Limits::default()).unwrap();
        assert!(a.is_same_image(&b));
        b.pixels_mut()[0] = 9;
        assert!(!a.is_same_image(&b));
    }

    #[test]
    fn bmp_export_unpremultiplies() {
        let map = PixelMap::from_pixels(
            &[64, 32, 0, 128],
            &info(1, 1, PixelFormat::Rgba8888, AlphaType::Premul),
            AllocatorType::Heap,
            &Limits::default(),
        )
        .unwrap();
        let mut out = BufferPackerStream::new();
        map.encode_bmp(&mut out, &Unstoppable).unwrap();
        let bmp = out.as_bytes();
        assert_eq!(&bmp[..2], b"BM");
        assert_eq!(u16::from_le_bytes([bmp[28], bmp[29]]), 32);
        // BGRA
        assert_eq!(&bmp[54..58], &[0, 64, 128, 128]);
    }
}
