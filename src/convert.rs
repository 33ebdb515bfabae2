//! Row conversion from the decoders' common RGBA8 form into output pixel
//! formats, and nearest-neighbor crop/scale row mapping.
//!
//! Every decoder produces straight-alpha RGBA8 rows in image coordinates.
//! A [`RowMapper`] decides which output rows a source row feeds, picks the
//! source columns for each output column, and stores the converted pixels.

use alloc::vec::Vec;
use core::ops::Range;

use crate::error::ImageError;
use crate::pixel::{AlphaType, PixelFormat, Rect, Size, row_stride};

// ── Pixel stores ─────────────────────────────────────────────────────

#[inline]
fn premul(c: u8, a: u8) -> u8 {
    ((u16::from(c) * u16::from(a) + 127) / 255) as u8
}

/// IEEE binary16 bits for `v`. Subnormal results flush to zero.
pub(crate) fn f32_to_f16(v: f32) -> u16 {
    let bits = v.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32 - 127 + 15;
    let mant = bits & 0x7f_ffff;
    if exp <= 0 {
        return sign;
    }
    if exp >= 31 {
        return sign | 0x7c00;
    }
    let mut h = u32::from(sign) | ((exp as u32) << 10) | (mant >> 13);
    if mant & 0x1000 != 0 {
        h += 1;
    }
    h as u16
}

pub(crate) fn f16_to_f32(h: u16) -> f32 {
    let sign = u32::from(h & 0x8000) << 16;
    let exp = u32::from((h >> 10) & 0x1f);
    let mant = u32::from(h & 0x3ff);
    let bits = match exp {
        0 if mant == 0 => sign,
        0 => {
            // Subnormal: normalize.
            let mut e = 127 - 15 + 1;
            let mut m = mant;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | ((e as u32) << 23) | ((m & 0x3ff) << 13)
        }
        31 => sign | 0x7f80_0000 | (mant << 13),
        _ => sign | ((exp + 127 - 15) << 23) | (mant << 13),
    };
    f32::from_bits(bits)
}

/// Store one straight-alpha RGBA8 pixel as `format`.
///
/// `out` must be exactly `format.bytes_per_pixel()` long.
#[inline]
pub(crate) fn store_pixel(format: PixelFormat, alpha: AlphaType, px: [u8; 4], out: &mut [u8]) {
    let [mut r, mut g, mut b, mut a] = px;
    match alpha {
        AlphaType::Opaque => a = 255,
        AlphaType::Premul if a != 255 => {
            r = premul(r, a);
            g = premul(g, a);
            b = premul(b, a);
        }
        _ => {}
    }
    match format {
        PixelFormat::Rgba8888 => out.copy_from_slice(&[r, g, b, a]),
        PixelFormat::Bgra8888 => out.copy_from_slice(&[b, g, r, a]),
        PixelFormat::Argb8888 => out.copy_from_slice(&[a, r, g, b]),
        PixelFormat::Rgb888 => out.copy_from_slice(&[r, g, b]),
        PixelFormat::Rgb565 => {
            let v = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
            out.copy_from_slice(&v.to_ne_bytes());
        }
        PixelFormat::Alpha8 => out[0] = a,
        PixelFormat::RgbaF16 => {
            for (dst, c) in out.chunks_exact_mut(2).zip([r, g, b, a]) {
                dst.copy_from_slice(&f32_to_f16(f32::from(c) / 255.0).to_ne_bytes());
            }
        }
        PixelFormat::Unknown => {}
    }
}

/// Read one stored pixel back as RGBA8, as laid out (no unpremultiply).
pub(crate) fn load_pixel(format: PixelFormat, px: &[u8]) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8888 => [px[0], px[1], px[2], px[3]],
        PixelFormat::Bgra8888 => [px[2], px[1], px[0], px[3]],
        PixelFormat::Argb8888 => [px[1], px[2], px[3], px[0]],
        PixelFormat::Rgb888 => [px[0], px[1], px[2], 255],
        PixelFormat::Rgb565 => {
            let v = u16::from_ne_bytes([px[0], px[1]]);
            let r = ((v >> 11) & 0x1f) as u8;
            let g = ((v >> 5) & 0x3f) as u8;
            let b = (v & 0x1f) as u8;
            [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
        }
        PixelFormat::Alpha8 => [0, 0, 0, px[0]],
        PixelFormat::RgbaF16 => {
            let mut out = [0u8; 4];
            for (o, c) in out.iter_mut().zip(px.chunks_exact(2)) {
                let v = f16_to_f32(u16::from_ne_bytes([c[0], c[1]]));
                *o = (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
            }
            out
        }
        PixelFormat::Unknown => [0; 4],
    }
}

// ── Row mapping ──────────────────────────────────────────────────────

/// Maps full-width RGBA8 source rows onto a cropped, scaled output image.
#[derive(Clone, Debug)]
pub(crate) struct RowMapper {
    crop: Rect,
    dst: Size,
    format: PixelFormat,
    alpha: AlphaType,
    stride: usize,
    /// Source column for each output column.
    columns: Vec<u32>,
}

impl RowMapper {
    pub(crate) fn new(
        src: Size,
        crop: Rect,
        dst: Size,
        format: PixelFormat,
        alpha: AlphaType,
    ) -> Result<Self, ImageError> {
        if !crop.fits_within(src) {
            return Err(ImageError::InvalidParameter(alloc::format!(
                "crop {crop:?} outside {}x{} image",
                src.width,
                src.height
            )));
        }
        if dst.is_empty() {
            return Err(ImageError::InvalidParameter("empty output size".into()));
        }
        let stride = row_stride(format, dst.width)?;
        let mut columns = Vec::new();
        columns
            .try_reserve_exact(dst.width as usize)
            .map_err(|_| ImageError::MallocAbnormal(dst.width as usize * 4))?;
        columns.extend((0..u64::from(dst.width)).map(|dx| {
            crop.left + (dx * u64::from(crop.width) / u64::from(dst.width)) as u32
        }));
        Ok(Self {
            crop,
            dst,
            format,
            alpha,
            stride,
            columns,
        })
    }

    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    pub(crate) fn output_size(&self) -> Size {
        self.dst
    }

    /// Output rows whose nearest source row is `src_y`. Often empty.
    pub(crate) fn dst_rows(&self, src_y: u32) -> Range<u32> {
        if src_y < self.crop.top || src_y >= self.crop.bottom() {
            return 0..0;
        }
        let k = u64::from(src_y - self.crop.top);
        let ch = u64::from(self.crop.height);
        let dh = u64::from(self.dst.height);
        let start = (k * dh).div_ceil(ch);
        let end = ((k + 1) * dh).div_ceil(ch);
        start as u32..end.min(dh) as u32
    }

    /// Convert `rgba` (one full-width source row) into every output row it
    /// feeds. Each write is bounds-checked against `out`.
    pub(crate) fn write_row(
        &self,
        src_y: u32,
        rgba: &[u8],
        out: &mut [u8],
    ) -> Result<(), ImageError> {
        let rows = self.dst_rows(src_y);
        if rows.is_empty() {
            return Ok(());
        }
        let bpp = self.format.bytes_per_pixel();
        let packed = self.dst.width as usize * bpp;
        let first = rows.start as usize * self.stride;
        let actual = out.len();
        let line = out
            .get_mut(first..first + packed)
            .ok_or(ImageError::BufferTooSmall {
                needed: first + packed,
                actual,
            })?;
        for (dst, &sx) in line.chunks_exact_mut(bpp).zip(&self.columns) {
            let i = sx as usize * 4;
            let px = rgba
                .get(i..i + 4)
                .ok_or_else(|| ImageError::InvalidData("source row shorter than image".into()))?;
            store_pixel(self.format, self.alpha, [px[0], px[1], px[2], px[3]], dst);
        }
        for dy in rows.start + 1..rows.end {
            let at = dy as usize * self.stride;
            if at + packed > out.len() {
                return Err(ImageError::BufferTooSmall {
                    needed: at + packed,
                    actual: out.len(),
                });
            }
            out.copy_within(first..first + packed, at);
        }
        Ok(())
    }

    /// Map a whole RGBA8 image of the source size.
    pub(crate) fn write_image(
        &self,
        rgba: &[u8],
        src_width: u32,
        out: &mut [u8],
    ) -> Result<(), ImageError> {
        let row_len = src_width as usize * 4;
        for y in self.crop.top..self.crop.bottom() {
            let start = y as usize * row_len;
            let row = rgba
                .get(start..start + row_len)
                .ok_or_else(|| ImageError::InvalidData("decoded image shorter than header".into()))?;
            self.write_row(y, row, out)?;
        }
        Ok(())
    }
}
