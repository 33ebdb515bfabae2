//! BMP header parsing and pixel decoding to top-down RGBA8.
//!
//! Covers OS/2 and Windows info headers up to V5, 1/2/4/8 bit palettes,
//! 16/24/32 bit direct color, BI_BITFIELDS, and RLE4/RLE8.

use alloc::vec;
use alloc::vec::Vec;

use enough::Stop;

use super::utils::{Channel, unpack_indices};
use crate::error::ImageError;

// ── Permissiveness ──────────────────────────────────────────────────

/// How strictly the BMP decoder validates input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BmpPermissiveness {
    /// Also reject non-critical deviations: a file size field that does not
    /// match the data, negative resolution, RLE runs past the row end.
    Strict,

    /// Accept common deviations that don't affect pixel decoding. Reject:
    /// planes != 1, RLE with top-down rows, oversized palette counts,
    /// out-of-range palette indices.
    #[default]
    Standard,

    /// Accept as much as possible. Missing rows are zero, out-of-range
    /// indices decode as black, planes and row order are not checked.
    Permissive,
}

// ── Cursor for reading from &[u8] ───────────────────────────────────

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ImageError> {
        let end = self.pos.checked_add(n).ok_or(ImageError::UnexpectedEof)?;
        let out = self.data.get(self.pos..end).ok_or(ImageError::UnexpectedEof)?;
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), ImageError> {
        self.bytes(n).map(|_| ())
    }
}

// ── Header ──────────────────────────────────────────────────────────

/// File header plus the largest info header and a full palette.
pub(crate) const MAX_HEADER_LEN: usize = 14 + 124 + 12 + 256 * 4;

/// Bytes needed to read the file header fields `parse_header` looks at first.
pub(crate) const FILE_HEADER_LEN: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Rgb,
    Rle8,
    Rle4,
    Bitfields,
}

#[derive(Debug, Clone)]
pub(crate) struct BmpHeader {
    pub(crate) width: u32,
    pub(crate) height: u32,
    bottom_up: bool,
    depth: u16,
    compression: Compression,
    /// Red, green, blue, alpha.
    masks: [Channel; 4],
    palette: Vec<[u8; 4]>,
    pub(crate) data_offset: usize,
}

impl BmpHeader {
    /// Whether decoded pixels carry an alpha channel.
    pub(crate) fn has_alpha(&self) -> bool {
        match (self.depth, self.compression) {
            (32, Compression::Rgb) => true,
            (16 | 32, Compression::Bitfields) => self.masks[3].is_present(),
            _ => false,
        }
    }

    fn row_bytes(&self) -> usize {
        (self.width as usize * usize::from(self.depth)).div_ceil(32) * 4
    }
}

/// Total header length (pixel data offset) from the first bytes of a file.
pub(crate) fn header_len(head: &[u8]) -> Result<usize, ImageError> {
    let mut c = Cursor::new(head);
    if c.bytes(2)? != b"BM" {
        return Err(ImageError::UnrecognizedFormat);
    }
    c.skip(8)?;
    let hsize = c.u32()? as usize;
    let ihsize = c.u32()? as usize;
    if ihsize.saturating_add(14) > hsize {
        return Err(ImageError::InvalidHeader(alloc::format!(
            "pixel data offset {hsize} inside the {ihsize} byte info header"
        )));
    }
    Ok(hsize)
}

/// Parse file header, info header, masks and palette.
///
/// `data` must hold at least the header (`min(data_offset, MAX_HEADER_LEN)`
/// bytes); `file_len` is the full file length when known.
pub(crate) fn parse_header(
    data: &[u8],
    file_len: Option<usize>,
    level: BmpPermissiveness,
) -> Result<BmpHeader, ImageError> {
    let strict = level == BmpPermissiveness::Strict;
    let permissive = level == BmpPermissiveness::Permissive;
    let mut c = Cursor::new(data);
    if c.bytes(2)? != b"BM" {
        return Err(ImageError::UnrecognizedFormat);
    }
    let file_size = c.u32()?;
    c.skip(4)?;
    let hsize = c.u32()?;
    let ihsize = c.u32()?;
    if ihsize.saturating_add(14) > hsize {
        return Err(ImageError::InvalidHeader("invalid BMP header size".into()));
    }
    if let Some(len) = file_len
        && strict
        && file_size != 0
        && file_size as usize != len
    {
        return Err(ImageError::InvalidHeader(alloc::format!(
            "BMP file size field ({file_size}) doesn't match actual size ({len})"
        )));
    }

    let mut masks = [0u32; 4];
    let mut colors_used = 0u32;
    let (width, raw_height, planes, depth, compression) = match ihsize {
        12 => {
            let w = c.u16()?;
            let h = c.u16()?;
            (
                i32::from(w),
                i32::from(h),
                c.u16()?,
                c.u16()?,
                Compression::Rgb,
            )
        }
        16 | 40 | 52 | 56 | 64 | 108 | 124 => {
            let w = c.u32()? as i32;
            let h = c.u32()? as i32;
            let planes = c.u16()?;
            let depth = c.u16()?;
            let compression = if ihsize >= 20 {
                match c.u32()? {
                    0 => Compression::Rgb,
                    1 => Compression::Rle8,
                    2 => Compression::Rle4,
                    3 | 6 => Compression::Bitfields,
                    other => {
                        return Err(ImageError::UnsupportedVariant(alloc::format!(
                            "BMP compression {other}"
                        )));
                    }
                }
            } else {
                Compression::Rgb
            };
            if ihsize >= 40 {
                let _image_size = c.u32()?;
                let x_ppm = c.u32()? as i32;
                let y_ppm = c.u32()? as i32;
                colors_used = c.u32()?;
                let _important = c.u32()?;
                if strict && (x_ppm < 0 || y_ppm < 0) {
                    return Err(ImageError::InvalidHeader(
                        "BMP resolution is negative".into(),
                    ));
                }
                // Masks follow a 40-byte header for BI_BITFIELDS, or sit
                // inside V2+ headers.
                if ihsize >= 52 || compression == Compression::Bitfields {
                    masks[0] = c.u32()?;
                    masks[1] = c.u32()?;
                    masks[2] = c.u32()?;
                    if ihsize >= 56 {
                        masks[3] = c.u32()?;
                    }
                }
            }
            (w, h, planes, depth, compression)
        }
        _ => {
            return Err(ImageError::InvalidHeader(alloc::format!(
                "unknown BMP info header size: {ihsize}"
            )));
        }
    };

    if !permissive && planes != 1 {
        return Err(ImageError::InvalidHeader(alloc::format!(
            "BMP planes field is {planes}, expected 1"
        )));
    }
    if width <= 0 || raw_height == 0 || raw_height == i32::MIN {
        return Err(ImageError::InvalidHeader(alloc::format!(
            "BMP dimensions {width}x{raw_height}"
        )));
    }
    let bottom_up = raw_height > 0;
    let rle = matches!(compression, Compression::Rle4 | Compression::Rle8);
    if rle && !bottom_up && !permissive {
        return Err(ImageError::InvalidData(
            "RLE compression with top-down row order".into(),
        ));
    }
    match (depth, compression) {
        (1 | 2 | 4 | 8 | 24 | 32, Compression::Rgb)
        | (16, Compression::Rgb | Compression::Bitfields)
        | (32, Compression::Bitfields)
        | (8, Compression::Rle8)
        | (4, Compression::Rle4) => {}
        (d, comp) => {
            return Err(ImageError::UnsupportedVariant(alloc::format!(
                "BMP bit depth {d} with {comp:?}"
            )));
        }
    }
    if depth == 16 && masks[..3] == [0, 0, 0] {
        masks = [0x7C00, 0x03E0, 0x001F, 0];
    }

    // Palette: between the info header (and external masks) and the data.
    let mut palette = Vec::new();
    if depth <= 8 {
        let entry = if ihsize == 12 { 3 } else { 4 };
        let start = 14
            + ihsize as usize
            + if ihsize == 40 && compression == Compression::Bitfields { 12 } else { 0 };
        let room = (hsize as usize).saturating_sub(start) / entry;
        let max = 1usize << depth;
        let declared = colors_used as usize;
        if declared > max && !permissive {
            return Err(ImageError::InvalidHeader(alloc::format!(
                "BMP palette count ({declared}) exceeds max for {depth}-bit depth ({max})"
            )));
        }
        let wanted = if declared == 0 || declared > max { max } else { declared };
        let count = wanted.min(room);
        let mut p = Cursor::at(data, start);
        for _ in 0..count {
            let e = p.bytes(entry)?;
            palette.push([e[2], e[1], e[0], 255]);
        }
        if palette.is_empty() && depth < 8 {
            return Err(ImageError::UnsupportedVariant(alloc::format!(
                "{depth}-bit BMP without a palette"
            )));
        }
    }

    Ok(BmpHeader {
        width: width as u32,
        height: raw_height.unsigned_abs(),
        bottom_up,
        depth,
        compression,
        masks: masks.map(Channel::new),
        palette,
        data_offset: hsize as usize,
    })
}

// ── Pixels ──────────────────────────────────────────────────────────

/// A decoded image and how many of its rows came from real data.
pub(crate) struct Decoded {
    pub(crate) rgba: Vec<u8>,
    pub(crate) rows: u32,
}

impl Decoded {
    pub(crate) fn is_complete(&self, height: u32) -> bool {
        self.rows >= height
    }
}

fn lookup(
    palette: &[[u8; 4]],
    idx: u8,
    level: BmpPermissiveness,
) -> Result<[u8; 4], ImageError> {
    if palette.is_empty() {
        return Ok([idx, idx, idx, 255]);
    }
    match palette.get(usize::from(idx)) {
        Some(&px) => Ok(px),
        None if level == BmpPermissiveness::Permissive => Ok([0, 0, 0, 255]),
        None => Err(ImageError::InvalidData(alloc::format!(
            "palette index {idx} out of range (palette has {} entries)",
            palette.len()
        ))),
    }
}

/// Decode the pixel array of a whole file into top-down RGBA8.
///
/// Truncated data stops at the last complete row; the caller decides
/// whether that is an error. In permissive mode missing rows are zero and
/// the image counts as complete.
pub(crate) fn decode_pixels(
    data: &[u8],
    header: &BmpHeader,
    level: BmpPermissiveness,
    stop: &dyn Stop,
) -> Result<Decoded, ImageError> {
    let (w, h) = (header.width as usize, header.height as usize);
    let len = w
        .checked_mul(h)
        .and_then(|n| n.checked_mul(4))
        .ok_or(ImageError::DimensionsTooLarge {
            width: header.width,
            height: header.height,
        })?;
    let mut rgba = Vec::new();
    rgba.try_reserve_exact(len)
        .map_err(|_| ImageError::MallocAbnormal(len))?;
    rgba.resize(len, 0);

    let mut rows = if matches!(header.compression, Compression::Rle4 | Compression::Rle8) {
        decode_rle(data, header, level, &mut rgba, stop)?
    } else {
        decode_rows(data, header, level, &mut rgba, stop)?
    };

    // 32-bit BI_RGB files often leave the fourth byte zero.
    if header.depth == 32
        && header.compression == Compression::Rgb
        && rgba.chunks_exact(4).all(|px| px[3] == 0)
    {
        rgba.chunks_exact_mut(4).for_each(|px| px[3] = 255);
    }
    if level == BmpPermissiveness::Permissive {
        rows = header.height;
    }
    Ok(Decoded { rgba, rows })
}

fn decode_rows(
    data: &[u8],
    header: &BmpHeader,
    level: BmpPermissiveness,
    rgba: &mut [u8],
    stop: &dyn Stop,
) -> Result<u32, ImageError> {
    let w = header.width as usize;
    let stride = header.row_bytes();
    let mut indices = vec![0u8; if header.depth < 8 { w } else { 0 }];
    let [mr, mg, mb, ma] = header.masks;

    for r in 0..header.height {
        if r % 16 == 0 {
            stop.check()?;
        }
        let start = header.data_offset + r as usize * stride;
        let Some(src) = data.get(start..start + stride) else {
            return Ok(r);
        };
        let y = (if header.bottom_up { header.height - 1 - r } else { r }) as usize;
        let out = &mut rgba[y * w * 4..(y + 1) * w * 4];
        match header.depth {
            1 | 2 | 4 => {
                unpack_indices(header.depth, src, &mut indices);
                for (px, &i) in out.chunks_exact_mut(4).zip(&indices) {
                    px.copy_from_slice(&lookup(&header.palette, i, level)?);
                }
            }
            8 => {
                for (px, &i) in out.chunks_exact_mut(4).zip(src) {
                    px.copy_from_slice(&lookup(&header.palette, i, level)?);
                }
            }
            16 => {
                for (px, s) in out.chunks_exact_mut(4).zip(src.chunks_exact(2)) {
                    let v = u32::from(u16::from_le_bytes([s[0], s[1]]));
                    px.copy_from_slice(&[
                        mr.extract(v, 0),
                        mg.extract(v, 0),
                        mb.extract(v, 0),
                        ma.extract(v, 255),
                    ]);
                }
            }
            24 => {
                for (px, s) in out.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
                    px.copy_from_slice(&[s[2], s[1], s[0], 255]);
                }
            }
            _ if header.compression == Compression::Bitfields => {
                for (px, s) in out.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                    let v = u32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                    px.copy_from_slice(&[
                        mr.extract(v, 0),
                        mg.extract(v, 0),
                        mb.extract(v, 0),
                        ma.extract(v, 255),
                    ]);
                }
            }
            _ => {
                for (px, s) in out.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                    px.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
                }
            }
        }
    }
    Ok(header.height)
}

/// RLE4/RLE8. Rows are stored bottom-up; skipped pixels stay zero.
/// Returns the number of rows finished before the data ran out.
fn decode_rle(
    data: &[u8],
    header: &BmpHeader,
    level: BmpPermissiveness,
    rgba: &mut [u8],
    stop: &dyn Stop,
) -> Result<u32, ImageError> {
    let (w, h) = (header.width as usize, header.height as usize);
    let rle4 = header.compression == Compression::Rle4;
    let mut c = Cursor::at(data, header.data_offset);
    let (mut x, mut line) = (0usize, 0usize);

    let mut put = |x: usize, line: usize, idx: u8| -> Result<(), ImageError> {
        if x < w && line < h {
            let px = lookup(&header.palette, idx, level)?;
            let at = ((h - 1 - line) * w + x) * 4;
            rgba[at..at + 4].copy_from_slice(&px);
        }
        Ok(())
    };

    while line < h {
        let (Ok(count), Ok(value)) = (c.u8(), c.u8()) else {
            return Ok(line as u32);
        };
        if count > 0 {
            if level == BmpPermissiveness::Strict && x + usize::from(count) > w {
                return Err(ImageError::InvalidData("RLE run past the row end".into()));
            }
            for i in 0..usize::from(count) {
                let idx = match (rle4, i % 2) {
                    (false, _) => value,
                    (true, 0) => value >> 4,
                    (true, _) => value & 0x0F,
                };
                put(x, line, idx)?;
                x += 1;
            }
            continue;
        }
        match value {
            0 => {
                line += 1;
                x = 0;
                if line % 16 == 0 {
                    stop.check()?;
                }
            }
            1 => return Ok(h as u32),
            2 => {
                let (Ok(dx), Ok(dy)) = (c.u8(), c.u8()) else {
                    return Ok(line as u32);
                };
                x += usize::from(dx);
                line += usize::from(dy);
            }
            n => {
                let n = usize::from(n);
                let len = if rle4 { n.div_ceil(2) } else { n };
                let Ok(run) = c.bytes(len) else {
                    return Ok(line as u32);
                };
                for i in 0..n {
                    let idx = if rle4 {
                        let b = run[i / 2];
                        if i % 2 == 0 { b >> 4 } else { b & 0x0F }
                    } else {
                        run[i]
                    };
                    put(x, line, idx)?;
                    x += 1;
                }
                // Absolute runs are padded to a 16-bit boundary.
                if len % 2 == 1 && c.skip(1).is_err() {
                    return Ok(line as u32);
                }
            }
        }
    }
    Ok(h as u32)
}
