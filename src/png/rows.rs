//! Scanline reassembly: inflated bytes in, RGBA8 rows out.

use alloc::vec;
use alloc::vec::Vec;

use enough::Stop;

use super::chunk::{ColorType, Ihdr, Transparency};
use crate::convert::RowMapper;
use crate::error::ImageError;
use crate::limits::Limits;

/// (x0, y0, dx, dy) for the seven Adam7 passes.
const ADAM7: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

#[derive(Clone, Copy, Debug)]
struct Pass {
    x0: u32,
    y0: u32,
    dx: u32,
    dy: u32,
    width: u32,
    height: u32,
}

fn passes(ihdr: &Ihdr) -> Vec<Pass> {
    if !ihdr.interlaced {
        return vec![Pass {
            x0: 0,
            y0: 0,
            dx: 1,
            dy: 1,
            width: ihdr.width,
            height: ihdr.height,
        }];
    }
    ADAM7
        .iter()
        .map(|&(x0, y0, dx, dy)| Pass {
            x0,
            y0,
            dx,
            dy,
            width: ihdr.width.saturating_sub(x0).div_ceil(dx),
            height: ihdr.height.saturating_sub(y0).div_ceil(dy),
        })
        .filter(|p| p.width > 0 && p.height > 0)
        .collect()
}

/// Total inflated size of the image data, filter bytes included.
pub(crate) fn expected_bytes(ihdr: &Ihdr) -> u64 {
    passes(ihdr)
        .iter()
        .map(|p| (1 + ihdr.row_bytes(p.width) as u64) * u64::from(p.height))
        .sum()
}

// ── Unfiltering ──────────────────────────────────────────────────────

#[inline]
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let (a, b, c) = (i16::from(a), i16::from(b), i16::from(c));
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();
    if pa <= pb && pa <= pc {
        a as u8
    } else if pb <= pc {
        b as u8
    } else {
        c as u8
    }
}

/// Undo the row filter in place. `prev` is the previous unfiltered row of the
/// same pass (zeros for the first).
pub(crate) fn unfilter(filter: u8, row: &mut [u8], prev: &[u8], bpp: usize) -> Result<(), ImageError> {
    let len = row.len();
    match filter {
        0 => {}
        1 => {
            for i in bpp..len {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for (r, &p) in row.iter_mut().zip(prev) {
                *r = r.wrapping_add(p);
            }
        }
        3 => {
            for i in 0..len {
                let a = if i >= bpp { u16::from(row[i - bpp]) } else { 0 };
                row[i] = row[i].wrapping_add(((a + u16::from(prev[i])) / 2) as u8);
            }
        }
        4 => {
            for i in 0..len {
                let (a, c) = if i >= bpp {
                    (row[i - bpp], prev[i - bpp])
                } else {
                    (0, 0)
                };
                row[i] = row[i].wrapping_add(paeth(a, prev[i], c));
            }
        }
        f => {
            return Err(ImageError::InvalidData(alloc::format!(
                "unknown filter type {f}"
            )));
        }
    }
    Ok(())
}

// ── Sample expansion ─────────────────────────────────────────────────

#[inline]
fn packed_sample(row: &[u8], x: usize, depth: u8) -> u8 {
    let bits = usize::from(depth);
    let bit = x * bits;
    let byte = row[bit / 8];
    let shift = 8 - bits - bit % 8;
    (byte >> shift) & ((1u16 << bits) - 1) as u8
}

#[inline]
fn sample16(row: &[u8], i: usize) -> u16 {
    u16::from_be_bytes([row[i * 2], row[i * 2 + 1]])
}

/// Expand one unfiltered row of `width` pixels to RGBA8.
pub(crate) fn expand_row(ihdr: &Ihdr, trns: &Transparency, row: &[u8], width: u32, out: &mut [u8]) {
    let depth = ihdr.bit_depth;
    let key = trns.key;
    for (x, px) in out.chunks_exact_mut(4).take(width as usize).enumerate() {
        let rgba = match (ihdr.color_type, depth) {
            (ColorType::Gray, 16) => {
                let v = sample16(row, x);
                let a = if key.is_some_and(|k| k[0] == v) { 0 } else { 255 };
                let g = (v >> 8) as u8;
                [g, g, g, a]
            }
            (ColorType::Gray, 8) => {
                let v = row[x];
                let a = if key.is_some_and(|k| k[0] == u16::from(v)) { 0 } else { 255 };
                [v, v, v, a]
            }
            (ColorType::Gray, d) => {
                let v = packed_sample(row, x, d);
                let a = if key.is_some_and(|k| k[0] == u16::from(v)) { 0 } else { 255 };
                let g = v * (255 / ((1u8 << d) - 1));
                [g, g, g, a]
            }
            (ColorType::Indexed, d) => {
                let i = if d == 8 { row[x] } else { packed_sample(row, x, d) };
                trns.palette
                    .get(usize::from(i))
                    .copied()
                    .unwrap_or([0, 0, 0, 255])
            }
            (ColorType::Rgb, 16) => {
                let (r, g, b) = (sample16(row, x * 3), sample16(row, x * 3 + 1), sample16(row, x * 3 + 2));
                let a = if key == Some([r, g, b]) { 0 } else { 255 };
                [(r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8, a]
            }
            (ColorType::Rgb, _) => {
                let p = &row[x * 3..x * 3 + 3];
                let k = [u16::from(p[0]), u16::from(p[1]), u16::from(p[2])];
                let a = if key == Some(k) { 0 } else { 255 };
                [p[0], p[1], p[2], a]
            }
            (ColorType::GrayAlpha, 16) => {
                let g = row[x * 4];
                [g, g, g, row[x * 4 + 2]]
            }
            (ColorType::GrayAlpha, _) => {
                let g = row[x * 2];
                [g, g, g, row[x * 2 + 1]]
            }
            (ColorType::Rgba, 16) => {
                let p = &row[x * 8..x * 8 + 8];
                [p[0], p[2], p[4], p[6]]
            }
            (ColorType::Rgba, _) => {
                let p = &row[x * 4..x * 4 + 4];
                [p[0], p[1], p[2], p[3]]
            }
        };
        px.copy_from_slice(&rgba);
    }
}

fn zeroed(len: usize) -> Result<Vec<u8>, ImageError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| ImageError::MallocAbnormal(len))?;
    v.resize(len, 0);
    Ok(v)
}

// ── Assembler ────────────────────────────────────────────────────────

/// Accumulates inflated bytes into scanlines and emits converted rows.
pub(crate) struct RowAssembler {
    ihdr: Ihdr,
    passes: Vec<Pass>,
    pass: usize,
    y: u32,
    /// Filter byte plus packed row, filling.
    cur: Vec<u8>,
    fill: usize,
    prev: Vec<u8>,
    rgba: Vec<u8>,
    /// Whole-image RGBA for interlaced input.
    staging: Option<Vec<u8>>,
    rows_done: u64,
    inflated: u64,
    expected: u64,
}

impl RowAssembler {
    /// Scratch memory (the RGBA row and, for interlaced images, the
    /// staging image) is checked against `limits` before it is reserved.
    pub(crate) fn new(ihdr: Ihdr, limits: &Limits) -> Result<Self, ImageError> {
        let passes = passes(&ihdr);
        let too_large = || ImageError::DimensionsTooLarge {
            width: ihdr.width,
            height: ihdr.height,
        };
        let row_len = (ihdr.width as usize).checked_mul(4).ok_or_else(too_large)?;
        let staging_len = if ihdr.interlaced {
            row_len
                .checked_mul(ihdr.height as usize)
                .ok_or_else(too_large)?
        } else {
            0
        };
        limits.check_memory(row_len.saturating_add(staging_len))?;
        let rgba = zeroed(row_len)?;
        let staging = if ihdr.interlaced {
            Some(zeroed(staging_len)?)
        } else {
            None
        };
        let mut asm = Self {
            ihdr,
            passes,
            pass: 0,
            y: 0,
            cur: Vec::new(),
            fill: 0,
            prev: Vec::new(),
            rgba,
            staging,
            rows_done: 0,
            inflated: 0,
            expected: expected_bytes(&ihdr),
        };
        asm.start_pass();
        Ok(asm)
    }

    fn start_pass(&mut self) {
        if let Some(p) = self.passes.get(self.pass) {
            let len = self.ihdr.row_bytes(p.width);
            self.cur.clear();
            self.cur.resize(len + 1, 0);
            self.prev.clear();
            self.prev.resize(len, 0);
            self.fill = 0;
            self.y = 0;
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pass >= self.passes.len()
    }

    /// Percentage of inflated image data seen; 100 only once every row is out.
    pub(crate) fn progress(&self) -> u8 {
        if self.is_done() {
            return 100;
        }
        let pct = self.inflated.min(self.expected) * 100 / self.expected.max(1);
        pct.min(99) as u8
    }

    /// Consume inflated bytes. Bytes past the last row are ignored.
    pub(crate) fn feed(
        &mut self,
        mut data: &[u8],
        trns: &Transparency,
        mapper: &RowMapper,
        out: &mut [u8],
        stop: &dyn Stop,
    ) -> Result<(), ImageError> {
        self.inflated += data.len() as u64;
        while !data.is_empty() && !self.is_done() {
            let take = (self.cur.len() - self.fill).min(data.len());
            self.cur[self.fill..self.fill + take].copy_from_slice(&data[..take]);
            self.fill += take;
            data = &data[take..];
            if self.fill == self.cur.len() {
                self.finish_row(trns, mapper, out)?;
                if self.rows_done % 16 == 0 {
                    stop.check()?;
                }
            }
        }
        Ok(())
    }

    fn finish_row(
        &mut self,
        trns: &Transparency,
        mapper: &RowMapper,
        out: &mut [u8],
    ) -> Result<(), ImageError> {
        let p = self.passes[self.pass];
        let (filter, row) = self.cur.split_at_mut(1);
        unfilter(filter[0], row, &self.prev, self.ihdr.filter_bpp())?;
        expand_row(&self.ihdr, trns, row, p.width, &mut self.rgba);

        let src_y = p.y0 + self.y * p.dy;
        match &mut self.staging {
            None => mapper.write_row(src_y, &self.rgba, out)?,
            Some(img) => {
                let row_start = src_y as usize * self.ihdr.width as usize * 4;
                for i in 0..p.width as usize {
                    let x = (p.x0 + i as u32 * p.dx) as usize;
                    let at = row_start + x * 4;
                    img[at..at + 4].copy_from_slice(&self.rgba[i * 4..i * 4 + 4]);
                }
            }
        }

        self.prev.copy_from_slice(&self.cur[1..]);
        self.fill = 0;
        self.y += 1;
        self.rows_done += 1;
        if self.y == p.height {
            self.pass += 1;
            self.start_pass();
            if self.is_done() {
                self.flush_staging(mapper, out)?;
            }
        }
        Ok(())
    }

    /// Convert the interlaced staging image, complete or not.
    pub(crate) fn flush_staging(&self, mapper: &RowMapper, out: &mut [u8]) -> Result<(), ImageError> {
        match &self.staging {
            Some(img) => mapper.write_image(img, self.ihdr.width, out),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paeth_matches_reference() {
        assert_eq!(paeth(10, 20, 10), 20);
        assert_eq!(paeth(20, 10, 10), 20);
        assert_eq!(paeth(10, 10, 20), 10);
        assert_eq!(paeth(0, 0, 0), 0);
    }

    #[test]
    fn filters_undo() {
        let prev = [10, 20, 30, 40];
        let mut sub = [1, 1, 1, 1];
        unfilter(1, &mut sub, &prev, 1).unwrap();
        assert_eq!(sub, [1, 2, 3, 4]);
        let mut up = [1, 1, 1, 1];
        unfilter(2, &mut up, &prev, 1).unwrap();
        assert_eq!(up, [11, 21, 31, 41]);
        let mut avg = [0, 0, 0, 0];
        unfilter(3, &mut avg, &prev, 1).unwrap();
        assert_eq!(avg, [5, 12, 21, 30]);
        assert!(unfilter(5, &mut [0], &[0], 1).is_err());
    }

    #[test]
    fn expands_packed_gray() {
        let ihdr = Ihdr {
            width: 4,
            height: 1,
            bit_depth: 2,
            color_type: ColorType::Gray,
            interlaced: false,
        };
        let mut out = [0u8; 16];
        expand_row(&ihdr, &Transparency::default(), &[0b00_01_10_11], 4, &mut out);
        assert_eq!(out, [0, 0, 0, 255, 85, 85, 85, 255, 170, 170, 170, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn scratch_memory_respects_limits() {
        let ihdr = Ihdr {
            width: 2048,
            height: 2048,
            bit_depth: 8,
            color_type: ColorType::Rgba,
            interlaced: true,
        };
        let limits = Limits::default().with_max_alloc(4096);
        assert!(matches!(
            RowAssembler::new(ihdr, &limits),
            Err(ImageError::LimitExceeded(_))
        ));
        let progressive = Ihdr {
            width: 512,
            interlaced: false,
            ..ihdr
        };
        assert!(RowAssembler::new(progressive, &limits).is_ok());
        let wide = Ihdr {
            width: 4096,
            ..progressive
        };
        assert!(RowAssembler::new(wide, &limits).is_err());
    }

    #[test]
    fn adam7_accounts_for_every_pixel() {
        let ihdr = Ihdr {
            width: 5,
            height: 3,
            bit_depth: 8,
            color_type: ColorType::Rgba,
            interlaced: true,
        };
        let px: u32 = passes(&ihdr).iter().map(|p| p.width * p.height).sum();
        assert_eq!(px, 15);
    }
}
