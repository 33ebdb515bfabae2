//! BMP encoder: uncompressed 24-bit and 32-bit BMP.

use alloc::vec;

use enough::Stop;

use crate::error::ImageError;
use crate::stream::OutputStream;

const HEADER_LEN: usize = 54;

/// Encode a top-down straight-alpha RGBA8 image as a bottom-up BMP.
///
/// `alpha` selects 32-bit BGRA output; otherwise 24-bit BGR rows padded to
/// four bytes.
pub(crate) fn encode_bmp(
    rgba: &[u8],
    width: u32,
    height: u32,
    alpha: bool,
    out: &mut dyn OutputStream,
    stop: &dyn Stop,
) -> Result<(), ImageError> {
    let (w, h) = (width as usize, height as usize);
    let too_large = ImageError::DimensionsTooLarge { width, height };
    let expected = w.checked_mul(h).and_then(|n| n.checked_mul(4));
    match expected {
        Some(n) if rgba.len() >= n => {}
        Some(n) => {
            return Err(ImageError::BufferTooSmall {
                needed: n,
                actual: rgba.len(),
            });
        }
        None => return Err(too_large),
    }
    let bpp: usize = if alpha { 4 } else { 3 };
    let row_stride = w
        .checked_mul(bpp)
        .and_then(|r| r.checked_add(3))
        .map(|r| r & !3);
    let pixel_data = row_stride.and_then(|r| r.checked_mul(h));
    let (Some(row_stride), Some(pixel_data)) = (row_stride, pixel_data) else {
        return Err(too_large);
    };
    let file_size = u32::try_from(pixel_data + HEADER_LEN).map_err(|_| too_large)?;

    stop.check()?;
    out.write(&header(file_size, pixel_data as u32, width, height, bpp as u16 * 8))?;

    let mut row = vec![0u8; row_stride];
    for (i, src) in rgba[..w * h * 4].chunks_exact(w * 4).rev().enumerate() {
        if i % 16 == 0 {
            stop.check()?;
        }
        for (dst, px) in row.chunks_exact_mut(bpp).zip(src.chunks_exact(4)) {
            dst[0] = px[2];
            dst[1] = px[1];
            dst[2] = px[0];
            if alpha {
                dst[3] = px[3];
            }
        }
        out.write(&row)?;
    }
    out.flush()
}

fn header(file_size: u32, pixel_data: u32, width: u32, height: u32, bpp: u16) -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    // File header (14 bytes)
    h[0..2].copy_from_slice(b"BM");
    h[2..6].copy_from_slice(&file_size.to_le_bytes());
    h[10..14].copy_from_slice(&(HEADER_LEN as u32).to_le_bytes());
    // BITMAPINFOHEADER (40 bytes); positive height = bottom-up
    h[14..18].copy_from_slice(&40u32.to_le_bytes());
    h[18..22].copy_from_slice(&(width as i32).to_le_bytes());
    h[22..26].copy_from_slice(&(height as i32).to_le_bytes());
    h[26..28].copy_from_slice(&1u16.to_le_bytes());
    h[28..30].copy_from_slice(&bpp.to_le_bytes());
    h[34..38].copy_from_slice(&pixel_data.to_le_bytes());
    h[38..42].copy_from_slice(&2835u32.to_le_bytes()); // 72 DPI
    h[42..46].copy_from_slice(&2835u32.to_le_bytes());
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmp::decode::{BmpPermissiveness, decode_pixels, parse_header};
    use crate::stream::BufferPackerStream;
    use enough::Unstoppable;

    fn roundtrip(rgba: &[u8], w: u32, h: u32, alpha: bool) -> alloc::vec::Vec<u8> {
        let mut out = BufferPackerStream::new();
        encode_bmp(rgba, w, h, alpha, &mut out, &Unstoppable).unwrap();
        let file = out.into_inner();
        let header = parse_header(&file, Some(file.len()), BmpPermissiveness::Strict).unwrap();
        assert_eq!((header.width, header.height), (w, h));
        decode_pixels(&file, &header, BmpPermissiveness::Strict, &Unstoppable)
            .unwrap()
            .rgba
    }

    #[test]
    fn rows_are_padded_for_24bit() {
        let mut out = BufferPackerStream::new();
        let rgba = [10, 20, 30, 255, 40, 50, 60, 255, 70, 80, 90, 255];
        encode_bmp(&rgba, 3, 1, false, &mut out, &Unstoppable).unwrap();
        assert_eq!(out.as_bytes().len(), 54 + 12);
        assert_eq!(&out.as_bytes()[54..57], &[30, 20, 10]);
        assert_eq!(roundtrip(&rgba, 3, 1, false), rgba);
    }

    #[test]
    fn alpha_survives_32bit() {
        let rgba = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        assert_eq!(roundtrip(&rgba, 2, 2, true), rgba);
    }

    #[test]
    fn short_input_is_rejected() {
        let mut out = BufferPackerStream::new();
        let err = encode_bmp(&[0; 7], 2, 1, true, &mut out, &Unstoppable).unwrap_err();
        assert!(matches!(err, ImageError::BufferTooSmall { needed: 8, .. }));
        assert_eq!(out.written(), 0);
    }
}
