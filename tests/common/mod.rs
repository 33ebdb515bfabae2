//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::borrow::Cow;

use zenpixmap::*;

/// A deterministic RGBA pattern. Alpha varies by column when `alpha` is set.
pub fn pattern(width: u32, height: u32, alpha: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let a = if alpha { 255 - (x * 7 % 200) as u8 } else { 255 };
            out.extend_from_slice(&[(x * 13) as u8, (y * 29) as u8, ((x + y) * 5) as u8, a]);
        }
    }
    out
}

fn png_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc = crc32fast::Hasher::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&crc.finalize().to_be_bytes());
}

/// An 8-bit RGBA PNG with the zlib stream split into IDAT chunks of at most
/// `idat_len` bytes.
pub fn png(width: u32, height: u32, rgba: &[u8], idat_len: usize) -> Vec<u8> {
    let mut raw = Vec::new();
    for row in rgba.chunks_exact(width as usize * 4) {
        raw.push(0); // filter: None
        raw.extend_from_slice(row);
    }
    let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&raw, 6);

    let mut out = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    png_chunk(&mut out, b"IHDR", &ihdr);
    png_chunk(&mut out, b"tEXt", b"Comment\0fixture");
    for part in compressed.chunks(idat_len.max(1)) {
        png_chunk(&mut out, b"IDAT", part);
    }
    png_chunk(&mut out, b"IEND", &[]);
    out
}

/// IHDR fields and optional chunks for PNGs beyond 8-bit RGBA.
#[derive(Clone, Copy)]
pub struct PngLayout<'a> {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlaced: bool,
    pub palette: Option<&'a [u8]>,
    pub trns: Option<&'a [u8]>,
}

impl PngLayout<'_> {
    pub fn new(width: u32, height: u32, bit_depth: u8, color_type: u8) -> Self {
        Self {
            width,
            height,
            bit_depth,
            color_type,
            interlaced: false,
            palette: None,
            trns: None,
        }
    }
}

/// (x, y, x step, y step) of each Adam7 pass.
const ADAM7: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// A PNG whose pixel `(x, y)` has the channel samples `sample(x, y)`,
/// packed at the layout's bit depth and split into passes when interlaced.
pub fn png_with(layout: &PngLayout<'_>, sample: impl Fn(u32, u32) -> Vec<u16>) -> Vec<u8> {
    let passes: &[(u32, u32, u32, u32)] = if layout.interlaced {
        &ADAM7
    } else {
        &[(0, 0, 1, 1)]
    };
    let depth = layout.bit_depth;
    let mut raw = Vec::new();
    for &(x0, y0, dx, dy) in passes {
        let xs: Vec<u32> = (x0..layout.width).step_by(dx as usize).collect();
        if xs.is_empty() {
            continue;
        }
        for y in (y0..layout.height).step_by(dy as usize) {
            raw.push(0); // filter: None
            let (mut acc, mut filled) = (0u8, 0u8);
            for &x in &xs {
                for s in sample(x, y) {
                    match depth {
                        16 => raw.extend_from_slice(&s.to_be_bytes()),
                        8 => raw.push(s as u8),
                        d => {
                            acc |= (s as u8) << (8 - d - filled);
                            filled += d;
                            if filled == 8 {
                                raw.push(acc);
                                (acc, filled) = (0, 0);
                            }
                        }
                    }
                }
            }
            if filled > 0 {
                raw.push(acc);
            }
        }
    }
    png_from_raw(layout, &raw)
}

/// A PNG holding already filtered scanline bytes in one IDAT.
pub fn png_from_raw(layout: &PngLayout<'_>, raw: &[u8]) -> Vec<u8> {
    let mut out = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&layout.width.to_be_bytes());
    ihdr.extend_from_slice(&layout.height.to_be_bytes());
    ihdr.extend_from_slice(&[
        layout.bit_depth,
        layout.color_type,
        0,
        0,
        u8::from(layout.interlaced),
    ]);
    png_chunk(&mut out, b"IHDR", &ihdr);
    if let Some(palette) = layout.palette {
        png_chunk(&mut out, b"PLTE", palette);
    }
    if let Some(trns) = layout.trns {
        png_chunk(&mut out, b"tRNS", trns);
    }
    let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw, 6);
    png_chunk(&mut out, b"IDAT", &compressed);
    png_chunk(&mut out, b"IEND", &[]);
    out
}

pub const GIF_PALETTE: [u8; 12] = [
    0, 0, 0, // 0: black
    255, 0, 0, // 1: red
    0, 255, 0, // 2: green
    0, 0, 255, // 3: blue
];

/// A 4x4 looping animation:
/// 0. full-screen red, kept (50 ms);
/// 1. 2x2 green at (1,1), disposed to background (no delay set);
/// 2. 2x1 at (0,0): blue, then a transparent pixel (20 ms).
pub fn gif_animation() -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut enc = gif::Encoder::new(&mut out, 4, 4, &GIF_PALETTE).unwrap();
        enc.set_repeat(gif::Repeat::Infinite).unwrap();
        let frames = [
            gif::Frame {
                width: 4,
                height: 4,
                buffer: Cow::Owned(vec![1; 16]),
                delay: 5,
                dispose: gif::DisposalMethod::Keep,
                ..gif::Frame::default()
            },
            gif::Frame {
                left: 1,
                top: 1,
                width: 2,
                height: 2,
                buffer: Cow::Owned(vec![2; 4]),
                delay: 0,
                dispose: gif::DisposalMethod::Background,
                ..gif::Frame::default()
            },
            gif::Frame {
                width: 2,
                height: 1,
                buffer: Cow::Owned(vec![3, 0]),
                transparent: Some(0),
                delay: 2,
                dispose: gif::DisposalMethod::Keep,
                ..gif::Frame::default()
            },
        ];
        for frame in &frames {
            enc.write_frame(frame).unwrap();
        }
    }
    out
}

/// A baseline JPEG filled with one color.
pub fn jpeg_solid(width: u16, height: u16, rgb: [u8; 3]) -> Vec<u8> {
    let pixels: Vec<u8> = (0..usize::from(width) * usize::from(height))
        .flat_map(|_| rgb)
        .collect();
    let mut out = Vec::new();
    jpeg_encoder::Encoder::new(&mut out, 95)
        .encode(&pixels, width, height, jpeg_encoder::ColorType::Rgb)
        .unwrap();
    out
}

/// A lossless WebP.
pub fn webp(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    image_webp::WebPEncoder::new(&mut out)
        .encode(rgba, width, height, image_webp::ColorType::Rgba8)
        .unwrap();
    out
}

/// A 32-bit BMP written by [`PixelMap::encode_bmp`].
pub fn bmp(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let info = PlImageInfo {
        size: Size::new(width, height),
        pixel_format: PixelFormat::Rgba8888,
        alpha_type: AlphaType::Unpremul,
        color_space: ColorSpace::Srgb,
        base_density: 0,
    };
    let map = PixelMap::from_pixels(rgba, &info, AllocatorType::Heap, &Limits::default()).unwrap();
    let mut out = BufferPackerStream::new();
    map.encode_bmp(&mut out, &Unstoppable).unwrap();
    out.into_inner()
}

/// A type 0 WBMP. `rows` holds packed 1-bit rows, MSB first, 1 = white.
pub fn wbmp(width: u8, height: u8, rows: &[u8]) -> Vec<u8> {
    let mut out = vec![0, 0, width, height];
    out.extend_from_slice(rows);
    out
}

/// A little-endian TIFF whose only IFD points at `jpeg` as its preview.
pub fn raw_with_preview(jpeg: &[u8]) -> Vec<u8> {
    const IFD_LEN: u32 = 2 + 2 * 12 + 4;
    let data_at = 8 + IFD_LEN;
    let mut out = b"II*\0".to_vec();
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    for (tag, value) in [(0x0201u16, data_at), (0x0202, jpeg.len() as u32)] {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes()); // LONG
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(jpeg);
    out
}

/// Options that keep straight alpha, so decoded bytes compare exactly.
pub fn straight() -> DecodeOptions {
    DecodeOptions::new().with_alpha_type(AlphaType::Unpremul)
}

/// One-shot decode of frame 0.
pub fn decode(bytes: &[u8], opts: &DecodeOptions) -> Result<PixelMap, ImageError> {
    let registry = CodecRegistry::with_builtin();
    let mut source = ImageSource::from_bytes(&registry, bytes, SourceOptions::new())?;
    source.create_pixel_map(0, opts, &Unstoppable)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
