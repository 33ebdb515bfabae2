//! WBMP type 0: uncompressed monochrome, one bit per pixel.
//!
//! Layout: type (multi-byte int, must be 0), fixed header byte (0), width and
//! height as multi-byte ints, then rows of `ceil(width / 8)` bytes, most
//! significant bit first. A set bit is white.

use alloc::vec::Vec;

use enough::Stop;

use crate::decode::{DecodeContext, DecodeStatus, ImageDecoder, ImageInfo, whole_input};
use crate::error::ImageError;
use crate::registry::ImageFormat;

/// Multi-byte ints longer than this cannot fit a `u32` dimension.
const MAX_INT_BYTES: usize = 4;

/// Read a multi-byte int: 7 bits per byte, high bit set on all but the last.
/// Returns the value and bytes consumed, or `None` if it runs off `data`.
fn read_uintvar(data: &[u8]) -> Result<Option<(u32, usize)>, ImageError> {
    let mut value = 0u32;
    for (i, &b) in data.iter().enumerate() {
        if i == MAX_INT_BYTES {
            return Err(ImageError::InvalidHeader("WBMP integer too long".into()));
        }
        value = (value << 7) | u32::from(b & 0x7F);
        if b & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

struct Header {
    width: u32,
    height: u32,
    data_offset: usize,
}

/// Parse the header; `Ok(None)` when `data` ends inside it.
fn parse_header(data: &[u8]) -> Result<Option<Header>, ImageError> {
    let [kind, fixed, ..] = data else {
        return Ok(None);
    };
    if *kind != 0 {
        return Err(ImageError::UnsupportedVariant(alloc::format!("WBMP type {kind}")));
    }
    if *fixed != 0 {
        return Err(ImageError::InvalidHeader("WBMP extension headers".into()));
    }
    let mut pos = 2;
    let Some((width, n)) = read_uintvar(&data[pos..])? else {
        return Ok(None);
    };
    pos += n;
    let Some((height, n)) = read_uintvar(&data[pos..])? else {
        return Ok(None);
    };
    pos += n;
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidHeader(alloc::format!(
            "WBMP dimensions {width}x{height}"
        )));
    }
    Ok(Some(Header {
        width,
        height,
        data_offset: pos,
    }))
}

/// Whether `head` looks like a WBMP header.
pub(crate) fn sniff(head: &[u8]) -> bool {
    matches!(parse_header(head), Ok(Some(_)))
}

fn expand(data: &[u8], header: &Header, stop: &dyn Stop) -> Result<Vec<u8>, ImageError> {
    let (w, h) = (header.width as usize, header.height as usize);
    let row_bytes = w.div_ceil(8);
    let needed = row_bytes
        .checked_mul(h)
        .and_then(|n| n.checked_add(header.data_offset))
        .ok_or(ImageError::DimensionsTooLarge {
            width: header.width,
            height: header.height,
        })?;
    if data.len() < needed {
        return Err(ImageError::UnexpectedEof);
    }
    let len = w * h * 4;
    let mut rgba = Vec::new();
    rgba.try_reserve_exact(len)
        .map_err(|_| ImageError::MallocAbnormal(len))?;
    for (y, row) in data[header.data_offset..needed].chunks_exact(row_bytes).enumerate() {
        if y % 16 == 0 {
            stop.check()?;
        }
        rgba.extend((0..w).flat_map(|x| {
            let v = if row[x / 8] & (0x80 >> (x % 8)) != 0 { 255 } else { 0 };
            [v, v, v, 255]
        }));
    }
    Ok(rgba)
}

/// WBMP decoder.
#[derive(Debug, Default)]
pub struct WbmpDecoder {
    _priv: (),
}

impl WbmpDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageDecoder for WbmpDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Wbmp
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        let completed = cx.is_stream_completed();
        match parse_header(cx.stream().data()?)? {
            Some(h) => Ok(ImageInfo::new(h.width, h.height, false)),
            None if completed => Err(ImageError::UnexpectedEof),
            None => Err(ImageError::SourceIncomplete),
        }
    }

    fn decode(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<DecodeStatus, ImageError> {
        cx.check_frame_index(index, 1)?;
        let Some(data) = whole_input(cx)? else {
            return Ok(DecodeStatus::Incomplete { progress: 0 });
        };
        let header = parse_header(&data)?.ok_or(ImageError::UnexpectedEof)?;
        let rgba = expand(&data, &header, stop)?;
        cx.write_rgba_image(&rgba, header.width)?;
        Ok(DecodeStatus::Complete)
    }

    fn reset(&mut self) {}
}
