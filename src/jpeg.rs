//! JPEG decoding through `jpeg-decoder`.

use alloc::vec::Vec;

use enough::Stop;
use log::debug;

use crate::decode::{DecodeContext, DecodeStatus, ImageDecoder, ImageInfo, whole_input};
use crate::error::ImageError;
use crate::registry::ImageFormat;
use crate::stream::StreamReader;

fn codec_error(e: jpeg_decoder::Error) -> ImageError {
    match e {
        jpeg_decoder::Error::Format(msg) => ImageError::InvalidData(msg),
        jpeg_decoder::Error::Unsupported(f) => {
            ImageError::UnsupportedVariant(alloc::format!("{f:?}"))
        }
        jpeg_decoder::Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            ImageError::UnexpectedEof
        }
        other => ImageError::DecodeAbnormal(alloc::format!("{other}")),
    }
}

/// Expand decoder output of any pixel format to RGBA8.
fn to_rgba(format: jpeg_decoder::PixelFormat, pixels: &[u8]) -> Result<Vec<u8>, ImageError> {
    use jpeg_decoder::PixelFormat as Pf;
    let count = pixels.len() / format.pixel_bytes();
    let len = count * 4;
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| ImageError::MallocAbnormal(len))?;
    match format {
        Pf::L8 => out.extend(pixels.iter().flat_map(|&l| [l, l, l, 255])),
        // Big-endian samples; keep the high byte.
        Pf::L16 => out.extend(pixels.chunks_exact(2).flat_map(|s| [s[0], s[0], s[0], 255])),
        Pf::RGB24 => out.extend(pixels.chunks_exact(3).flat_map(|s| [s[0], s[1], s[2], 255])),
        Pf::CMYK32 => out.extend(pixels.chunks_exact(4).flat_map(|s| {
            let k = 255 - u16::from(s[3]);
            let ch = |c: u8| ((255 - u16::from(c)) * k / 255) as u8;
            [ch(s[0]), ch(s[1]), ch(s[2]), 255]
        })),
        #[allow(unreachable_patterns)]
        other => {
            return Err(ImageError::UnsupportedVariant(alloc::format!(
                "JPEG output {other:?}"
            )));
        }
    }
    Ok(out)
}

/// Decode a complete JPEG to `(width, height, rgba)`.
pub(crate) fn decode_rgba(data: &[u8], max_alloc: u64) -> Result<(u32, u32, Vec<u8>), ImageError> {
    let mut decoder = jpeg_decoder::Decoder::new(data);
    decoder.set_max_decoding_buffer_size(usize::try_from(max_alloc).unwrap_or(usize::MAX));
    let pixels = decoder.decode().map_err(codec_error)?;
    let info = decoder
        .info()
        .ok_or_else(|| ImageError::DecodeAbnormal("JPEG decoded without frame info".into()))?;
    let rgba = to_rgba(info.pixel_format, &pixels)?;
    Ok((u32::from(info.width), u32::from(info.height), rgba))
}

/// Frame size of a complete JPEG without decoding it.
pub(crate) fn read_size(data: &[u8]) -> Result<(u32, u32), ImageError> {
    let mut decoder = jpeg_decoder::Decoder::new(data);
    decoder.read_info().map_err(codec_error)?;
    decoder
        .info()
        .map(|i| (u32::from(i.width), u32::from(i.height)))
        .ok_or_else(|| ImageError::InvalidHeader("JPEG has no frame header".into()))
}

/// Whole-image JPEG decoder.
#[derive(Debug, Default)]
pub struct JpegDecoder {
    size: Option<(u32, u32)>,
}

impl JpegDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageDecoder for JpegDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Jpeg
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        let stream = cx.stream();
        stream.seek(0)?;
        let mut decoder = jpeg_decoder::Decoder::new(StreamReader::new(stream));
        decoder.read_info().map_err(codec_error)?;
        let info = decoder
            .info()
            .ok_or_else(|| ImageError::InvalidHeader("JPEG has no frame header".into()))?;
        debug!(
            "JPEG {}x{} {:?} {:?}",
            info.width, info.height, info.pixel_format, info.coding_process
        );
        let size = (u32::from(info.width), u32::from(info.height));
        self.size = Some(size);
        Ok(ImageInfo::new(size.0, size.1, false))
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
        stop.check()?;
        let (width, height, rgba) = decode_rgba(&data, cx.limits().max_alloc_bytes)?;
        if self.size.is_some_and(|s| s != (width, height)) {
            return Err(ImageError::InvalidData(alloc::format!(
                "JPEG frame size changed to {width}x{height}"
            )));
        }
        stop.check()?;
        cx.write_rgba_image(&rgba, width)?;
        Ok(DecodeStatus::Complete)
    }

    fn reset(&mut self) {
        self.size = None;
    }
}
