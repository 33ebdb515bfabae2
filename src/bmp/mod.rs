//! BMP decoding (all standard bit depths, RLE, bitfields) and a 24/32-bit
//! encoder.

mod decode;
mod encode;
mod utils;

pub use decode::BmpPermissiveness;
pub(crate) use encode::encode_bmp;

use enough::Stop;
use log::debug;

use self::decode::{FILE_HEADER_LEN, MAX_HEADER_LEN, header_len, parse_header};
use crate::decode::{DecodeContext, DecodeStatus, ImageDecoder, ImageInfo, whole_input};
use crate::error::ImageError;
use crate::registry::ImageFormat;

/// Whole-file BMP decoder.
#[derive(Debug, Default)]
pub struct BmpDecoder {
    _priv: (),
}

impl BmpDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageDecoder for BmpDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Bmp
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        let stream = cx.stream();
        stream.seek(0)?;
        let len = header_len(stream.peek_exact(FILE_HEADER_LEN)?)?.min(MAX_HEADER_LEN);
        // Header probing is permissive; the configured level applies at decode.
        let header = parse_header(
            stream.peek_exact(len)?,
            None,
            BmpPermissiveness::Permissive,
        )?;
        Ok(ImageInfo::new(header.width, header.height, header.has_alpha()))
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
        let level = cx.options().bmp_permissiveness;
        let header = parse_header(&data, Some(data.len()), level)?;
        stop.check()?;
        let decoded = decode::decode_pixels(&data, &header, level, stop)?;
        cx.write_rgba_image(&decoded.rgba, header.width)?;
        if decoded.is_complete(header.height) {
            Ok(DecodeStatus::Complete)
        } else {
            let progress = (u64::from(decoded.rows) * 100 / u64::from(header.height)) as u8;
            debug!("BMP truncated after {} of {} rows", decoded.rows, header.height);
            cx.set_progress(progress);
            Ok(DecodeStatus::Incomplete { progress })
        }
    }

    fn reset(&mut self) {}
}
