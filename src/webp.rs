//! WebP decoding (lossy, lossless, extended and animated) through
//! `image-webp`.

use alloc::vec;
use alloc::vec::Vec;
use std::io::Cursor;

use enough::Stop;
use log::debug;

use crate::decode::{
    DecodeContext, DecodeStatus, ImageDecoder, ImageInfo, LoopCount, whole_input,
};
use crate::error::ImageError;
use crate::registry::ImageFormat;

type Codec<'a> = image_webp::WebPDecoder<Cursor<&'a [u8]>>;

fn codec_error(e: image_webp::DecodingError) -> ImageError {
    match e {
        image_webp::DecodingError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            ImageError::UnexpectedEof
        }
        other => ImageError::InvalidData(alloc::format!("{other}")),
    }
}

fn open(data: &[u8], max_alloc: u64) -> Result<Codec<'_>, ImageError> {
    let mut codec = image_webp::WebPDecoder::new(Cursor::new(data)).map_err(codec_error)?;
    codec.set_memory_limit(usize::try_from(max_alloc).unwrap_or(usize::MAX));
    Ok(codec)
}

/// Output buffer for one frame, checked against the limit.
fn frame_buffer(codec: &Codec<'_>, max_alloc: u64) -> Result<Vec<u8>, ImageError> {
    let len = codec
        .output_buffer_size()
        .ok_or_else(|| ImageError::InvalidHeader("WebP canvas too large".into()))?;
    if len as u64 > max_alloc {
        let (width, height) = codec.dimensions();
        return Err(ImageError::DimensionsTooLarge { width, height });
    }
    Ok(vec![0; len])
}

/// Widen RGB8 output to RGBA8; RGBA passes through.
fn into_rgba(buf: Vec<u8>, pixels: usize) -> Vec<u8> {
    if buf.len() == pixels * 4 {
        return buf;
    }
    buf.chunks_exact(3)
        .flat_map(|p| [p[0], p[1], p[2], 255])
        .collect()
}

/// WebP decoder. Animated files expose every frame, composited.
#[derive(Debug, Default)]
pub struct WebpDecoder {
    animated: bool,
    frames: u32,
}

impl WebpDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageDecoder for WebpDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Webp
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        let max_alloc = cx.limits().max_alloc_bytes;
        let completed = cx.is_stream_completed();
        let data = cx.stream().data()?;
        // The chunk walk needs the whole RIFF body; a short one is not yet malformed.
        let codec = match open(data, max_alloc) {
            Ok(codec) => codec,
            Err(_) if !completed => return Err(ImageError::SourceIncomplete),
            Err(e) => return Err(e),
        };
        let (width, height) = codec.dimensions();
        self.animated = codec.is_animated();
        self.frames = if self.animated { codec.num_frames() } else { 1 };
        debug!(
            "WebP {width}x{height} alpha={} frames={}",
            codec.has_alpha(),
            self.frames
        );
        Ok(ImageInfo::new(width, height, codec.has_alpha()))
    }

    fn frame_count(&mut self, _cx: &mut DecodeContext) -> Result<u32, ImageError> {
        Ok(self.frames)
    }

    fn delay_times(&mut self, cx: &mut DecodeContext) -> Result<Vec<u32>, ImageError> {
        if !self.animated {
            return Err(ImageError::UnsupportedVariant("WebP is not animated".into()));
        }
        let Some(data) = whole_input(cx)? else {
            return Err(ImageError::SourceIncomplete);
        };
        let max_alloc = cx.limits().max_alloc_bytes;
        let mut codec = open(&data, max_alloc)?;
        let mut buf = frame_buffer(&codec, max_alloc)?;
        let mut delays = Vec::with_capacity(self.frames as usize);
        for _ in 0..self.frames {
            delays.push(codec.read_frame(&mut buf).map_err(codec_error)?);
        }
        Ok(delays)
    }

    fn loop_count(&mut self, cx: &mut DecodeContext) -> Result<LoopCount, ImageError> {
        if !self.animated {
            return Err(ImageError::UnsupportedVariant("WebP is not animated".into()));
        }
        let max_alloc = cx.limits().max_alloc_bytes;
        let codec = open(cx.stream().data()?, max_alloc)?;
        Ok(match codec.loop_count() {
            image_webp::LoopCount::Forever => LoopCount::Infinite,
            image_webp::LoopCount::Times(n) => LoopCount::Finite(u32::from(n.get())),
        })
    }

    fn decode(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<DecodeStatus, ImageError> {
        cx.check_frame_index(index, self.frames)?;
        let Some(data) = whole_input(cx)? else {
            return Ok(DecodeStatus::Incomplete { progress: 0 });
        };
        let max_alloc = cx.limits().max_alloc_bytes;
        let mut codec = open(&data, max_alloc)?;
        let (width, height) = codec.dimensions();
        let mut buf = frame_buffer(&codec, max_alloc)?;
        if self.animated {
            // Frames are composited in order; earlier ones must be replayed.
            for _ in 0..=index {
                stop.check()?;
                codec.read_frame(&mut buf).map_err(codec_error)?;
            }
        } else {
            stop.check()?;
            codec.read_image(&mut buf).map_err(codec_error)?;
        }
        let rgba = into_rgba(buf, width as usize * height as usize);
        cx.write_rgba_image(&rgba, width)?;
        Ok(DecodeStatus::Complete)
    }

    fn reset(&mut self) {
        self.animated = false;
        self.frames = 0;
    }
}
