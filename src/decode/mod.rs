//! The decoder contract shared by every format, and the state each decode
//! carries between calls.
//!
//! A format implements [`ImageDecoder`]. It is driven by a
//! [`DecodingSession`], which owns the [`DecodeContext`] (stream, negotiated
//! output, pixel buffer, resume cursor) and enforces the state machine.

mod options;
mod session;

pub use options::DecodeOptions;
pub use session::{DecodeOutcome, DecodingSession};

use alloc::vec::Vec;

use enough::Stop;
use log::{debug, warn};

use crate::convert::RowMapper;
use crate::error::ImageError;
use crate::limits::Limits;
use crate::memory::PixelBuffer;
use crate::pixel::{AlphaType, ColorSpace, PixelFormat, Rect, Size, byte_count};
use crate::registry::ImageFormat;
use crate::stream::SourceStream;

/// Lifecycle of a decoding session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecodeState {
    /// Stream attached, nothing parsed.
    SourceInited,
    /// Header parse started but ran out of bytes.
    BaseInfoParsing,
    /// Header known; waiting for decode options.
    BaseInfoParsed,
    /// Options negotiated, output buffer may be partly filled.
    ImageDecoding,
    /// Output complete.
    ImageDecoded,
    /// Input ended early; output holds what was decoded.
    ImagePartial,
    /// Decode failed. Only a reset (or new options) leaves this state.
    ImageError,
}

/// Facts from the image header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub size: Size,
    pub has_alpha: bool,
    pub color_space: ColorSpace,
}

impl ImageInfo {
    pub fn new(width: u32, height: u32, has_alpha: bool) -> Self {
        Self {
            size: Size::new(width, height),
            has_alpha,
            color_space: ColorSpace::Srgb,
        }
    }
}

/// The output a session will produce, after negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlImageInfo {
    pub size: Size,
    pub pixel_format: PixelFormat,
    pub alpha_type: AlphaType,
    pub color_space: ColorSpace,
    pub base_density: i32,
}

/// Result of one decode step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Every output row has been written.
    Complete,
    /// Ran out of input. `progress` is 0..=99.
    Incomplete { progress: u8 },
}

/// How often an animation plays after the first time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopCount {
    Finite(u32),
    Infinite,
}

/// One image format's decoder.
///
/// Implementations keep their format-private progress (palette, chunk
/// cursor, GIF canvas) in `self`, and everything the session owns in the
/// [`DecodeContext`].
pub trait ImageDecoder: Send {
    fn format(&self) -> ImageFormat;

    /// Parse enough of the stream to know the image size.
    ///
    /// Returns [`ImageError::SourceIncomplete`] when the header has not fully
    /// arrived; the session rewinds and calls again later.
    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError>;

    /// Frames known so far.
    fn frame_count(&mut self, cx: &mut DecodeContext) -> Result<u32, ImageError> {
        let _ = cx;
        Ok(1)
    }

    /// Per-frame display time in milliseconds.
    fn delay_times(&mut self, cx: &mut DecodeContext) -> Result<Vec<u32>, ImageError> {
        let _ = cx;
        Err(ImageError::UnsupportedVariant(alloc::format!(
            "{:?} has no frame delays",
            self.format()
        )))
    }

    /// Repetitions of an animation.
    fn loop_count(&mut self, cx: &mut DecodeContext) -> Result<LoopCount, ImageError> {
        let _ = cx;
        Err(ImageError::UnsupportedVariant(alloc::format!(
            "{:?} is not animated",
            self.format()
        )))
    }

    /// Negotiate the output for frame `index`.
    fn set_decode_options(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        opts: &DecodeOptions,
    ) -> Result<PlImageInfo, ImageError> {
        let count = self.frame_count(cx)?;
        cx.check_frame_index(index, count)?;
        cx.configure(opts)
    }

    /// Decode frame `index` as far as the available bytes allow.
    fn decode(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<DecodeStatus, ImageError>;

    /// Continue an incremental decode. Never blocks for data.
    fn promote_incremental_decode(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<DecodeStatus, ImageError> {
        self.decode(cx, index, stop)
    }

    /// Drop decode progress but keep the parsed header, so the session can
    /// configure again without re-reading it.
    fn rewind(&mut self) {}

    /// Drop all format-private state.
    fn reset(&mut self);
}

/// Mutable borrows a decoder needs while writing rows.
pub(crate) struct Output<'a> {
    pub(crate) stream: &'a mut dyn SourceStream,
    pub(crate) mapper: &'a RowMapper,
    pub(crate) pixels: &'a mut [u8],
}

/// Everything a session owns on behalf of its decoder.
pub struct DecodeContext {
    stream: Box<dyn SourceStream>,
    limits: Limits,
    info: Option<ImageInfo>,
    options: DecodeOptions,
    out_info: Option<PlImageInfo>,
    mapper: Option<RowMapper>,
    buffer: Option<PixelBuffer>,
    resume_offset: usize,
    progress: u8,
}

impl core::fmt::Debug for DecodeContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("stream_size", &self.stream.stream_size())
            .field("completed", &self.stream.is_stream_completed())
            .field("info", &self.info)
            .field("out_info", &self.out_info)
            .field("buffer", &self.buffer.as_ref().map(PixelBuffer::len))
            .field("resume_offset", &self.resume_offset)
            .field("progress", &self.progress)
            .finish()
    }
}

impl DecodeContext {
    pub fn new(stream: Box<dyn SourceStream>, limits: Limits) -> Self {
        Self {
            stream,
            limits,
            info: None,
            options: DecodeOptions::default(),
            out_info: None,
            mapper: None,
            buffer: None,
            resume_offset: 0,
            progress: 0,
        }
    }

    pub fn stream(&mut self) -> &mut dyn SourceStream {
        self.stream.as_mut()
    }

    pub fn stream_ref(&self) -> &dyn SourceStream {
        self.stream.as_ref()
    }

    pub fn is_stream_completed(&self) -> bool {
        self.stream.is_stream_completed()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The parsed header, once available.
    pub fn image_info(&self) -> Option<ImageInfo> {
        self.info
    }

    /// The negotiated output, once options are set.
    pub fn output_info(&self) -> Option<&PlImageInfo> {
        self.out_info.as_ref()
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Stream offset where the next incremental step resumes.
    pub fn resume_offset(&self) -> usize {
        self.resume_offset
    }

    pub(crate) fn set_resume_offset(&mut self, offset: usize) {
        self.resume_offset = offset;
    }

    /// Decode progress, 0..=100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub(crate) fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }

    /// The output buffer, once allocated.
    pub fn buffer(&self) -> Option<&PixelBuffer> {
        self.buffer.as_ref()
    }

    pub(crate) fn take_buffer(&mut self) -> Option<PixelBuffer> {
        self.buffer.take()
    }

    pub(crate) fn set_image_info(&mut self, info: ImageInfo) {
        self.info = Some(info);
    }

    /// Truncation of an open stream is "wait for more", not malformed input.
    pub(crate) fn classify(&self, err: ImageError) -> ImageError {
        match err {
            ImageError::UnexpectedEof if !self.is_stream_completed() => ImageError::SourceIncomplete,
            other => other,
        }
    }

    pub(crate) fn check_frame_index(&self, index: u32, count: u32) -> Result<(), ImageError> {
        if index < count {
            Ok(())
        } else if self.is_stream_completed() {
            Err(ImageError::FrameOutOfRange { index, count })
        } else {
            Err(ImageError::SourceIncomplete)
        }
    }

    /// Work out the output image for `opts` without touching any state.
    ///
    /// Unsupported alpha requests are substituted, not rejected. The size is
    /// checked against the limits here, before any allocation.
    pub(crate) fn negotiate(
        &self,
        opts: &DecodeOptions,
    ) -> Result<(PlImageInfo, RowMapper), ImageError> {
        let info = self
            .info
            .ok_or(ImageError::InvalidState(DecodeState::SourceInited))?;
        let crop = opts
            .crop
            .unwrap_or(Rect::new(0, 0, info.size.width, info.size.height));
        let size = opts
            .desired_size
            .unwrap_or(Size::new(crop.width, crop.height));
        self.limits.check(size.width, size.height)?;

        let pixel_format = match opts.pixel_format {
            PixelFormat::Unknown => PixelFormat::Rgba8888,
            f => f,
        };
        let alpha_type = negotiate_alpha(pixel_format, info.has_alpha, opts.alpha_type);
        let bytes = byte_count(pixel_format, size.width, size.height)?;
        self.limits.check_memory(bytes)?;
        let mapper = RowMapper::new(info.size, crop, size, pixel_format, alpha_type)?;
        let out = PlImageInfo {
            size,
            pixel_format,
            alpha_type,
            color_space: info.color_space,
            base_density: opts.base_density,
        };
        Ok((out, mapper))
    }

    /// Negotiate the output image from the header and `opts` and adopt it.
    pub(crate) fn configure(&mut self, opts: &DecodeOptions) -> Result<PlImageInfo, ImageError> {
        let (out, mapper) = self.negotiate(opts)?;
        let bytes = byte_count(out.pixel_format, out.size.width, out.size.height)?;
        if let Some(buf) = &self.buffer
            && (buf.len() != bytes || buf.allocator_type() != opts.allocator)
        {
            debug!("output geometry changed; releasing {} byte buffer", buf.len());
            self.buffer = None;
        }
        self.options = opts.clone();
        self.mapper = Some(mapper);
        self.out_info = Some(out);
        Ok(out)
    }

    /// Borrow the stream, row mapper and output pixels, allocating the output
    /// buffer on first use.
    pub(crate) fn output(&mut self) -> Result<Output<'_>, ImageError> {
        let out_info = self
            .out_info
            .ok_or(ImageError::InvalidState(DecodeState::BaseInfoParsed))?;
        if self.buffer.is_none() {
            let bytes = byte_count(
                out_info.pixel_format,
                out_info.size.width,
                out_info.size.height,
            )?;
            self.buffer = Some(PixelBuffer::allocate(
                bytes,
                self.options.allocator,
                &self.limits,
            )?);
        }
        let Self {
            stream,
            mapper,
            buffer,
            ..
        } = self;
        let mapper = mapper
            .as_ref()
            .ok_or(ImageError::InvalidState(DecodeState::BaseInfoParsed))?;
        let pixels = buffer
            .as_mut()
            .map(PixelBuffer::as_mut_slice)
            .ok_or(ImageError::MallocAbnormal(0))?;
        Ok(Output {
            stream: stream.as_mut(),
            mapper,
            pixels,
        })
    }

    /// Map a fully decoded RGBA8 image into the output.
    pub(crate) fn write_rgba_image(&mut self, rgba: &[u8], width: u32) -> Result<(), ImageError> {
        let out = self.output()?;
        out.mapper.write_image(rgba, width, out.pixels)?;
        self.progress = 100;
        Ok(())
    }

    pub(crate) fn release_buffer(&mut self) {
        if let Some(buf) = self.buffer.take() {
            debug!("released {} byte output buffer", buf.len());
        }
    }

    /// Drop negotiated output and progress, rewinding the stream.
    pub(crate) fn rewind(&mut self) {
        self.release_buffer();
        self.out_info = None;
        self.mapper = None;
        self.resume_offset = 0;
        self.progress = 0;
        if self.stream.seek(0).is_err() {
            warn!("stream could not be rewound");
        }
    }

    /// Back to a freshly attached stream.
    pub(crate) fn reset(&mut self) {
        self.rewind();
        self.info = None;
        self.options = DecodeOptions::default();
    }
}

fn negotiate_alpha(format: PixelFormat, image_has_alpha: bool, requested: AlphaType) -> AlphaType {
    if !format.has_alpha() || (!image_has_alpha && format != PixelFormat::Alpha8) {
        if !matches!(requested, AlphaType::Unknown | AlphaType::Opaque) {
            debug!("{requested:?} requested for an opaque output; using Opaque");
        }
        return AlphaType::Opaque;
    }
    match requested {
        AlphaType::Unknown => AlphaType::Premul,
        AlphaType::Opaque => {
            warn!("image has alpha; Opaque output substituted with Premul");
            AlphaType::Premul
        }
        other => other,
    }
}

/// Whole-image codecs decode only once every byte is present.
pub(crate) fn whole_input(cx: &mut DecodeContext) -> Result<Option<Vec<u8>>, ImageError> {
    if !cx.is_stream_completed() {
        cx.set_progress(0);
        return Ok(None);
    }
    let data = cx.stream().data()?;
    let mut owned = Vec::new();
    owned
        .try_reserve_exact(data.len())
        .map_err(|_| ImageError::MallocAbnormal(data.len()))?;
    owned.extend_from_slice(data);
    Ok(Some(owned))
}
