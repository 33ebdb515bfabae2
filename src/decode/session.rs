use enough::Stop;
use log::{debug, warn};

use super::{
    DecodeContext, DecodeOptions, DecodeState, DecodeStatus, ImageDecoder, ImageInfo, LoopCount,
    PlImageInfo,
};
use crate::error::ImageError;
use crate::limits::Limits;
use crate::pixel::Size;
use crate::pixel_map::PixelMap;
use crate::registry::ImageFormat;
use crate::stream::SourceStream;

/// What a successful decode produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The whole frame was decoded.
    Complete,
    /// Input ran out first; unwritten rows are zero.
    Partial { progress: u8 },
}

impl DecodeOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    /// Percentage of the frame written, 0..=100.
    pub fn progress(&self) -> u8 {
        match self {
            Self::Complete => 100,
            Self::Partial { progress } => *progress,
        }
    }
}

/// One decoder driven through the header / options / decode lifecycle.
///
/// ```
/// use zenpixmap::{
///     BufferSourceStream, CodecRegistry, DecodeOptions, DecodeState, Limits, Unstoppable,
/// };
/// # fn run(bytes: &[u8]) -> Result<(), zenpixmap::ImageError> {
/// let registry = CodecRegistry::with_builtin();
/// let stream = Box::new(BufferSourceStream::new(bytes));
/// let mut session = registry.open(stream, Limits::default())?;
/// let size = session.get_image_size(0)?;
/// session.set_decode_options(0, &DecodeOptions::new())?;
/// session.decode(0, &Unstoppable)?;
/// assert_eq!(session.state(), DecodeState::ImageDecoded);
/// let map = session.take_pixel_map()?;
/// assert_eq!(map.width(), size.width);
/// # Ok(()) }
/// ```
pub struct DecodingSession {
    decoder: Box<dyn ImageDecoder>,
    cx: DecodeContext,
    state: DecodeState,
    configured: Option<(u32, DecodeOptions)>,
}

impl core::fmt::Debug for DecodingSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecodingSession")
            .field("format", &self.decoder.format())
            .field("state", &self.state)
            .field("cx", &self.cx)
            .finish()
    }
}

impl DecodingSession {
    pub fn new(
        decoder: Box<dyn ImageDecoder>,
        stream: Box<dyn SourceStream>,
        limits: Limits,
    ) -> Self {
        Self {
            decoder,
            cx: DecodeContext::new(stream, limits),
            state: DecodeState::SourceInited,
            configured: None,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn format(&self) -> ImageFormat {
        self.decoder.format()
    }

    pub fn context(&self) -> &DecodeContext {
        &self.cx
    }

    /// Feed bytes to an incremental stream.
    pub fn update_data(&mut self, data: &[u8], is_last_chunk: bool) -> Result<(), ImageError> {
        self.cx.stream().update_data(data, is_last_chunk)
    }

    // ── Header ───────────────────────────────────────────────────────

    fn ensure_header(&mut self) -> Result<ImageInfo, ImageError> {
        if let Some(info) = self.cx.image_info() {
            return Ok(info);
        }
        self.state = DecodeState::BaseInfoParsing;
        match self.decoder.decode_header(&mut self.cx) {
            Ok(info) => {
                debug!(
                    "{:?} header: {}x{} alpha={}",
                    self.decoder.format(),
                    info.size.width,
                    info.size.height,
                    info.has_alpha
                );
                self.cx.set_image_info(info);
                self.state = DecodeState::BaseInfoParsed;
                Ok(info)
            }
            Err(e) => {
                let e = self.cx.classify(e);
                self.decoder.reset();
                self.cx.rewind();
                self.state = if matches!(e, ImageError::SourceIncomplete) {
                    DecodeState::BaseInfoParsing
                } else {
                    DecodeState::SourceInited
                };
                Err(e)
            }
        }
    }

    /// Parsed header facts, parsing on demand.
    pub fn image_info(&mut self) -> Result<ImageInfo, ImageError> {
        self.ensure_header()
    }

    /// Size of frame `index`, parsing the header on demand.
    pub fn get_image_size(&mut self, index: u32) -> Result<Size, ImageError> {
        let info = self.ensure_header()?;
        if index > 0 {
            let count = self.decoder.frame_count(&mut self.cx)?;
            self.cx.check_frame_index(index, count)?;
        }
        Ok(info.size)
    }

    /// Frames known so far.
    pub fn frame_count(&mut self) -> Result<u32, ImageError> {
        self.ensure_header()?;
        self.decoder.frame_count(&mut self.cx)
    }

    /// Per-frame delays in milliseconds, for animated formats.
    pub fn delay_times(&mut self) -> Result<alloc::vec::Vec<u32>, ImageError> {
        self.ensure_header()?;
        self.decoder.delay_times(&mut self.cx)
    }

    /// Animation repetitions, for animated formats.
    pub fn loop_count(&mut self) -> Result<LoopCount, ImageError> {
        self.ensure_header()?;
        self.decoder.loop_count(&mut self.cx)
    }

    // ── Options ──────────────────────────────────────────────────────

    /// Negotiate the output for frame `index`.
    ///
    /// After a decode finished (or failed), different options restart the
    /// session and replay the header; identical options keep the decoded
    /// output and only select the frame.
    pub fn set_decode_options(
        &mut self,
        index: u32,
        opts: &DecodeOptions,
    ) -> Result<PlImageInfo, ImageError> {
        let same = self.configured.as_ref().is_some_and(|(_, o)| o == opts);
        match self.state {
            DecodeState::ImageError if same => return Err(ImageError::InvalidState(self.state)),
            DecodeState::ImageDecoding | DecodeState::ImageDecoded | DecodeState::ImagePartial
                if same =>
            {
                if let Some(out) = self.cx.output_info().copied() {
                    let count = self.decoder.frame_count(&mut self.cx)?;
                    self.cx.check_frame_index(index, count)?;
                    self.configured = Some((index, opts.clone()));
                    return Ok(out);
                }
            }
            DecodeState::ImageDecoding
            | DecodeState::ImageDecoded
            | DecodeState::ImagePartial
            | DecodeState::ImageError => {
                // Rejected options leave the current output untouched.
                self.cx.negotiate(opts)?;
                if index > 0 {
                    let count = self.decoder.frame_count(&mut self.cx)?;
                    self.cx.check_frame_index(index, count)?;
                }
                self.restart();
            }
            _ => {}
        }
        self.ensure_header()?;
        let out = self.decoder.set_decode_options(&mut self.cx, index, opts)?;
        debug!(
            "configured {}x{} {:?} {:?} ({:?})",
            out.size.width, out.size.height, out.pixel_format, out.alpha_type, opts.allocator
        );
        self.state = DecodeState::ImageDecoding;
        self.configured = Some((index, opts.clone()));
        Ok(out)
    }

    /// Drop the output and decode progress. The parsed header is kept.
    fn restart(&mut self) {
        debug!("decode options changed; restarting session");
        self.decoder.rewind();
        self.cx.rewind();
        self.state = DecodeState::BaseInfoParsed;
        self.configured = None;
    }

    // ── Decode ───────────────────────────────────────────────────────

    /// Decode frame `index` with the negotiated options.
    ///
    /// Repeating the call after completion decodes again into the same
    /// buffer. Running out of input returns [`ImageError::SourceIncomplete`]
    /// (stream still open) or a truncation error (stream complete) unless
    /// partial images were allowed.
    pub fn decode(&mut self, index: u32, stop: &dyn Stop) -> Result<DecodeOutcome, ImageError> {
        match self.state {
            DecodeState::ImageDecoding => {}
            DecodeState::ImageDecoded | DecodeState::ImagePartial => {
                self.state = DecodeState::ImageDecoding;
            }
            s => return Err(ImageError::InvalidState(s)),
        }
        let result = self.decoder.decode(&mut self.cx, index, stop);
        self.finish(result, false)
    }

    /// Decode as far as the bytes received so far allow.
    ///
    /// Returns progress 0..=100 and never fails for lack of data while the
    /// stream is still open.
    pub fn promote_incremental_decode(
        &mut self,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<u8, ImageError> {
        match self.state {
            DecodeState::ImageDecoding => {}
            DecodeState::ImageDecoded => return Ok(100),
            s => return Err(ImageError::InvalidState(s)),
        }
        let result = self
            .decoder
            .promote_incremental_decode(&mut self.cx, index, stop);
        Ok(self.finish(result, true)?.progress())
    }

    fn finish(
        &mut self,
        result: Result<DecodeStatus, ImageError>,
        incremental: bool,
    ) -> Result<DecodeOutcome, ImageError> {
        let allow_partial = self.cx.options().allow_partial_image;
        let progress = match result.map_err(|e| self.cx.classify(e)) {
            Ok(DecodeStatus::Complete) => {
                self.cx.set_progress(100);
                self.state = DecodeState::ImageDecoded;
                return Ok(DecodeOutcome::Complete);
            }
            Ok(DecodeStatus::Incomplete { progress }) => progress.min(99),
            Err(ImageError::SourceIncomplete) => self.cx.progress().min(99),
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("{:?} decode failed: {e}", self.decoder.format());
                self.fail();
                return Err(e);
            }
        };
        self.cx.set_progress(progress);
        if self.cx.is_stream_completed() {
            if allow_partial {
                self.state = DecodeState::ImagePartial;
                return Ok(DecodeOutcome::Partial { progress });
            }
            warn!(
                "{:?} input truncated at {progress}%",
                self.decoder.format()
            );
            self.fail();
            return Err(ImageError::UnexpectedEof);
        }
        if allow_partial || incremental {
            Ok(DecodeOutcome::Partial { progress })
        } else {
            Err(ImageError::SourceIncomplete)
        }
    }

    fn fail(&mut self) {
        self.state = DecodeState::ImageError;
        self.cx.release_buffer();
    }

    // ── Output ───────────────────────────────────────────────────────

    /// The negotiated output description.
    pub fn output_info(&self) -> Option<&PlImageInfo> {
        self.cx.output_info()
    }

    /// Output pixels written so far.
    pub fn pixels(&self) -> Option<&[u8]> {
        self.cx.buffer().map(|b| b.as_slice())
    }

    /// Move the decoded buffer into a PixelMap.
    ///
    /// Allowed after a complete or partial decode, or mid-decode when partial
    /// images were opted into. A later decode allocates a fresh buffer.
    pub fn take_pixel_map(&mut self) -> Result<PixelMap, ImageError> {
        match self.state {
            DecodeState::ImageDecoded | DecodeState::ImagePartial => {}
            DecodeState::ImageDecoding if self.cx.options().allow_partial_image => {}
            s => return Err(ImageError::InvalidState(s)),
        }
        let info = self
            .cx
            .output_info()
            .copied()
            .ok_or(ImageError::InvalidState(self.state))?;
        let buffer = self
            .cx
            .take_buffer()
            .ok_or(ImageError::InvalidState(self.state))?;
        PixelMap::from_decoded(buffer, &info)
    }

    /// Back to [`DecodeState::SourceInited`], releasing every buffer.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.cx.reset();
        self.state = DecodeState::SourceInited;
        self.configured = None;
    }
}
