//! Animated GIF decoding.
//!
//! The `gif` crate parses the block structure and runs LZW; frames are kept
//! as palette indices in a cache and composited here, so any frame can be
//! requested in any order.

mod compositor;

use alloc::vec::Vec;

use enough::Stop;
use log::{debug, warn};

use self::compositor::{Compositor, Disposal, GifFrame};
use crate::decode::{
    DecodeContext, DecodeOptions, DecodeStatus, ImageDecoder, ImageInfo, LoopCount, PlImageInfo,
};
use crate::error::ImageError;
use crate::pixel::Size;
use crate::registry::ImageFormat;
use crate::stream::StreamReader;

/// Logical screen facts from the header.
#[derive(Clone, Debug)]
struct Screen {
    size: Size,
    /// Background color, when the background index is inside the global palette.
    background: Option<[u8; 3]>,
}

/// Frames parsed so far and the stream state they were parsed from.
#[derive(Default)]
struct FrameCache {
    frames: Vec<GifFrame>,
    global: Option<Vec<u8>>,
    repeat: Option<LoopCount>,
    parsed_size: usize,
    parsed_completed: bool,
    /// The trailer was reached.
    trailer: bool,
    /// Offset just past the last complete frame; 0 before the first.
    resume: usize,
    /// Index bytes held by `frames`.
    held: usize,
}

/// GIF decoder with a persistent compositing canvas.
#[derive(Default)]
pub struct GifDecoder {
    screen: Option<Screen>,
    cache: FrameCache,
    compositor: Option<Compositor>,
}

fn gif_options() -> gif::DecodeOptions {
    let mut opts = gif::DecodeOptions::new();
    opts.set_color_output(gif::ColorOutput::Indexed);
    opts
}

impl From<&gif::Frame<'_>> for GifFrame {
    fn from(f: &gif::Frame<'_>) -> Self {
        GifFrame {
            left: u32::from(f.left),
            top: u32::from(f.top),
            width: u32::from(f.width),
            height: u32::from(f.height),
            disposal: match f.dispose {
                gif::DisposalMethod::Any => Disposal::Unspecified,
                gif::DisposalMethod::Keep => Disposal::Keep,
                gif::DisposalMethod::Background => Disposal::Background,
                gif::DisposalMethod::Previous => Disposal::Previous,
            },
            transparent: f.transparent,
            palette: f.palette.clone(),
            indices: f.buffer.to_vec(),
            delay: f.delay,
        }
    }
}

impl GifDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse frames that arrived since the last call.
    ///
    /// Parsing resumes after the last complete frame: the header is replayed
    /// in front of the new bytes so LZW never runs twice on a frame. A frame
    /// cut off by the end of available data is left for a later call.
    fn refresh(&mut self, cx: &mut DecodeContext) -> Result<(), ImageError> {
        let size = cx.stream_ref().stream_size();
        let completed = cx.is_stream_completed();
        let cache = &mut self.cache;
        if cache.trailer || (size == cache.parsed_size && completed == cache.parsed_completed) {
            return Ok(());
        }
        let limits = cx.limits().clone();
        let data = cx.stream().data()?;
        let Some(header) = header_len(data) else {
            return Err(header_error_at_eof(completed));
        };
        let from = if cache.resume == 0 { header } else { cache.resume };
        let ends = frame_ends(data, from);
        if ends.offsets.is_empty() {
            // The reader needs a block after the header to start.
            cache.parsed_size = size;
            cache.parsed_completed = completed;
            cache.trailer = ends.trailer;
            return Ok(());
        }
        let source = std::io::Read::chain(&data[..header], &data[from..]);
        let mut reader = gif_options()
            .read_info(source)
            .map_err(|e| header_error(e, completed))?;

        let mut parsed = 0usize;
        let mut trailer = false;
        loop {
            // Frames the block scan has not bounded yet are parsed again later.
            if parsed == ends.len() {
                trailer = ends.trailer;
                break;
            }
            match reader.read_next_frame() {
                Ok(Some(frame)) => {
                    cache.held = cache.held.saturating_add(frame.buffer.len());
                    limits.check_memory(cache.held)?;
                    cache.frames.push(GifFrame::from(frame));
                    parsed += 1;
                }
                Ok(None) => {
                    trailer = true;
                    break;
                }
                Err(e) if completed => {
                    warn!("GIF frame {} dropped: {e}", cache.frames.len());
                    break;
                }
                Err(_) => break,
            }
        }
        if parsed > 0 {
            cache.resume = ends.offsets[parsed - 1];
        }
        debug!(
            "GIF parsed {parsed} new frames ({} total) from {size} bytes (trailer={trailer})",
            cache.frames.len()
        );
        if from == header {
            // The loop extension sits before the first frame.
            cache.global = reader.global_palette().map(<[u8]>::to_vec);
            cache.repeat = Some(match reader.repeat() {
                gif::Repeat::Infinite => LoopCount::Infinite,
                gif::Repeat::Finite(n) => LoopCount::Finite(u32::from(n)),
            });
        }
        cache.parsed_size = size;
        cache.parsed_completed = completed;
        cache.trailer = trailer;
        Ok(())
    }
}

// ── Block scanning ───────────────────────────────────────────────────

/// Bytes of the signature, screen descriptor and global color table.
fn header_len(data: &[u8]) -> Option<usize> {
    let flags = *data.get(10)?;
    let table = if flags & 0x80 != 0 { 3 << ((flags & 7) + 1) } else { 0 };
    let len = 13 + table;
    (len <= data.len()).then_some(len)
}

/// Offset just past a run of data sub-blocks starting at `at`.
fn skip_sub_blocks(data: &[u8], mut at: usize) -> Option<usize> {
    loop {
        let len = usize::from(*data.get(at)?);
        at += 1;
        if len == 0 {
            return Some(at);
        }
        at += len;
    }
}

/// Where each complete frame after `from` ends.
struct FrameEnds {
    offsets: Vec<usize>,
    /// The trailer directly follows the last complete frame.
    trailer: bool,
}

impl FrameEnds {
    fn len(&self) -> usize {
        self.offsets.len()
    }
}

/// Walk the block structure, without decoding, from `at`.
fn frame_ends(data: &[u8], mut at: usize) -> FrameEnds {
    let mut offsets = Vec::new();
    let trailer = loop {
        match data.get(at) {
            Some(0x3B) => break true,
            Some(0x21) => match skip_sub_blocks(data, at + 2) {
                Some(next) => at = next,
                None => break false,
            },
            Some(0x2C) => {
                let Some(&flags) = data.get(at + 9) else {
                    break false;
                };
                let table = if flags & 0x80 != 0 { 3 << ((flags & 7) + 1) } else { 0 };
                // Descriptor, local table, LZW code size.
                match skip_sub_blocks(data, at + 10 + table + 1) {
                    Some(next) => {
                        offsets.push(next);
                        at = next;
                    }
                    None => break false,
                }
            }
            _ => break false,
        }
    };
    FrameEnds { offsets, trailer }
}

fn header_error_at_eof(completed: bool) -> ImageError {
    if completed {
        ImageError::UnexpectedEof
    } else {
        ImageError::SourceIncomplete
    }
}

fn header_error(e: gif::DecodingError, completed: bool) -> ImageError {
    if completed {
        ImageError::InvalidHeader(alloc::format!("{e}"))
    } else {
        ImageError::SourceIncomplete
    }
}

/// Display time in milliseconds. Delays of 10 ms or less play at 100 ms,
/// as browsers do.
fn delay_ms(centis: u16) -> u32 {
    if centis <= 1 { 100 } else { u32::from(centis) * 10 }
}

impl ImageDecoder for GifDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Gif
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        let completed = cx.is_stream_completed();
        let stream = cx.stream();
        stream.seek(0)?;
        let reader = gif_options()
            .read_info(StreamReader::new(stream))
            .map_err(|e| header_error(e, completed))?;
        let (width, height) = (u32::from(reader.width()), u32::from(reader.height()));
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidHeader(alloc::format!(
                "logical screen {width}x{height}"
            )));
        }
        let background = match (reader.bg_color(), reader.global_palette()) {
            (Some(i), Some(pal)) => pal.get(i * 3..i * 3 + 3).map(|c| [c[0], c[1], c[2]]),
            _ => None,
        };
        self.screen = Some(Screen {
            size: Size::new(width, height),
            background,
        });
        self.cache = FrameCache::default();
        self.compositor = None;
        // Transparent frame pixels and an unset background both show through.
        Ok(ImageInfo::new(width, height, true))
    }

    fn frame_count(&mut self, cx: &mut DecodeContext) -> Result<u32, ImageError> {
        self.refresh(cx)?;
        Ok(self.cache.frames.len() as u32)
    }

    fn delay_times(&mut self, cx: &mut DecodeContext) -> Result<Vec<u32>, ImageError> {
        self.refresh(cx)?;
        Ok(self.cache.frames.iter().map(|f| delay_ms(f.delay)).collect())
    }

    fn loop_count(&mut self, cx: &mut DecodeContext) -> Result<LoopCount, ImageError> {
        self.refresh(cx)?;
        Ok(self.cache.repeat.unwrap_or(LoopCount::Finite(0)))
    }

    fn set_decode_options(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        opts: &DecodeOptions,
    ) -> Result<PlImageInfo, ImageError> {
        // Frame 0 may be configured before any of its bytes arrive.
        if index > 0 {
            let count = self.frame_count(cx)?;
            cx.check_frame_index(index, count)?;
        }
        cx.configure(opts)
    }

    fn decode(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<DecodeStatus, ImageError> {
        stop.check()?;
        let screen = self
            .screen
            .clone()
            .ok_or(ImageError::InvalidState(crate::DecodeState::SourceInited))?;
        self.refresh(cx)?;
        let at = index as usize;
        let count = self.cache.frames.len();
        if at >= count {
            if !cx.is_stream_completed() || (!self.cache.trailer && at == count) {
                cx.set_progress(0);
                return Ok(DecodeStatus::Incomplete { progress: 0 });
            }
            return Err(ImageError::FrameOutOfRange {
                index,
                count: count as u32,
            });
        }

        if self.compositor.is_none() {
            let bytes = screen.size.width as usize * screen.size.height as usize * 4;
            cx.limits().check_memory(bytes)?;
        }
        let compositor = self
            .compositor
            .get_or_insert_with(|| Compositor::new(screen.size, screen.background));
        let rgba = compositor.render(
            &self.cache.frames,
            self.cache.global.as_deref(),
            at,
            stop,
        )?;
        cx.write_rgba_image(rgba, screen.size.width)?;
        Ok(DecodeStatus::Complete)
    }

    fn rewind(&mut self) {
        self.compositor = None;
    }

    fn reset(&mut self) {
        self.screen = None;
        self.cache = FrameCache::default();
        self.compositor = None;
    }
}
