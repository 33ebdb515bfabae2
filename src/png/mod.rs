//! Chunked, resumable PNG decoding.
//!
//! The chunk walker pushes IDAT payload into a streaming inflater in bounded
//! slices and remembers its stream offset in the context's resume cursor, so
//! each call continues where the last one stopped without re-parsing. Chunk
//! headers and CRCs are only consumed once they have fully arrived.

mod chunk;
mod rows;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use enough::Stop;
use log::debug;
use miniz_oxide::inflate::stream::{InflateState, inflate};
use miniz_oxide::{DataFormat, MZError, MZFlush, MZStatus};

use self::chunk::{ChunkHeader, ColorType, Ihdr, Transparency};
use self::rows::RowAssembler;
use crate::decode::{DecodeContext, DecodeStatus, ImageDecoder, ImageInfo};
use crate::error::ImageError;
use crate::limits::Limits;
use crate::registry::ImageFormat;
use crate::stream::SourceStream;

pub(crate) const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Signature plus the complete IHDR chunk.
const HEADER_LEN: usize = 33;

/// Most compressed bytes handed to the inflater per push.
pub const PNG_PUSH_SLICE: usize = 8 * 1024;

/// `len` bytes at `offset`, or the stream's shortfall error.
fn bytes_at(stream: &mut dyn SourceStream, offset: usize, len: usize) -> Result<&[u8], ImageError> {
    if offset.saturating_add(len) > stream.stream_size() {
        return Err(stream.shortfall());
    }
    stream.seek(offset)?;
    stream.peek_exact(len)
}

#[derive(Debug)]
struct Header {
    ihdr: Ihdr,
    trns: Transparency,
    /// Offset of the first IDAT chunk header.
    first_idat: usize,
}

/// Position inside the IDAT sequence.
enum Cursor {
    /// At a chunk header.
    BetweenChunks,
    /// Inside an IDAT payload with `left` bytes still to push.
    InIdat { left: usize, crc: crc32fast::Hasher },
    /// Payload pushed; the 4-byte CRC is next.
    AtCrc { crc: crc32fast::Hasher },
}

struct Walk {
    inflater: Box<InflateState>,
    cursor: Cursor,
    rows: RowAssembler,
    scratch: Vec<u8>,
    stream_end: bool,
}

impl Walk {
    fn new(ihdr: Ihdr, limits: &Limits) -> Result<Self, ImageError> {
        Ok(Self {
            inflater: InflateState::new_boxed(DataFormat::Zlib),
            cursor: Cursor::BetweenChunks,
            rows: RowAssembler::new(ihdr, limits)?,
            scratch: vec![0; 32 * 1024],
            stream_end: false,
        })
    }
}

/// PNG decoder with resumable IDAT processing.
#[derive(Default)]
pub struct PngDecoder {
    header: Option<Header>,
    walk: Option<Walk>,
}

impl PngDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_header(stream: &mut dyn SourceStream) -> Result<Header, ImageError> {
        let head = bytes_at(stream, 0, HEADER_LEN)?;
        if head[..8] != SIGNATURE {
            return Err(ImageError::InvalidHeader("missing PNG signature".into()));
        }
        let first = ChunkHeader::parse(&head[8..16])?;
        if first.kind != chunk::IHDR {
            return Err(ImageError::InvalidHeader("first chunk is not IHDR".into()));
        }
        chunk::check_crc(&chunk::IHDR, &head[16..29], &head[29..33])?;
        let ihdr = Ihdr::parse(&head[16..29])?;

        let mut trns = Transparency::default();
        let mut offset = HEADER_LEN;
        loop {
            let ch = ChunkHeader::parse(bytes_at(stream, offset, chunk::HEADER_LEN)?)?;
            match ch.kind {
                chunk::IDAT => break,
                chunk::IEND => {
                    return Err(ImageError::InvalidData("no IDAT before IEND".into()));
                }
                chunk::PLTE | chunk::TRNS => {
                    let whole = bytes_at(stream, offset, ch.total_len())?;
                    let (data, crc) = whole[chunk::HEADER_LEN..].split_at(ch.len);
                    chunk::check_crc(&ch.kind, data, crc)?;
                    if ch.kind == chunk::PLTE {
                        trns.set_palette(data)?;
                    } else {
                        trns.set_trns(ihdr.color_type, data)?;
                    }
                }
                _ => {}
            }
            offset = offset
                .checked_add(ch.total_len())
                .ok_or_else(|| ImageError::InvalidData("chunk offset overflow".into()))?;
        }
        if ihdr.color_type == ColorType::Indexed && trns.palette.is_empty() {
            return Err(ImageError::InvalidData("indexed image without PLTE".into()));
        }
        Ok(Header {
            ihdr,
            trns,
            first_idat: offset,
        })
    }

    /// Push as much IDAT data as is available. Returns once rows are done,
    /// the stream runs dry, or the data stream is malformed.
    fn pump(&mut self, cx: &mut DecodeContext, stop: &dyn Stop) -> Result<DecodeStatus, ImageError> {
        let (Some(header), Some(walk)) = (&self.header, &mut self.walk) else {
            return Err(ImageError::InvalidState(crate::DecodeState::BaseInfoParsed));
        };
        let mut offset = cx.resume_offset();
        let out = cx.output()?;
        let result = loop {
            if walk.rows.is_done() {
                break DecodeStatus::Complete;
            }
            match core::mem::replace(&mut walk.cursor, Cursor::BetweenChunks) {
                Cursor::BetweenChunks => {
                    let Ok(bytes) = bytes_at(out.stream, offset, chunk::HEADER_LEN) else {
                        break DecodeStatus::Incomplete {
                            progress: walk.rows.progress(),
                        };
                    };
                    let ch = ChunkHeader::parse(bytes)?;
                    if ch.kind != chunk::IDAT || walk.stream_end {
                        return Err(ImageError::InvalidData(alloc::format!(
                            "image data ended before the last row ({} chunk)",
                            alloc::string::String::from_utf8_lossy(&ch.kind)
                        )));
                    }
                    offset += chunk::HEADER_LEN;
                    let mut crc = crc32fast::Hasher::new();
                    crc.update(&ch.kind);
                    walk.cursor = Cursor::InIdat { left: ch.len, crc };
                }
                Cursor::InIdat { left: 0, crc } => {
                    walk.cursor = Cursor::AtCrc { crc };
                }
                Cursor::InIdat { left, mut crc } => {
                    let available = out.stream.stream_size().saturating_sub(offset);
                    let n = left.min(available).min(PNG_PUSH_SLICE);
                    if n == 0 {
                        walk.cursor = Cursor::InIdat { left, crc };
                        break DecodeStatus::Incomplete {
                            progress: walk.rows.progress(),
                        };
                    }
                    let input = bytes_at(out.stream, offset, n)?;
                    crc.update(input);
                    push(walk, input, &header.trns, out.mapper, out.pixels, stop)?;
                    offset += n;
                    walk.cursor = Cursor::InIdat { left: left - n, crc };
                }
                Cursor::AtCrc { crc } => {
                    let Ok(stored) = bytes_at(out.stream, offset, chunk::CRC_LEN) else {
                        walk.cursor = Cursor::AtCrc { crc };
                        break DecodeStatus::Incomplete {
                            progress: walk.rows.progress(),
                        };
                    };
                    chunk::verify(crc, stored, &chunk::IDAT)?;
                    offset += chunk::CRC_LEN;
                }
            }
        };
        if let DecodeStatus::Incomplete { .. } = result {
            walk.rows.flush_staging(out.mapper, out.pixels)?;
        }
        cx.set_resume_offset(offset);
        cx.set_progress(walk.rows.progress());
        Ok(result)
    }
}

/// Inflate one slice of compressed input and hand the output to the rows.
fn push(
    walk: &mut Walk,
    mut input: &[u8],
    trns: &Transparency,
    mapper: &crate::convert::RowMapper,
    pixels: &mut [u8],
    stop: &dyn Stop,
) -> Result<(), ImageError> {
    let Walk {
        inflater,
        rows,
        scratch,
        stream_end,
        ..
    } = walk;
    loop {
        let res = inflate(inflater, input, scratch, MZFlush::None);
        input = &input[res.bytes_consumed..];
        if res.bytes_written > 0 {
            rows.feed(&scratch[..res.bytes_written], trns, mapper, pixels, stop)?;
        }
        match res.status {
            Ok(MZStatus::StreamEnd) => {
                *stream_end = true;
                return Ok(());
            }
            Ok(_) => {
                if input.is_empty() && res.bytes_written < scratch.len() {
                    return Ok(());
                }
            }
            Err(MZError::Buf) => return Ok(()),
            Err(e) => {
                return Err(ImageError::InvalidData(alloc::format!(
                    "zlib stream error: {e:?}"
                )));
            }
        }
    }
}

impl ImageDecoder for PngDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Png
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        let header = Self::parse_header(cx.stream())?;
        let ihdr = header.ihdr;
        let has_alpha = matches!(ihdr.color_type, ColorType::GrayAlpha | ColorType::Rgba)
            || header.trns.key.is_some()
            || header.trns.palette.iter().any(|p| p[3] != 255);
        debug!(
            "PNG {:?} depth {} interlaced={} IDAT at {}",
            ihdr.color_type, ihdr.bit_depth, ihdr.interlaced, header.first_idat
        );
        self.header = Some(header);
        self.walk = None;
        Ok(ImageInfo::new(ihdr.width, ihdr.height, has_alpha))
    }

    fn decode(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<DecodeStatus, ImageError> {
        cx.check_frame_index(index, 1)?;
        let header = self
            .header
            .as_ref()
            .ok_or(ImageError::InvalidState(crate::DecodeState::SourceInited))?;
        let restart = self.walk.as_ref().is_none_or(|w| w.rows.is_done());
        if restart {
            self.walk = Some(Walk::new(header.ihdr, cx.limits())?);
            cx.set_resume_offset(header.first_idat);
            cx.set_progress(0);
        }
        let result = self.pump(cx, stop);
        if result.is_err() {
            // The inflater may have consumed input the cursor never recorded.
            self.walk = None;
        }
        result
    }

    fn rewind(&mut self) {
        self.walk = None;
    }

    fn reset(&mut self) {
        self.header = None;
        self.walk = None;
    }
}
