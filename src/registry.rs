//! Format sniffing and decoder selection.
//!
//! A [`CodecRegistry`] is an ordinary value: build one with
//! [`CodecRegistry::with_builtin`], add or replace entries, and pass it by
//! reference to whatever opens images.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::debug;

use crate::decode::{DecodingSession, ImageDecoder};
use crate::error::ImageError;
use crate::heif::HeifBackend;
use crate::limits::Limits;
use crate::stream::SourceStream;

/// Bytes peeked from the stream start for sniffing.
pub const SNIFF_LEN: usize = 32;

/// Encoded image formats known to the crate.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Wbmp,
    /// TIFF-structured camera raw (DNG, NEF, CR2, ARW, ...).
    Raw,
    Heif,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Wbmp => "image/vnd.wap.wbmp",
            Self::Raw => "image/x-raw",
            Self::Heif => "image/heif",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        Some(match mime {
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/gif" => Self::Gif,
            "image/webp" => Self::Webp,
            "image/bmp" | "image/x-ms-bmp" => Self::Bmp,
            "image/vnd.wap.wbmp" => Self::Wbmp,
            "image/x-raw" | "image/x-adobe-dng" => Self::Raw,
            "image/heif" | "image/heic" => Self::Heif,
            _ => return None,
        })
    }
}

// ── Signatures ───────────────────────────────────────────────────────

fn sniff_jpeg(head: &[u8]) -> bool {
    head.starts_with(&[0xFF, 0xD8, 0xFF])
}

fn sniff_png(head: &[u8]) -> bool {
    head.starts_with(&crate::png::SIGNATURE)
}

fn sniff_gif(head: &[u8]) -> bool {
    head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a")
}

fn sniff_webp(head: &[u8]) -> bool {
    head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP"
}

fn sniff_bmp(head: &[u8]) -> bool {
    head.starts_with(b"BM")
}

fn sniff_raw(head: &[u8]) -> bool {
    head.starts_with(b"II*\0") || head.starts_with(b"MM\0*")
}

fn sniff_heif(head: &[u8]) -> bool {
    head.len() >= 12
        && &head[4..8] == b"ftyp"
        && matches!(
            &head[8..12],
            b"heic" | b"heix" | b"hevc" | b"hevx" | b"heim" | b"heis" | b"mif1" | b"msf1"
        )
}

type Factory = Box<dyn Fn() -> Box<dyn ImageDecoder> + Send + Sync>;

struct Entry {
    format: ImageFormat,
    /// Bytes the sniffer needs before it can answer.
    min_len: usize,
    sniff: fn(&[u8]) -> bool,
    factory: Factory,
}

/// Sniffers and decoder factories, tried in registration order.
pub struct CodecRegistry {
    entries: Vec<Entry>,
}

impl core::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.format))
            .finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl CodecRegistry {
    /// A registry with no formats.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Every built-in format. HEIF headers parse, but pixel decoding needs
    /// [`with_heif_backend`](Self::with_heif_backend).
    pub fn with_builtin() -> Self {
        let mut r = Self::empty();
        r.register(ImageFormat::Jpeg, 3, sniff_jpeg, || {
            Box::new(crate::jpeg::JpegDecoder::new())
        });
        r.register(ImageFormat::Png, 8, sniff_png, || {
            Box::new(crate::png::PngDecoder::new())
        });
        r.register(ImageFormat::Gif, 6, sniff_gif, || {
            Box::new(crate::gif::GifDecoder::new())
        });
        r.register(ImageFormat::Webp, 12, sniff_webp, || {
            Box::new(crate::webp::WebpDecoder::new())
        });
        r.register(ImageFormat::Bmp, 2, sniff_bmp, || {
            Box::new(crate::bmp::BmpDecoder::new())
        });
        r.register(ImageFormat::Raw, 4, sniff_raw, || {
            Box::new(crate::raw::RawDecoder::new())
        });
        r.register(ImageFormat::Heif, 12, sniff_heif, || {
            Box::new(crate::heif::HeifDecoder::new(None))
        });
        // WBMP has no magic number; it must stay last.
        r.register(ImageFormat::Wbmp, 4, crate::wbmp::sniff, || {
            Box::new(crate::wbmp::WbmpDecoder::new())
        });
        r
    }

    /// Add a format, or replace the factory and sniffer of an existing one
    /// (keeping its position).
    pub fn register(
        &mut self,
        format: ImageFormat,
        min_len: usize,
        sniff: fn(&[u8]) -> bool,
        factory: impl Fn() -> Box<dyn ImageDecoder> + Send + Sync + 'static,
    ) {
        let entry = Entry {
            format,
            min_len,
            sniff,
            factory: Box::new(factory),
        };
        match self.entries.iter_mut().find(|e| e.format == format) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    /// Route HEIF pixel decoding through `backend`.
    pub fn with_heif_backend(mut self, backend: Arc<dyn HeifBackend>) -> Self {
        self.register(ImageFormat::Heif, 12, sniff_heif, move || {
            Box::new(crate::heif::HeifDecoder::new(Some(backend.clone())))
        });
        self
    }

    pub fn formats(&self) -> impl Iterator<Item = ImageFormat> + '_ {
        self.entries.iter().map(|e| e.format)
    }

    /// Identify the format of `head`, the first bytes of a stream.
    ///
    /// When `completed` is false and a signature cannot be ruled out yet,
    /// fails with [`ImageError::SourceIncomplete`].
    pub fn sniff(&self, head: &[u8], completed: bool) -> Result<ImageFormat, ImageError> {
        for e in &self.entries {
            if head.len() < e.min_len {
                if completed {
                    continue;
                }
                return Err(ImageError::SourceIncomplete);
            }
            if (e.sniff)(head) {
                return Ok(e.format);
            }
        }
        Err(ImageError::UnrecognizedFormat)
    }

    /// A fresh decoder for `format`.
    pub fn decoder_for(&self, format: ImageFormat) -> Result<Box<dyn ImageDecoder>, ImageError> {
        self.entries
            .iter()
            .find(|e| e.format == format)
            .map(|e| (e.factory)())
            .ok_or_else(|| {
                ImageError::UnsupportedVariant(alloc::format!("no decoder registered for {format:?}"))
            })
    }

    /// Sniff `stream` and start a session with the matching decoder.
    ///
    /// The stream cursor is left at the start.
    pub fn open(
        &self,
        mut stream: Box<dyn SourceStream>,
        limits: Limits,
    ) -> Result<DecodingSession, ImageError> {
        stream.seek(0)?;
        let completed = stream.is_stream_completed();
        let format = match stream.peek(SNIFF_LEN) {
            Ok(head) => self.sniff(head, completed)?,
            Err(ImageError::UnexpectedEof) => return Err(ImageError::UnrecognizedFormat),
            Err(e) => return Err(e),
        };
        debug!("sniffed {format:?}");
        self.open_as(format, stream, limits)
    }

    /// Start a session for a known format without sniffing.
    pub fn open_as(
        &self,
        format: ImageFormat,
        stream: Box<dyn SourceStream>,
        limits: Limits,
    ) -> Result<DecodingSession, ImageError> {
        Ok(DecodingSession::new(self.decoder_for(format)?, stream, limits))
    }
}
