//! [`ImageSource`]: open encoded bytes, inspect them, and produce
//! [`PixelMap`]s, one-shot or as data arrives.

use alloc::boxed::Box;
use alloc::vec::Vec;
use std::path::Path;

use enough::Stop;
use log::debug;

use crate::decode::{DecodeOptions, DecodeState, DecodingSession, ImageInfo, LoopCount};
use crate::error::ImageError;
use crate::limits::Limits;
use crate::pixel_map::PixelMap;
use crate::registry::{CodecRegistry, ImageFormat};
use crate::stream::{BufferSourceStream, FileSourceStream, IncrementalSourceStream, SourceStream};

/// How an [`ImageSource`] interprets its input.
#[derive(Clone, Debug, Default)]
pub struct SourceOptions {
    /// Skip sniffing and use this format's decoder.
    pub format_hint: Option<ImageFormat>,
    /// Density tag for PixelMaps whose decode options leave it at 0.
    pub base_density: i32,
    pub limits: Limits,
}

impl SourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format_hint(mut self, format: ImageFormat) -> Self {
        self.format_hint = Some(format);
        self
    }

    pub fn with_base_density(mut self, density: i32) -> Self {
        self.base_density = density;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

enum Inner {
    /// Incremental input whose format is not known yet.
    Sniffing(Box<dyn SourceStream>),
    Open(DecodingSession),
}

/// An encoded image and the session decoding it.
///
/// ```
/// use zenpixmap::{CodecRegistry, DecodeOptions, ImageSource, SourceOptions, Unstoppable};
/// # fn run(bytes: &[u8]) -> Result<(), zenpixmap::ImageError> {
/// let registry = CodecRegistry::with_builtin();
/// let mut source = ImageSource::from_bytes(&registry, bytes, SourceOptions::new())?;
/// let info = source.image_info()?;
/// let map = source.create_pixel_map(0, &DecodeOptions::new(), &Unstoppable)?;
/// assert_eq!(map.size(), info.size);
/// # Ok(()) }
/// ```
pub struct ImageSource<'r> {
    registry: &'r CodecRegistry,
    options: SourceOptions,
    inner: Inner,
}

impl core::fmt::Debug for ImageSource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut d = f.debug_struct("ImageSource");
        match &self.inner {
            Inner::Sniffing(stream) => d.field("buffered", &stream.stream_size()),
            Inner::Open(session) => d.field("session", session),
        };
        d.finish()
    }
}

impl<'r> ImageSource<'r> {
    /// Open a complete in-memory image. The bytes are copied.
    pub fn from_bytes(
        registry: &'r CodecRegistry,
        data: &[u8],
        options: SourceOptions,
    ) -> Result<Self, ImageError> {
        Self::open(registry, Box::new(BufferSourceStream::new(data)), options)
    }

    pub fn from_path(
        registry: &'r CodecRegistry,
        path: impl AsRef<Path>,
        options: SourceOptions,
    ) -> Result<Self, ImageError> {
        Self::open(registry, Box::new(FileSourceStream::open(path)?), options)
    }

    /// Open a caller-owned descriptor. It is duplicated; the caller keeps
    /// ownership of `fd`.
    #[cfg(unix)]
    pub fn from_fd(
        registry: &'r CodecRegistry,
        fd: std::os::fd::BorrowedFd<'_>,
        options: SourceOptions,
    ) -> Result<Self, ImageError> {
        Self::open(registry, Box::new(FileSourceStream::from_fd(fd)?), options)
    }

    /// An empty source fed through [`update_data`](Self::update_data).
    ///
    /// Without a format hint the decoder is chosen once enough bytes have
    /// arrived to sniff.
    pub fn incremental(
        registry: &'r CodecRegistry,
        options: SourceOptions,
    ) -> Result<Self, ImageError> {
        let stream: Box<dyn SourceStream> = Box::new(IncrementalSourceStream::new());
        let inner = match options.format_hint {
            Some(format) => Inner::Open(registry.open_as(format, stream, options.limits.clone())?),
            None => Inner::Sniffing(stream),
        };
        Ok(Self {
            registry,
            options,
            inner,
        })
    }

    fn open(
        registry: &'r CodecRegistry,
        stream: Box<dyn SourceStream>,
        options: SourceOptions,
    ) -> Result<Self, ImageError> {
        let limits = options.limits.clone();
        let session = match options.format_hint {
            Some(format) => registry.open_as(format, stream, limits)?,
            None => registry.open(stream, limits)?,
        };
        Ok(Self {
            registry,
            options,
            inner: Inner::Open(session),
        })
    }

    /// Append encoded bytes. `is_last_chunk` completes the stream.
    pub fn update_data(&mut self, data: &[u8], is_last_chunk: bool) -> Result<(), ImageError> {
        match &mut self.inner {
            Inner::Open(session) => session.update_data(data, is_last_chunk),
            Inner::Sniffing(stream) => {
                stream.update_data(data, is_last_chunk)?;
                self.try_sniff()
            }
        }
    }

    /// Pick a decoder once enough bytes are buffered.
    fn try_sniff(&mut self) -> Result<(), ImageError> {
        let Inner::Sniffing(stream) = &mut self.inner else {
            return Ok(());
        };
        let completed = stream.is_stream_completed();
        let sniffed = match stream.peek(crate::registry::SNIFF_LEN) {
            Ok(head) => self.registry.sniff(head, completed),
            Err(ImageError::UnexpectedEof) => Err(ImageError::UnrecognizedFormat),
            Err(e) => Err(e),
        };
        let format = match sniffed {
            Ok(format) => format,
            Err(ImageError::SourceIncomplete) => return Ok(()),
            Err(e) => return Err(e),
        };
        debug!("incremental source sniffed as {format:?}");
        let placeholder = Inner::Sniffing(Box::new(IncrementalSourceStream::new()));
        if let Inner::Sniffing(stream) = core::mem::replace(&mut self.inner, placeholder) {
            let limits = self.options.limits.clone();
            self.inner = Inner::Open(self.registry.open_as(format, stream, limits)?);
        }
        Ok(())
    }

    fn session(&mut self) -> Result<&mut DecodingSession, ImageError> {
        match &mut self.inner {
            Inner::Open(session) => Ok(session),
            Inner::Sniffing(_) => Err(ImageError::SourceIncomplete),
        }
    }

    /// The detected format, once known.
    pub fn format(&self) -> Option<ImageFormat> {
        match &self.inner {
            Inner::Open(session) => Some(session.format()),
            Inner::Sniffing(_) => None,
        }
    }

    /// Header facts, parsed on first use.
    pub fn image_info(&mut self) -> Result<ImageInfo, ImageError> {
        self.session()?.image_info()
    }

    pub fn frame_count(&mut self) -> Result<u32, ImageError> {
        self.session()?.frame_count()
    }

    /// Per-frame delays in milliseconds.
    pub fn delay_times(&mut self) -> Result<Vec<u32>, ImageError> {
        self.session()?.delay_times()
    }

    pub fn loop_count(&mut self) -> Result<LoopCount, ImageError> {
        self.session()?.loop_count()
    }

    fn effective(&self, opts: &DecodeOptions) -> DecodeOptions {
        let mut opts = opts.clone();
        if opts.base_density == 0 {
            opts.base_density = self.options.base_density;
        }
        opts
    }

    /// Decode frame `index` into a new PixelMap.
    ///
    /// With `allow_partial_image`, a truncated input yields the rows decoded
    /// so far instead of an error.
    pub fn create_pixel_map(
        &mut self,
        index: u32,
        opts: &DecodeOptions,
        stop: &dyn Stop,
    ) -> Result<PixelMap, ImageError> {
        let opts = self.effective(opts);
        let session = self.session()?;
        session.set_decode_options(index, &opts)?;
        let outcome = session.decode(index, stop)?;
        if outcome.is_partial() {
            debug!("partial PixelMap at {}%", outcome.progress());
        }
        session.take_pixel_map()
    }

    /// Start a decode that advances as data arrives.
    ///
    /// Until the format and header are known, the options are held and
    /// applied by the first [`promote_decoding`](IncrementalPixelMap::promote_decoding)
    /// that can.
    pub fn create_incremental_pixel_map(
        &mut self,
        index: u32,
        opts: &DecodeOptions,
    ) -> Result<IncrementalPixelMap<'_, 'r>, ImageError> {
        let opts = self.effective(opts);
        let mut pending = IncrementalPixelMap {
            source: self,
            index,
            opts,
            applied: false,
        };
        pending.apply()?;
        Ok(pending)
    }
}

/// A PixelMap being decoded from an [`ImageSource`] that is still receiving
/// data.
#[derive(Debug)]
pub struct IncrementalPixelMap<'s, 'r> {
    source: &'s mut ImageSource<'r>,
    index: u32,
    opts: DecodeOptions,
    applied: bool,
}

impl IncrementalPixelMap<'_, '_> {
    /// Append encoded bytes to the underlying source.
    pub fn update_data(&mut self, data: &[u8], is_last_chunk: bool) -> Result<(), ImageError> {
        self.source.update_data(data, is_last_chunk)
    }

    /// Decode whatever the new bytes allow. Returns progress, 0..=100.
    pub fn promote_decoding(&mut self, stop: &dyn Stop) -> Result<u8, ImageError> {
        if !self.apply()? {
            return Ok(0);
        }
        self.source
            .session()?
            .promote_incremental_decode(self.index, stop)
    }

    /// Negotiate the held options once the header has arrived.
    fn apply(&mut self) -> Result<bool, ImageError> {
        if self.applied {
            return Ok(true);
        }
        let Inner::Open(session) = &mut self.source.inner else {
            return Ok(false);
        };
        match session.set_decode_options(self.index, &self.opts) {
            Ok(_) => {
                self.applied = true;
                Ok(true)
            }
            Err(ImageError::SourceIncomplete) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> DecodeState {
        match &self.source.inner {
            Inner::Open(session) => session.state(),
            Inner::Sniffing(_) => DecodeState::SourceInited,
        }
    }

    /// Pixels decoded so far, in the negotiated layout.
    pub fn pixels(&self) -> Option<&[u8]> {
        match &self.source.inner {
            Inner::Open(session) => session.pixels(),
            Inner::Sniffing(_) => None,
        }
    }

    /// Take the decoded PixelMap. Before completion this requires
    /// `allow_partial_image`.
    pub fn into_pixel_map(self) -> Result<PixelMap, ImageError> {
        self.source.session()?.take_pixel_map()
    }
}
