//! # zenpixmap
//!
//! Image decoding into [`PixelMap`]s: format sniffing, header inspection,
//! one-shot and incremental decoding, animated GIF compositing, and
//! zero-copy transfer of shared-memory PixelMaps between processes.
//!
//! ## Supported Formats
//!
//! | Format | Decoder | Incremental |
//! |--------|---------|-------------|
//! | PNG (all color types and depths, Adam7) | [`PngDecoder`] | row by row |
//! | GIF (animated, disposal, transparency) | [`GifDecoder`] | per frame |
//! | JPEG (baseline, progressive, CMYK) | [`JpegDecoder`] | whole file |
//! | WebP (lossy, lossless, animated) | [`WebpDecoder`] | whole file |
//! | BMP (1-32 bit, RLE, bitfields) | [`BmpDecoder`] | whole file |
//! | WBMP (type 0) | [`WbmpDecoder`] | whole file |
//! | DNG / TIFF-based RAW (embedded JPEG preview) | [`RawDecoder`] | whole file |
//! | HEIF (container; HEVC via [`HeifBackend`]) | [`HeifDecoder`] | whole file |
//!
//! "Whole file" decoders report `Incomplete` until the stream is complete,
//! then decode in one step.
//!
//! ## Usage
//!
//! ```no_run
//! use zenpixmap::{
//!     CodecRegistry, DecodeOptions, ImageSource, PixelFormat, SourceOptions, Unstoppable,
//! };
//!
//! let registry = CodecRegistry::with_builtin();
//! let mut source = ImageSource::from_path(&registry, "photo.png", SourceOptions::new())?;
//!
//! // Probe without decoding
//! let info = source.image_info()?;
//! println!("{:?} {}x{}", source.format(), info.size.width, info.size.height);
//!
//! // Decode frame 0 as BGRA
//! let opts = DecodeOptions::new().with_pixel_format(PixelFormat::Bgra8888);
//! let map = source.create_pixel_map(0, &opts, &Unstoppable)?;
//! assert_eq!(map.size(), info.size);
//! # Ok::<(), zenpixmap::ImageError>(())
//! ```
//!
//! ## Incremental decoding
//!
//! ```no_run
//! use zenpixmap::{CodecRegistry, DecodeOptions, ImageSource, SourceOptions, Unstoppable};
//!
//! # let chunks: Vec<(Vec<u8>, bool)> = Vec::new();
//! let registry = CodecRegistry::with_builtin();
//! let mut source = ImageSource::incremental(&registry, SourceOptions::new())?;
//! let mut pending = source.create_incremental_pixel_map(0, &DecodeOptions::new())?;
//! for (chunk, last) in chunks {
//!     pending.update_data(&chunk, last)?;
//!     let progress = pending.promote_decoding(&Unstoppable)?;
//!     println!("{progress}%");
//! }
//! let map = pending.into_pixel_map()?;
//! # Ok::<(), zenpixmap::ImageError>(())
//! ```

#![deny(unsafe_code)]

extern crate alloc;

mod convert;
mod decode;
mod error;
mod limits;
mod memory;
mod pixel;
mod pixel_map;
mod registry;
mod source;
mod stream;

mod bmp;
mod gif;
mod heif;
mod jpeg;
mod png;
mod raw;
mod wbmp;
mod webp;

#[cfg(unix)]
pub mod ipc;

// Re-exports
pub use bmp::{BmpDecoder, BmpPermissiveness};
pub use decode::{
    DecodeContext, DecodeOptions, DecodeOutcome, DecodeState, DecodeStatus, DecodingSession,
    ImageDecoder, ImageInfo, LoopCount, PlImageInfo,
};
pub use enough::{Stop, StopReason, Unstoppable};
pub use error::{ErrorKind, ImageError};
pub use gif::GifDecoder;
pub use heif::{HeifBackend, HeifDecoder, HeifExtent, HeifImage};
pub use jpeg::JpegDecoder;
pub use limits::Limits;
#[cfg(unix)]
pub use memory::SharedMemory;
pub use memory::{AllocatorType, HeapBuffer, PixelBuffer};
#[cfg(feature = "rgb")]
pub use pixel::MapPixel;
pub use pixel::{AlphaType, ColorSpace, PixelFormat, Rect, Size, byte_count, row_stride};
pub use pixel_map::PixelMap;
pub use png::PngDecoder;
pub use raw::RawDecoder;
pub use registry::{CodecRegistry, ImageFormat, SNIFF_LEN};
pub use source::{ImageSource, IncrementalPixelMap, SourceOptions};
pub use stream::{
    BufferPackerStream, BufferSourceStream, FilePackerStream, FileSourceStream,
    IncrementalSourceStream, OutputStream, SourceStream, StreamReader,
};
pub use wbmp::WbmpDecoder;
pub use webp::WebpDecoder;

#[cfg(unix)]
pub use ipc::MessageParcel;
