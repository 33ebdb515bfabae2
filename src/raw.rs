//! Camera raw files (DNG, NEF, CR2, ARW, PEF...) decoded through their
//! embedded JPEG preview.
//!
//! The raw sensor data is never developed. The TIFF structure is walked
//! (IFD chain plus SubIFDs), every JPEG it points at is collected, and the
//! largest one is decoded by the JPEG path.

use alloc::vec::Vec;

use enough::Stop;
use log::debug;

use crate::decode::{DecodeContext, DecodeStatus, ImageDecoder, ImageInfo, whole_input};
use crate::error::ImageError;
use crate::jpeg;
use crate::registry::ImageFormat;

/// IFDs visited before the walk gives up on a hostile file.
const MAX_IFDS: usize = 64;

const TAG_COMPRESSION: u16 = 0x0103;
const TAG_PHOTOMETRIC: u16 = 0x0106;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_SUB_IFDS: u16 = 0x014A;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;

/// Photometric values of undeveloped sensor data.
const PHOTOMETRIC_CFA: u32 = 32803;
const PHOTOMETRIC_LINEAR_RAW: u32 = 34892;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Preview {
    offset: usize,
    len: usize,
}

struct Tiff<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> Tiff<'a> {
    fn new(data: &'a [u8]) -> Result<(Self, usize), ImageError> {
        let big_endian = match data.get(..4) {
            Some(b"II*\0") => false,
            Some(b"MM\0*") => true,
            Some(_) => return Err(ImageError::InvalidHeader("not a TIFF raw file".into())),
            None => return Err(ImageError::UnexpectedEof),
        };
        let tiff = Self { data, big_endian };
        let first = tiff.u32(4)? as usize;
        Ok((tiff, first))
    }

    fn bytes<const N: usize>(&self, at: usize) -> Result<[u8; N], ImageError> {
        self.data
            .get(at..at.wrapping_add(N))
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ImageError::InvalidData(alloc::format!("TIFF offset {at} out of range")))
    }

    fn u16(&self, at: usize) -> Result<u16, ImageError> {
        let b = self.bytes::<2>(at)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32(&self, at: usize) -> Result<u32, ImageError> {
        let b = self.bytes::<4>(at)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    /// First value of an entry. SHORT values sit in the first two bytes of
    /// the value field.
    fn scalar(&self, entry: usize) -> Result<u32, ImageError> {
        match self.u16(entry + 2)? {
            3 => self.u16(entry + 8).map(u32::from),
            _ => self.u32(entry + 8),
        }
    }

    /// All LONG (or IFD) values of an entry.
    fn longs(&self, entry: usize) -> Result<Vec<u32>, ImageError> {
        let count = self.u32(entry + 4)? as usize;
        if count <= 1 {
            return Ok(Vec::from([self.u32(entry + 8)?]));
        }
        let at = self.u32(entry + 8)? as usize;
        if count > self.data.len() / 4 {
            return Err(ImageError::InvalidData("TIFF value count out of range".into()));
        }
        (0..count).map(|i| self.u32(at + i * 4)).collect()
    }
}

/// What one IFD says about a JPEG it may hold.
#[derive(Default)]
struct IfdFacts {
    jpeg_offset: Option<u32>,
    jpeg_len: Option<u32>,
    compression: Option<u32>,
    photometric: Option<u32>,
    strip_offsets: Vec<u32>,
    strip_counts: Vec<u32>,
}

impl IfdFacts {
    fn previews(&self, out: &mut Vec<Preview>) {
        if let (Some(offset), Some(len)) = (self.jpeg_offset, self.jpeg_len) {
            out.push(Preview {
                offset: offset as usize,
                len: len as usize,
            });
        }
        let raw_data = matches!(
            self.photometric,
            Some(PHOTOMETRIC_CFA | PHOTOMETRIC_LINEAR_RAW)
        );
        if matches!(self.compression, Some(6 | 7))
            && !raw_data
            && let ([offset], [len]) = (self.strip_offsets.as_slice(), self.strip_counts.as_slice())
        {
            out.push(Preview {
                offset: *offset as usize,
                len: *len as usize,
            });
        }
    }
}

/// Read one IFD, queueing its SubIFDs and successor.
fn read_ifd(tiff: &Tiff<'_>, ifd: usize, pending: &mut Vec<usize>) -> Result<IfdFacts, ImageError> {
    let count = tiff.u16(ifd)? as usize;
    let mut facts = IfdFacts::default();
    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        match tiff.u16(entry)? {
            TAG_JPEG_OFFSET => facts.jpeg_offset = Some(tiff.scalar(entry)?),
            TAG_JPEG_LENGTH => facts.jpeg_len = Some(tiff.scalar(entry)?),
            TAG_COMPRESSION => facts.compression = Some(tiff.scalar(entry)?),
            TAG_PHOTOMETRIC => facts.photometric = Some(tiff.scalar(entry)?),
            TAG_STRIP_OFFSETS => facts.strip_offsets = tiff.longs(entry)?,
            TAG_STRIP_BYTE_COUNTS => facts.strip_counts = tiff.longs(entry)?,
            TAG_SUB_IFDS => pending.extend(tiff.longs(entry)?.into_iter().map(|o| o as usize)),
            _ => {}
        }
    }
    pending.push(tiff.u32(ifd + 2 + count * 12)? as usize);
    Ok(facts)
}

/// Every embedded JPEG in the file, in walk order.
///
/// A damaged IFD is skipped; previews found elsewhere are still returned.
fn find_previews(data: &[u8]) -> Result<Vec<Preview>, ImageError> {
    let (tiff, first) = Tiff::new(data)?;
    let mut pending = Vec::from([first]);
    let mut visited = Vec::new();
    let mut found = Vec::new();

    while let Some(ifd) = pending.pop() {
        if ifd == 0 || visited.contains(&ifd) {
            continue;
        }
        if visited.len() == MAX_IFDS {
            debug!("raw: IFD walk stopped after {MAX_IFDS} directories");
            break;
        }
        visited.push(ifd);
        match read_ifd(&tiff, ifd, &mut pending) {
            Ok(facts) => facts.previews(&mut found),
            Err(e) => debug!("raw: skipping IFD at {ifd}: {e}"),
        }
    }

    found.retain(|p| {
        p.offset
            .checked_add(p.len)
            .is_some_and(|end| end <= data.len())
            && data[p.offset..].starts_with(&[0xFF, 0xD8])
    });
    Ok(found)
}

/// The preview with the most pixels, with its size.
fn best_preview(data: &[u8]) -> Result<(Preview, (u32, u32)), ImageError> {
    let mut best: Option<(Preview, (u32, u32))> = None;
    for p in find_previews(data)? {
        let Ok(size) = jpeg::read_size(&data[p.offset..p.offset + p.len]) else {
            debug!("raw: unreadable JPEG at {}", p.offset);
            continue;
        };
        let area = |s: (u32, u32)| u64::from(s.0) * u64::from(s.1);
        if best.is_none_or(|(_, b)| area(size) > area(b)) {
            best = Some((p, size));
        }
    }
    best.ok_or_else(|| ImageError::UnsupportedVariant("raw file has no JPEG preview".into()))
}

/// Decoder for TIFF-based camera raw files.
#[derive(Debug, Default)]
pub struct RawDecoder {
    preview: Option<Preview>,
}

impl RawDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageDecoder for RawDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Raw
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        // IFDs may point anywhere in the file.
        if !cx.is_stream_completed() {
            return Err(ImageError::SourceIncomplete);
        }
        let (preview, (width, height)) = best_preview(cx.stream().data()?)?;
        debug!(
            "raw: {width}x{height} JPEG preview at {} ({} bytes)",
            preview.offset, preview.len
        );
        self.preview = Some(preview);
        Ok(ImageInfo::new(width, height, false))
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
        let preview = match self.preview {
            Some(p) => p,
            None => best_preview(&data)?.0,
        };
        stop.check()?;
        let jpeg = &data[preview.offset..preview.offset + preview.len];
        let (width, _, rgba) = jpeg::decode_rgba(jpeg, cx.limits().max_alloc_bytes)?;
        stop.check()?;
        cx.write_rgba_image(&rgba, width)?;
        Ok(DecodeStatus::Complete)
    }

    fn reset(&mut self) {
        self.preview = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Little-endian TIFF: IFD0 with a thumbnail pointer and one SubIFD with
    /// a single-strip JPEG.
    fn sample(photometric: u32) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(b"II*\0");
        f.extend_from_slice(&8u32.to_le_bytes());
        let entry = |f: &mut Vec<u8>, tag: u16, ty: u16, value: u32| {
            f.extend_from_slice(&tag.to_le_bytes());
            f.extend_from_slice(&ty.to_le_bytes());
            f.extend_from_slice(&1u32.to_le_bytes());
            f.extend_from_slice(&value.to_le_bytes());
        };
        // IFD0 at 8, three entries, next link at 46
        f.extend_from_slice(&3u16.to_le_bytes());
        entry(&mut f, TAG_JPEG_OFFSET, 4, 104);
        entry(&mut f, TAG_JPEG_LENGTH, 4, 4);
        entry(&mut f, TAG_SUB_IFDS, 4, 50);
        f.extend_from_slice(&0u32.to_le_bytes());
        // SubIFD at 50, four entries, next link at 100
        f.extend_from_slice(&4u16.to_le_bytes());
        entry(&mut f, TAG_COMPRESSION, 3, 7);
        entry(&mut f, TAG_PHOTOMETRIC, 3, photometric);
        entry(&mut f, TAG_STRIP_OFFSETS, 4, 108);
        entry(&mut f, TAG_STRIP_BYTE_COUNTS, 4, 6);
        f.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(f.len(), 104);
        f.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        f.extend_from_slice(&[0xFF, 0xD8, 0, 0, 0xFF, 0xD9]);
        f
    }

    const THUMB: Preview = Preview { offset: 104, len: 4 };

    #[test]
    fn walks_ifd_chain_and_sub_ifds() {
        let previews = find_previews(&sample(6)).unwrap();
        assert_eq!(previews, [THUMB, Preview { offset: 108, len: 6 }]);
    }

    #[test]
    fn cfa_strips_are_not_previews() {
        assert_eq!(find_previews(&sample(PHOTOMETRIC_CFA)).unwrap(), [THUMB]);
    }

    #[test]
    fn out_of_range_pointers_are_dropped() {
        let mut f = sample(6);
        f.truncate(110);
        assert_eq!(find_previews(&f).unwrap(), [THUMB]);
    }

    #[test]
    fn big_endian_headers() {
        let (tiff, first) = Tiff::new(b"MM\0*\0\0\0\x08").unwrap();
        assert_eq!(first, 8);
        assert!(tiff.big_endian);
    }

    #[test]
    fn rejects_non_tiff() {
        assert!(find_previews(b"GIF89a").is_err());
    }
}
