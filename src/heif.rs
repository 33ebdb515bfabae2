//! HEIF/HEIC container parsing.
//!
//! The ISOBMFF boxes that locate the primary image (`ftyp`, `meta`, `pitm`,
//! `iinf`, `iloc`, `iprp`/`ipco`/`ipma`, `ispe`, `hvcC`) are parsed here.
//! The HEVC bitstream itself is handed to a caller-supplied [`HeifBackend`].

use alloc::sync::Arc;
use alloc::vec::Vec;

use enough::Stop;
use log::debug;

use crate::decode::{DecodeContext, DecodeStatus, ImageDecoder, ImageInfo, whole_input};
use crate::error::ImageError;
use crate::registry::ImageFormat;

/// Decodes the coded bitstream of a HEIF item to RGBA8.
///
/// Register one with
/// [`CodecRegistry::with_heif_backend`](crate::CodecRegistry::with_heif_backend).
pub trait HeifBackend: Send + Sync {
    /// Decode `image` from the complete `file`, returning
    /// `width * height * 4` bytes of straight-alpha RGBA.
    fn decode(&self, file: &[u8], image: &HeifImage, stop: &dyn Stop)
    -> Result<Vec<u8>, ImageError>;
}

/// One byte range of an item's coded data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeifExtent {
    pub offset: u64,
    pub len: u64,
}

/// The primary image item, as located by the container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeifImage {
    pub item_id: u32,
    /// Item type four-cc, e.g. `hvc1`.
    pub item_type: [u8; 4],
    pub width: u32,
    pub height: u32,
    /// `hvcC` decoder configuration record, if associated.
    pub codec_config: Option<Vec<u8>>,
    /// File-relative extents of the coded data.
    pub extents: Vec<HeifExtent>,
}

impl HeifImage {
    /// The item's coded bytes, concatenated from its extents.
    pub fn item_data(&self, file: &[u8]) -> Result<Vec<u8>, ImageError> {
        let mut out = Vec::new();
        for e in &self.extents {
            let range = usize::try_from(e.offset)
                .ok()
                .zip(usize::try_from(e.len).ok())
                .and_then(|(start, len)| Some(start..start.checked_add(len)?))
                .filter(|r| r.end <= file.len())
                .ok_or(ImageError::UnexpectedEof)?;
            out.try_reserve(range.len())
                .map_err(|_| ImageError::MallocAbnormal(range.len()))?;
            out.extend_from_slice(&file[range]);
        }
        Ok(out)
    }
}

// ── Box reading ──────────────────────────────────────────────────────

/// Big-endian cursor over a box body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ImageError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or(ImageError::UnexpectedEof)?;
        let s = &self.data[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Unsigned int of 0, 4 or 8 bytes, as sized by `iloc`.
    fn sized(&mut self, size: u8) -> Result<u64, ImageError> {
        match size {
            0 => Ok(0),
            4 => self.u32().map(u64::from),
            8 => {
                let b = self.take(8)?;
                Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            }
            n => Err(ImageError::InvalidHeader(alloc::format!("iloc field size {n}"))),
        }
    }

    fn fourcc(&mut self) -> Result<[u8; 4], ImageError> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// Version and flags of a full box.
    fn full_box(&mut self) -> Result<(u8, u32), ImageError> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00FF_FFFF))
    }

    fn rest(&mut self) -> &'a [u8] {
        let s = &self.data[self.pos..];
        self.pos = self.data.len();
        s
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Next child box: type and body.
    fn next_box(&mut self) -> Result<([u8; 4], &'a [u8]), ImageError> {
        let size = self.u32()?;
        let kind = self.fourcc()?;
        let body = match size {
            0 => self.rest(),
            1 => {
                let large = self.sized(8)?;
                let len = large
                    .checked_sub(16)
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| ImageError::InvalidHeader("box size".into()))?;
                self.take(len)?
            }
            n => {
                let len = (n as usize)
                    .checked_sub(8)
                    .ok_or_else(|| ImageError::InvalidHeader("box size".into()))?;
                self.take(len)?
            }
        };
        Ok((kind, body))
    }

    /// The first child of type `kind`.
    fn find(mut self, kind: &[u8; 4]) -> Result<Option<&'a [u8]>, ImageError> {
        while !self.is_empty() {
            let (k, body) = self.next_box()?;
            if &k == kind {
                return Ok(Some(body));
            }
        }
        Ok(None)
    }
}

// ── meta parsing ─────────────────────────────────────────────────────

const BRANDS: [&[u8; 4]; 8] = [
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

fn check_ftyp(body: &[u8]) -> Result<(), ImageError> {
    let mut r = Reader::new(body);
    let major = r.fourcc()?;
    r.u32()?;
    let mut brands = Vec::from([major]);
    while !r.is_empty() {
        brands.push(r.fourcc()?);
    }
    if brands.iter().any(|b| BRANDS.contains(&b)) {
        Ok(())
    } else {
        Err(ImageError::UnsupportedVariant(alloc::format!(
            "ISOBMFF brand {:?}",
            core::str::from_utf8(&major).unwrap_or("?")
        )))
    }
}

fn parse_pitm(body: &[u8]) -> Result<u32, ImageError> {
    let mut r = Reader::new(body);
    let (version, _) = r.full_box()?;
    if version == 0 {
        r.u16().map(u32::from)
    } else {
        r.u32()
    }
}

/// Item type of `item_id` from `iinf`.
fn parse_iinf(body: &[u8], item_id: u32) -> Result<Option<[u8; 4]>, ImageError> {
    let mut r = Reader::new(body);
    let (version, _) = r.full_box()?;
    if version == 0 {
        r.u16()?;
    } else {
        r.u32()?;
    }
    while !r.is_empty() {
        let (kind, infe) = r.next_box()?;
        if &kind != b"infe" {
            continue;
        }
        let mut e = Reader::new(infe);
        let (v, _) = e.full_box()?;
        let id = match v {
            2 => u32::from(e.u16()?),
            3 => e.u32()?,
            // Versions 0 and 1 carry no item type.
            _ => continue,
        };
        e.u16()?;
        let item_type = e.fourcc()?;
        if id == item_id {
            return Ok(Some(item_type));
        }
    }
    Ok(None)
}

/// File extents of `item_id` from `iloc`.
fn parse_iloc(body: &[u8], item_id: u32) -> Result<Vec<HeifExtent>, ImageError> {
    let mut r = Reader::new(body);
    let (version, _) = r.full_box()?;
    let sizes = r.u8()?;
    let (offset_size, length_size) = (sizes >> 4, sizes & 0xF);
    let sizes = r.u8()?;
    let base_offset_size = sizes >> 4;
    let index_size = if version >= 1 { sizes & 0xF } else { 0 };
    let count = if version < 2 {
        u32::from(r.u16()?)
    } else {
        r.u32()?
    };
    for _ in 0..count {
        let id = if version < 2 {
            u32::from(r.u16()?)
        } else {
            r.u32()?
        };
        let method = if version >= 1 { r.u16()? & 0xF } else { 0 };
        r.u16()?; // data reference index
        let base = r.sized(base_offset_size)?;
        let extent_count = r.u16()?;
        let mut extents = Vec::new();
        for _ in 0..extent_count {
            r.sized(index_size)?;
            let offset = r.sized(offset_size)?;
            let len = r.sized(length_size)?;
            extents.push(HeifExtent {
                offset: base.saturating_add(offset),
                len,
            });
        }
        if id == item_id {
            if method != 0 {
                return Err(ImageError::UnsupportedVariant(alloc::format!(
                    "iloc construction method {method}"
                )));
            }
            return Ok(extents);
        }
    }
    Err(ImageError::InvalidHeader(alloc::format!(
        "no location for item {item_id}"
    )))
}

/// 1-based `ipco` property indices associated with `item_id`.
fn parse_ipma(body: &[u8], item_id: u32) -> Result<Vec<u16>, ImageError> {
    let mut r = Reader::new(body);
    let (version, flags) = r.full_box()?;
    let count = r.u32()?;
    for _ in 0..count {
        let id = if version < 1 {
            u32::from(r.u16()?)
        } else {
            r.u32()?
        };
        let n = r.u8()?;
        let mut indices = Vec::with_capacity(usize::from(n));
        for _ in 0..n {
            let index = if flags & 1 != 0 {
                r.u16()? & 0x7FFF
            } else {
                u16::from(r.u8()? & 0x7F)
            };
            indices.push(index);
        }
        if id == item_id {
            return Ok(indices);
        }
    }
    Ok(Vec::new())
}

/// The primary item described by a `meta` box body.
fn parse_meta(meta: &[u8]) -> Result<HeifImage, ImageError> {
    let mut r = Reader::new(meta);
    r.full_box()?;
    let boxes = r.rest();
    let missing = |name: &str| ImageError::InvalidHeader(alloc::format!("HEIF has no {name}"));

    let item_id = parse_pitm(Reader::new(boxes).find(b"pitm")?.ok_or_else(|| missing("pitm"))?)?;
    let item_type = match Reader::new(boxes).find(b"iinf")? {
        Some(iinf) => parse_iinf(iinf, item_id)?.unwrap_or(*b"hvc1"),
        None => *b"hvc1",
    };
    let iloc = Reader::new(boxes).find(b"iloc")?.ok_or_else(|| missing("iloc"))?;
    let extents = parse_iloc(iloc, item_id)?;

    let iprp = Reader::new(boxes).find(b"iprp")?.ok_or_else(|| missing("iprp"))?;
    let ipco = Reader::new(iprp).find(b"ipco")?.ok_or_else(|| missing("ipco"))?;
    let ipma = Reader::new(iprp).find(b"ipma")?.ok_or_else(|| missing("ipma"))?;
    let associated = parse_ipma(ipma, item_id)?;

    let mut properties = Vec::new();
    let mut r = Reader::new(ipco);
    while !r.is_empty() {
        properties.push(r.next_box()?);
    }
    let mut size = None;
    let mut codec_config = None;
    for index in associated {
        let Some(&(kind, body)) = properties.get(usize::from(index).wrapping_sub(1)) else {
            continue;
        };
        match &kind {
            b"ispe" => {
                let mut p = Reader::new(body);
                p.full_box()?;
                size = Some((p.u32()?, p.u32()?));
            }
            b"hvcC" => codec_config = Some(body.to_vec()),
            _ => {}
        }
    }
    let (width, height) = size.ok_or_else(|| missing("ispe for the primary item"))?;
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidHeader(alloc::format!(
            "HEIF dimensions {width}x{height}"
        )));
    }
    Ok(HeifImage {
        item_id,
        item_type,
        width,
        height,
        codec_config,
        extents,
    })
}

/// Walk top-level boxes to `meta`. Running out of bytes is `UnexpectedEof`.
fn parse_file(data: &[u8]) -> Result<HeifImage, ImageError> {
    let mut r = Reader::new(data);
    let (kind, ftyp) = r.next_box()?;
    if &kind != b"ftyp" {
        return Err(ImageError::InvalidHeader("HEIF must start with ftyp".into()));
    }
    check_ftyp(ftyp)?;
    match r.find(b"meta")? {
        Some(meta) => parse_meta(meta),
        None => Err(ImageError::UnexpectedEof),
    }
}

/// HEIF decoder. Pixel decoding needs a [`HeifBackend`].
pub struct HeifDecoder {
    backend: Option<Arc<dyn HeifBackend>>,
    image: Option<HeifImage>,
}

impl core::fmt::Debug for HeifDecoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeifDecoder")
            .field("backend", &self.backend.is_some())
            .field("image", &self.image)
            .finish()
    }
}

impl HeifDecoder {
    pub fn new(backend: Option<Arc<dyn HeifBackend>>) -> Self {
        Self {
            backend,
            image: None,
        }
    }
}

impl ImageDecoder for HeifDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Heif
    }

    fn decode_header(&mut self, cx: &mut DecodeContext) -> Result<ImageInfo, ImageError> {
        let image = parse_file(cx.stream().data()?)?;
        debug!(
            "HEIF item {} {:?} {}x{}",
            image.item_id,
            core::str::from_utf8(&image.item_type).unwrap_or("?"),
            image.width,
            image.height
        );
        let info = ImageInfo::new(image.width, image.height, false);
        self.image = Some(image);
        Ok(info)
    }

    fn decode(
        &mut self,
        cx: &mut DecodeContext,
        index: u32,
        stop: &dyn Stop,
    ) -> Result<DecodeStatus, ImageError> {
        cx.check_frame_index(index, 1)?;
        let Some(backend) = self.backend.clone() else {
            return Err(ImageError::DecodeAbnormal("no HEVC backend".into()));
        };
        let Some(data) = whole_input(cx)? else {
            return Ok(DecodeStatus::Incomplete { progress: 0 });
        };
        let image = match &self.image {
            Some(image) => image.clone(),
            None => parse_file(&data)?,
        };
        let rgba = backend.decode(&data, &image, stop)?;
        let expected = image.width as usize * image.height as usize * 4;
        if rgba.len() != expected {
            return Err(ImageError::DecodeAbnormal(alloc::format!(
                "HEVC backend returned {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        stop.check()?;
        cx.write_rgba_image(&rgba, image.width)?;
        Ok(DecodeStatus::Complete)
    }

    fn reset(&mut self) {
        self.image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut b = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        b.extend_from_slice(kind);
        b.extend_from_slice(body);
        b
    }

    fn full(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
        let mut b = ((u32::from(version) << 24) | flags).to_be_bytes().to_vec();
        b.extend_from_slice(body);
        bx(kind, &b)
    }

    /// ftyp + meta for primary item 1: 64x48, one extent at 1000..1100.
    fn sample() -> Vec<u8> {
        let pitm = full(b"pitm", 0, 0, &1u16.to_be_bytes());
        let infe = full(b"infe", 2, 0, &[0, 1, 0, 0, b'h', b'v', b'c', b'1', 0]);
        let iinf = full(b"iinf", 0, 0, &[&1u16.to_be_bytes()[..], &infe].concat());
        // offset_size 4, length_size 4, base_offset_size 0; one item, one extent
        let iloc = full(
            b"iloc",
            0,
            0,
            &[0x44, 0x00, 0, 1, 0, 1, 0, 0, 0, 1, 0, 0, 0x03, 0xE8, 0, 0, 0, 100],
        );
        let ispe = full(b"ispe", 0, 0, &[0, 0, 0, 64, 0, 0, 0, 48]);
        let hvcc = bx(b"hvcC", &[1, 2, 3]);
        let ipco = bx(b"ipco", &[hvcc, ispe].concat());
        let ipma = full(b"ipma", 0, 0, &[0, 0, 0, 1, 0, 1, 2, 0x81, 0x02]);
        let iprp = bx(b"iprp", &[ipco, ipma].concat());
        let meta = full(b"meta", 0, 0, &[pitm, iinf, iloc, iprp].concat());
        let ftyp = bx(b"ftyp", b"heic\0\0\0\0mif1heic");
        [ftyp, meta].concat()
    }

    #[test]
    fn locates_primary_item() {
        let image = parse_file(&sample()).unwrap();
        assert_eq!(image.item_id, 1);
        assert_eq!(&image.item_type, b"hvc1");
        assert_eq!((image.width, image.height), (64, 48));
        assert_eq!(image.codec_config.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(image.extents, [HeifExtent { offset: 1000, len: 100 }]);
    }

    #[test]
    fn truncation_is_eof() {
        let file = sample();
        for cut in [4, 20, file.len() - 1] {
            assert!(
                matches!(parse_file(&file[..cut]), Err(ImageError::UnexpectedEof)),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn foreign_brand_is_rejected() {
        let ftyp = bx(b"ftyp", b"isom\0\0\0\0mp41");
        assert!(matches!(
            parse_file(&ftyp),
            Err(ImageError::UnsupportedVariant(_))
        ));
    }

    #[test]
    fn item_data_bounds() {
        let image = parse_file(&sample()).unwrap();
        assert!(image.item_data(&[0; 1050]).is_err());
        assert_eq!(image.item_data(&[7; 1100]).unwrap().len(), 100);
    }
}
