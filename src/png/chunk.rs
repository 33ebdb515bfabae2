//! PNG chunk framing and the IHDR/PLTE/tRNS payloads.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::ImageError;

pub(crate) const IHDR: [u8; 4] = *b"IHDR";
pub(crate) const PLTE: [u8; 4] = *b"PLTE";
pub(crate) const TRNS: [u8; 4] = *b"tRNS";
pub(crate) const IDAT: [u8; 4] = *b"IDAT";
pub(crate) const IEND: [u8; 4] = *b"IEND";

/// Length and type of a chunk. Data and CRC follow.
pub(crate) const HEADER_LEN: usize = 8;
pub(crate) const CRC_LEN: usize = 4;

/// Largest chunk length PNG permits.
const MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    pub(crate) len: usize,
    pub(crate) kind: [u8; 4],
}

impl ChunkHeader {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if len > MAX_CHUNK_LEN {
            return Err(ImageError::InvalidData(alloc::format!(
                "chunk length {len} out of range"
            )));
        }
        let kind = [bytes[4], bytes[5], bytes[6], bytes[7]];
        if !kind.iter().all(u8::is_ascii_alphabetic) {
            return Err(ImageError::InvalidData(alloc::format!(
                "bad chunk type {kind:?}"
            )));
        }
        Ok(Self {
            len: len as usize,
            kind,
        })
    }

    /// Header, data and CRC.
    pub(crate) fn total_len(&self) -> usize {
        HEADER_LEN + self.len + CRC_LEN
    }
}

/// Check the CRC stored after a chunk's data.
pub(crate) fn check_crc(kind: &[u8; 4], data: &[u8], stored: &[u8]) -> Result<(), ImageError> {
    let mut h = crc32fast::Hasher::new();
    h.update(kind);
    h.update(data);
    verify(h, stored, kind)
}

pub(crate) fn verify(h: crc32fast::Hasher, stored: &[u8], kind: &[u8; 4]) -> Result<(), ImageError> {
    let stored = u32::from_be_bytes([stored[0], stored[1], stored[2], stored[3]]);
    let actual = h.finalize();
    if actual != stored {
        return Err(ImageError::InvalidData(alloc::format!(
            "{} CRC mismatch: stored {stored:#010x}, computed {actual:#010x}",
            String::from_utf8_lossy(kind)
        )));
    }
    Ok(())
}

// ── IHDR ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ColorType {
    Gray,
    Rgb,
    Indexed,
    GrayAlpha,
    Rgba,
}

impl ColorType {
    pub(crate) fn channels(self) -> usize {
        match self {
            Self::Gray | Self::Indexed => 1,
            Self::GrayAlpha => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Ihdr {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) bit_depth: u8,
    pub(crate) color_type: ColorType,
    pub(crate) interlaced: bool,
}

impl Ihdr {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, ImageError> {
        if data.len() != 13 {
            return Err(ImageError::InvalidHeader(alloc::format!(
                "IHDR length {} (expected 13)",
                data.len()
            )));
        }
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if width == 0 || height == 0 || width > MAX_CHUNK_LEN || height > MAX_CHUNK_LEN {
            return Err(ImageError::InvalidHeader(alloc::format!(
                "invalid dimensions {width}x{height}"
            )));
        }
        let bit_depth = data[8];
        let color_type = match (data[9], bit_depth) {
            (0, 1 | 2 | 4 | 8 | 16) => ColorType::Gray,
            (2, 8 | 16) => ColorType::Rgb,
            (3, 1 | 2 | 4 | 8) => ColorType::Indexed,
            (4, 8 | 16) => ColorType::GrayAlpha,
            (6, 8 | 16) => ColorType::Rgba,
            (ct, bd) => {
                return Err(ImageError::InvalidHeader(alloc::format!(
                    "color type {ct} with bit depth {bd}"
                )));
            }
        };
        if data[10] != 0 || data[11] != 0 {
            return Err(ImageError::UnsupportedVariant(
                "unknown compression or filter method".into(),
            ));
        }
        let interlaced = match data[12] {
            0 => false,
            1 => true,
            m => {
                return Err(ImageError::UnsupportedVariant(alloc::format!(
                    "interlace method {m}"
                )));
            }
        };
        Ok(Self {
            width,
            height,
            bit_depth,
            color_type,
            interlaced,
        })
    }

    /// Filter unit: bytes per complete pixel, at least 1.
    pub(crate) fn filter_bpp(&self) -> usize {
        (self.color_type.channels() * usize::from(self.bit_depth)).div_ceil(8)
    }

    /// Packed bytes of a row `width` pixels wide, excluding the filter byte.
    pub(crate) fn row_bytes(&self, width: u32) -> usize {
        (width as usize * self.color_type.channels() * usize::from(self.bit_depth)).div_ceil(8)
    }
}

// ── Palette / transparency ───────────────────────────────────────────

/// Palette entries (with tRNS alpha folded in) and the color key, if any.
#[derive(Clone, Debug, Default)]
pub(crate) struct Transparency {
    pub(crate) palette: Vec<[u8; 4]>,
    /// Gray or RGB sample values that are fully transparent.
    pub(crate) key: Option<[u16; 3]>,
}

impl Transparency {
    pub(crate) fn set_palette(&mut self, data: &[u8]) -> Result<(), ImageError> {
        if data.is_empty() || data.len() % 3 != 0 || data.len() > 256 * 3 {
            return Err(ImageError::InvalidData(alloc::format!(
                "PLTE length {}",
                data.len()
            )));
        }
        let alphas: Vec<u8> = self.palette.iter().map(|p| p[3]).collect();
        self.palette = data
            .chunks_exact(3)
            .enumerate()
            .map(|(i, c)| [c[0], c[1], c[2], alphas.get(i).copied().unwrap_or(255)])
            .collect();
        Ok(())
    }

    pub(crate) fn set_trns(&mut self, color_type: ColorType, data: &[u8]) -> Result<(), ImageError> {
        match color_type {
            ColorType::Indexed => {
                if data.len() > self.palette.len() {
                    return Err(ImageError::InvalidData(
                        "tRNS has more entries than PLTE".into(),
                    ));
                }
                for (entry, &a) in self.palette.iter_mut().zip(data) {
                    entry[3] = a;
                }
            }
            ColorType::Gray if data.len() >= 2 => {
                let g = u16::from_be_bytes([data[0], data[1]]);
                self.key = Some([g, g, g]);
            }
            ColorType::Rgb if data.len() >= 6 => {
                self.key = Some([
                    u16::from_be_bytes([data[0], data[1]]),
                    u16::from_be_bytes([data[2], data[3]]),
                    u16::from_be_bytes([data[4], data[5]]),
                ]);
            }
            _ => {
                return Err(ImageError::InvalidData(alloc::format!(
                    "tRNS not valid for {color_type:?}"
                )));
            }
        }
        Ok(())
    }
}
