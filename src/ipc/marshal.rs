//! PixelMap wire layout.
//!
//! Eight `i32` fields (width, height, pixel format, color space, alpha type,
//! base density, byte count, allocator type), then either one descriptor
//! (shared memory) or `byte count` raw pixel bytes (heap).

use log::debug;

use super::MessageParcel;
use crate::decode::PlImageInfo;
use crate::error::ImageError;
use crate::limits::Limits;
use crate::memory::{AllocatorType, PixelBuffer, SharedMemory};
use crate::pixel::{AlphaType, ColorSpace, PixelFormat, Size, byte_count};
use crate::pixel_map::PixelMap;

/// Largest heap PixelMap copied inline into a parcel (128 MiB).
pub const MAX_MARSHAL_BYTES: usize = 128 * 1024 * 1024;

fn field(name: &str, value: impl TryInto<i32>) -> Result<i32, ImageError> {
    value
        .try_into()
        .map_err(|_| ImageError::Parcel(alloc::format!("{name} does not fit the wire format")))
}

fn bad(name: &str, value: i32) -> ImageError {
    ImageError::Parcel(alloc::format!("invalid {name} {value}"))
}

impl PixelMap {
    /// Append this map to `parcel`.
    ///
    /// Shared-memory maps send a duplicate of their descriptor; this map
    /// keeps its own mapping. Heap maps are copied inline and limited to
    /// [`MAX_MARSHAL_BYTES`].
    pub fn marshal(&self, parcel: &mut MessageParcel) -> Result<(), ImageError> {
        let bytes = self.byte_count();
        let allocator = self.allocator_type();
        if allocator == AllocatorType::Heap && bytes > MAX_MARSHAL_BYTES {
            return Err(ImageError::Parcel(alloc::format!(
                "{bytes} byte heap PixelMap exceeds the {MAX_MARSHAL_BYTES} byte parcel limit"
            )));
        }
        let fields = [
            field("width", self.width())?,
            field("height", self.height())?,
            self.pixel_format() as i32,
            self.color_space() as i32,
            self.alpha_type() as i32,
            self.base_density(),
            field("byte count", bytes)?,
            allocator as i32,
        ];
        let fd = match self.buffer().fd() {
            Some(fd) => Some(fd.try_clone_to_owned()?),
            None => None,
        };
        for v in fields {
            parcel.write_i32(v);
        }
        match fd {
            Some(fd) => parcel.write_fd(fd),
            None => parcel.write_bytes(self.pixels())?,
        }
        debug!("marshaled {bytes} byte PixelMap ({allocator:?})");
        Ok(())
    }

    /// Read a map written by [`marshal`](Self::marshal).
    ///
    /// The metadata is validated before any memory is mapped or allocated.
    pub fn unmarshal(parcel: &mut MessageParcel, limits: &Limits) -> Result<PixelMap, ImageError> {
        let width = parcel.read_i32()?;
        let height = parcel.read_i32()?;
        let format = parcel.read_i32()?;
        let color_space = parcel.read_i32()?;
        let alpha = parcel.read_i32()?;
        let base_density = parcel.read_i32()?;
        let bytes = parcel.read_i32()?;
        let allocator = parcel.read_i32()?;

        let size = Size::new(
            u32::try_from(width).map_err(|_| bad("width", width))?,
            u32::try_from(height).map_err(|_| bad("height", height))?,
        );
        let info = PlImageInfo {
            size,
            pixel_format: PixelFormat::from_i32(format)
                .filter(|f| *f != PixelFormat::Unknown)
                .ok_or_else(|| bad("pixel format", format))?,
            alpha_type: AlphaType::from_i32(alpha).ok_or_else(|| bad("alpha type", alpha))?,
            color_space: ColorSpace::from_i32(color_space)
                .ok_or_else(|| bad("color space", color_space))?,
            base_density,
        };
        let allocator =
            AllocatorType::from_i32(allocator).ok_or_else(|| bad("allocator type", allocator))?;
        let expected = byte_count(info.pixel_format, size.width, size.height)
            .map_err(|e| ImageError::Parcel(alloc::format!("{e}")))?;
        if usize::try_from(bytes).ok() != Some(expected) {
            return Err(bad("byte count", bytes));
        }
        limits.check(size.width, size.height)?;
        limits.check_memory(expected)?;

        let buffer = match allocator {
            AllocatorType::SharedMemory => {
                let fd = parcel.take_fd()?;
                PixelBuffer::Shared(SharedMemory::map(fd, expected)?)
            }
            AllocatorType::Heap => {
                if expected > MAX_MARSHAL_BYTES {
                    return Err(bad("byte count", bytes));
                }
                let src = parcel.read_bytes(expected)?;
                let mut buffer = PixelBuffer::allocate(expected, AllocatorType::Heap, limits)?;
                buffer.as_mut_slice().copy_from_slice(src);
                buffer
            }
        };
        debug!(
            "unmarshaled {}x{} {:?} PixelMap ({allocator:?})",
            size.width, size.height, info.pixel_format
        );
        PixelMap::from_decoded(buffer, &info)
    }
}
