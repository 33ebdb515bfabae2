//! Sample unpacking for packed and bitfield BMP rows.

/// Scale factors taking an N-bit value (after shifting) to the 0..=255 range.
pub(crate) const MUL_TABLE: [u32; 9] = [
    0,    // 0 bits
    0xff, // 1 bit:  0b11111111
    0x55, // 2 bits: 0b01010101
    0x49, // 3 bits: 0b01001001
    0x11, // 4 bits: 0b00010001
    0x21, // 5 bits: 0b00100001
    0x41, // 6 bits: 0b01000001
    0x81, // 7 bits: 0b10000001
    0x01, // 8 bits: 0b00000001
];

pub(crate) const SHIFT_TABLE: [i32; 9] = [0, 0, 0, 1, 0, 2, 4, 6, 0];

/// Move a masked value so its top bit lands on bit 7, keep `bits` bits of
/// it, and replicate them across the byte.
pub(crate) fn shift_signed(mut v: u32, shift: i32, bits: u32) -> u32 {
    if shift < 0 {
        v <<= -shift;
    } else {
        v >>= shift;
    }
    let bits = bits.min(8);
    v >>= 8 - bits;
    (v.wrapping_mul(MUL_TABLE[bits as usize])) >> SHIFT_TABLE[bits as usize]
}

/// One channel of a BI_BITFIELDS layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Channel {
    mask: u32,
    shift: i32,
    bits: u32,
}

impl Channel {
    pub(crate) fn new(mask: u32) -> Self {
        Self {
            mask,
            shift: (32 - mask.leading_zeros() as i32) - 8,
            bits: mask.count_ones(),
        }
    }

    pub(crate) fn is_present(&self) -> bool {
        self.mask != 0
    }

    /// The channel value scaled to 8 bits, or `absent` when unmasked.
    #[inline]
    pub(crate) fn extract(&self, v: u32, absent: u8) -> u8 {
        if self.mask == 0 {
            return absent;
        }
        shift_signed(v & self.mask, self.shift, self.bits) as u8
    }
}

/// Split a row of 1, 2 or 4 bit samples (most significant first) into one
/// byte per sample. Stops when either side runs out.
pub(crate) fn unpack_indices(depth: u16, input: &[u8], out: &mut [u8]) {
    let per_byte = 8 / usize::from(depth);
    let mask = (1u8 << depth) - 1;
    for (i, dst) in out.iter_mut().enumerate() {
        let Some(&byte) = input.get(i / per_byte) else {
            break;
        };
        let shift = 8 - depth as usize * (i % per_byte + 1);
        *dst = (byte >> shift) & mask;
    }
}
