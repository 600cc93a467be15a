//! The writing half of the binary codec.
//!
//! A [`Marshaller`] appends fields to a growable big-endian byte buffer.
//! Its only state besides the buffer is a partially filled boolean byte:
//! up to eight consecutive [`write_bool`](Marshaller::write_bool) calls share
//! one byte (most significant bit first), and the next non-boolean write
//! commits that byte, unused bits and all.
//!
//! ```text
//! write_bool(true); write_i32(7); write_bool(false)
//!
//!  ┌────────┬─────────────┬────────┐
//!  │1000000 │ 00 00 00 07 │0000000 │   3 regions: bool, i32, bool
//!  └────────┴─────────────┴────────┘
//! ```
//!
//! Callers composing formats must account for that: interleaving booleans
//! with other fields wastes the rest of each boolean byte.

use uuid::Uuid;

use crate::{CodecError, Identifier};

/// Byte order of a codec buffer.
///
/// Only [`ByteOrder::BigEndian`] is supported. The enum exists so that a
/// caller handing over a little-endian buffer gets an explicit
/// configuration error instead of silently corrupt data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Network byte order.
    #[default]
    BigEndian,
    /// Rejected by both codec halves.
    LittleEndian,
}

impl ByteOrder {
    pub(crate) fn require_big_endian(self) -> Result<(), CodecError> {
        match self {
            Self::BigEndian => Ok(()),
            Self::LittleEndian => Err(CodecError::UnsupportedByteOrder),
        }
    }
}

/// Writes fields into an owned byte buffer.
#[derive(Debug, Default)]
pub struct Marshaller {
    buf: Vec<u8>,
    /// Pending boolean bits, packed from the top.
    bits: u8,
    /// How many of `bits` are in use (0 = nothing pending).
    bit_count: u8,
}

impl Marshaller {
    /// Creates an empty big-endian marshaller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty marshaller with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Creates a marshaller for the given byte order.
    ///
    /// # Errors
    /// [`CodecError::UnsupportedByteOrder`] for anything but big-endian.
    pub fn with_byte_order(order: ByteOrder) -> Result<Self, CodecError> {
        order.require_big_endian()?;
        Ok(Self::new())
    }

    /// Bytes written so far, counting a pending boolean byte.
    pub fn len(&self) -> usize {
        self.buf.len() + usize::from(self.bit_count > 0)
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commits any pending booleans and returns the encoded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.commit_bits();
        self.buf
    }

    fn commit_bits(&mut self) {
        if self.bit_count > 0 {
            self.buf.push(self.bits);
            self.bits = 0;
            self.bit_count = 0;
        }
    }

    // -----------------------------------------------------------------------
    // Booleans
    // -----------------------------------------------------------------------

    /// Packs one boolean into the current bit byte.
    pub fn write_bool(&mut self, value: bool) {
        if value {
            self.bits |= 0x80 >> self.bit_count;
        }
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.commit_bits();
        }
    }

    // -----------------------------------------------------------------------
    // Fixed-width integers
    // -----------------------------------------------------------------------

    /// Writes the low `width` bytes of `value`, most significant first.
    ///
    /// Every integer width from 1 to 8 bytes goes through here, so the
    /// 24/40/48/56-bit variants share one code path with the native ones.
    fn write_be(&mut self, value: u64, width: usize) {
        debug_assert!((1..=8).contains(&width));
        self.commit_bits();
        for shift in (0..width).rev() {
            self.buf.push((value >> (shift * 8)) as u8);
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_be(u64::from(value), 1);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_be(value as u8 as u64, 1);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_be(u64::from(value), 2);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_be(value as u16 as u64, 2);
    }

    /// Writes the low 24 bits of `value`.
    pub fn write_u24(&mut self, value: u32) {
        self.write_be(u64::from(value), 3);
    }

    /// Writes the low 24 bits of `value` (two's complement).
    pub fn write_i24(&mut self, value: i32) {
        self.write_be(value as u32 as u64, 3);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_be(u64::from(value), 4);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_be(value as u32 as u64, 4);
    }

    /// Writes the low 40 bits of `value`.
    pub fn write_u40(&mut self, value: u64) {
        self.write_be(value, 5);
    }

    /// Writes the low 40 bits of `value` (two's complement).
    pub fn write_i40(&mut self, value: i64) {
        self.write_be(value as u64, 5);
    }

    /// Writes the low 48 bits of `value`.
    pub fn write_u48(&mut self, value: u64) {
        self.write_be(value, 6);
    }

    /// Writes the low 48 bits of `value` (two's complement).
    pub fn write_i48(&mut self, value: i64) {
        self.write_be(value as u64, 6);
    }

    /// Writes the low 56 bits of `value`.
    pub fn write_u56(&mut self, value: u64) {
        self.write_be(value, 7);
    }

    /// Writes the low 56 bits of `value` (two's complement).
    pub fn write_i56(&mut self, value: i64) {
        self.write_be(value as u64, 7);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_be(value, 8);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_be(value as u64, 8);
    }

    // -----------------------------------------------------------------------
    // Floating point
    // -----------------------------------------------------------------------

    /// Writes an IEEE 754 binary16 value, rounding to nearest even.
    pub fn write_f16(&mut self, value: f32) {
        self.write_u16(f32_to_f16_bits(value));
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    /// Writes a value in `-1.0..=1.0` as one signed byte.
    ///
    /// Positive values scale by 127 and negative ones by 128, so both ends
    /// of the range are exact.
    pub fn write_signed_unit(&mut self, value: f32) {
        let value = value.clamp(-1.0, 1.0);
        let scaled = if value >= 0.0 {
            (value * 127.0).round()
        } else {
            (value * 128.0).round()
        };
        self.write_i8(scaled as i8);
    }

    /// Writes a value in `0.0..=1.0` as one unsigned byte (scaled by 255).
    pub fn write_unsigned_unit(&mut self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        self.write_u8((value * 255.0).round() as u8);
    }

    /// Writes a fixed-point value with six fractional bits.
    ///
    /// Encoded as the 64-bit varint of `round(value * 64)`: uniform 1/64
    /// precision, one byte for small magnitudes, more than a double for
    /// large ones.
    pub fn write_fixed(&mut self, value: f64) {
        self.write_ivar64((value * 64.0).round() as i64);
    }

    // -----------------------------------------------------------------------
    // Varints
    // -----------------------------------------------------------------------

    /// Writes a ZigZag varint (1 to 5 bytes).
    pub fn write_ivar32(&mut self, value: i32) {
        let zigzag = ((value << 1) ^ (value >> 31)) as u32;
        self.write_uvar(u64::from(zigzag));
    }

    /// Writes a ZigZag varint (1 to 10 bytes).
    pub fn write_ivar64(&mut self, value: i64) {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        self.write_uvar(zigzag);
    }

    /// Seven bits per byte, least significant group first, continuation
    /// flag in the top bit.
    fn write_uvar(&mut self, mut value: u64) {
        self.commit_bits();
        loop {
            let group = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(group);
                return;
            }
            self.buf.push(group | 0x80);
        }
    }

    // -----------------------------------------------------------------------
    // Variable-length data
    // -----------------------------------------------------------------------

    /// Writes bytes verbatim, with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.commit_bits();
        self.buf.extend_from_slice(bytes);
    }

    /// Writes an `ivar32` byte count followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= i32::MAX as usize);
        self.write_ivar32(bytes.len() as i32);
        self.write_raw(bytes);
    }

    /// Writes a UTF-8 string, prefixed with its byte length.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Writes the namespace, then the path.
    pub fn write_identifier(&mut self, id: &Identifier) {
        self.write_str(id.namespace());
        self.write_str(id.path());
    }

    /// Writes the high 64 bits, then the low 64 bits.
    pub fn write_uuid(&mut self, uuid: Uuid) {
        let (high, low) = uuid.as_u64_pair();
        self.write_u64(high);
        self.write_u64(low);
    }
}

// ---------------------------------------------------------------------------
// Half-precision conversion
// ---------------------------------------------------------------------------

pub(crate) fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x007f_ffff;

    if exponent == 0xff {
        // Keep NaNs quiet and non-zero.
        let nan = if mantissa != 0 {
            0x0200 | (mantissa >> 13) as u16
        } else {
            0
        };
        return sign | 0x7c00 | nan;
    }

    let half_exponent = exponent - 127 + 15;
    if half_exponent >= 0x1f {
        return sign | 0x7c00;
    }

    if half_exponent <= 0 {
        if half_exponent < -10 {
            return sign;
        }
        let full = mantissa | 0x0080_0000;
        let shift = (14 - half_exponent) as u32;
        let round_bit = 1u32 << (shift - 1);
        let mut half = full >> shift;
        if full & round_bit != 0 && full & (3 * round_bit - 1) != 0 {
            half += 1;
        }
        return sign | half as u16;
    }

    let mut half = ((half_exponent as u32) << 10) | (mantissa >> 13);
    if mantissa & 0x1000 != 0 && mantissa & 0x2fff != 0 {
        // A carry out of the mantissa correctly bumps the exponent.
        half += 1;
    }
    sign | half as u16
}

pub(crate) fn f16_bits_to_f32(half: u16) -> f32 {
    let sign = u32::from(half & 0x8000) << 16;
    let exponent = u32::from((half >> 10) & 0x1f);
    let mantissa = u32::from(half & 0x03ff);

    let bits = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, _) => {
            let mut exponent = 127 - 15 + 1;
            let mut mantissa = mantissa;
            while mantissa & 0x0400 == 0 {
                mantissa <<= 1;
                exponent -= 1;
            }
            sign | (exponent << 23) | ((mantissa & 0x03ff) << 13)
        }
        (0x1f, 0) => sign | 0x7f80_0000,
        (0x1f, _) => sign | 0x7fc0_0000 | (mantissa << 13),
        _ => sign | ((exponent + 127 - 15) << 23) | (mantissa << 13),
    };
    f32::from_bits(bits)
}
