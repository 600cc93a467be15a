//! The reading half of the binary codec.
//!
//! An [`Unmarshaller`] borrows a byte slice and walks it with a cursor. It
//! mirrors [`Marshaller`](crate::Marshaller) field for field, including the
//! boolean packing rule: consecutive `read_bool` calls consume one byte
//! between them, and any other read discards what is left of it.
//!
//! Every read that runs past the end returns [`CodecError::Underflow`]
//! without moving the cursor past the data it could not read.

use uuid::Uuid;

use crate::marshal::{ByteOrder, f16_bits_to_f32};
use crate::{CodecError, Identifier};

/// No pending boolean byte.
const NO_BITS: u8 = 8;

/// Reads fields from a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Unmarshaller<'a> {
    buf: &'a [u8],
    pos: usize,
    bits: u8,
    /// Next bit to read from `bits`; [`NO_BITS`] when none is pending.
    bit_pos: u8,
}

impl<'a> Unmarshaller<'a> {
    /// Creates a big-endian reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            bits: 0,
            bit_pos: NO_BITS,
        }
    }

    /// Creates a reader for a buffer of the given byte order.
    ///
    /// # Errors
    /// [`CodecError::UnsupportedByteOrder`] for anything but big-endian.
    pub fn with_byte_order(buf: &'a [u8], order: ByteOrder) -> Result<Self, CodecError> {
        order.require_big_endian()?;
        Ok(Self::new(buf))
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn discard_bits(&mut self) {
        self.bit_pos = NO_BITS;
    }

    /// Takes the next `len` bytes, committing any pending boolean byte.
    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.discard_bits();
        let remaining = self.remaining();
        if len > remaining {
            return Err(CodecError::Underflow {
                needed: len,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    // -----------------------------------------------------------------------
    // Booleans
    // -----------------------------------------------------------------------

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        if self.bit_pos == NO_BITS {
            let byte = self.take(1)?[0];
            self.bits = byte;
            self.bit_pos = 0;
        }
        let value = self.bits & (0x80 >> self.bit_pos) != 0;
        self.bit_pos += 1;
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Fixed-width integers
    // -----------------------------------------------------------------------

    fn read_be(&mut self, width: usize) -> Result<u64, CodecError> {
        debug_assert!((1..=8).contains(&width));
        let bytes = self.take(width)?;
        Ok(bytes
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
    }

    /// Reads `width` bytes and sign-extends from the top bit.
    fn read_be_signed(&mut self, width: usize) -> Result<i64, CodecError> {
        let unused = 64 - width as u32 * 8;
        let raw = self.read_be(width)?;
        Ok(((raw << unused) as i64) >> unused)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_be(1)? as u8)
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_be(1)? as u8 as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.read_be(2)? as u16)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.read_be(2)? as u16 as i16)
    }

    pub fn read_u24(&mut self) -> Result<u32, CodecError> {
        Ok(self.read_be(3)? as u32)
    }

    pub fn read_i24(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_be_signed(3)? as i32)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.read_be(4)? as u32)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_be(4)? as u32 as i32)
    }

    pub fn read_u40(&mut self) -> Result<u64, CodecError> {
        self.read_be(5)
    }

    pub fn read_i40(&mut self) -> Result<i64, CodecError> {
        self.read_be_signed(5)
    }

    pub fn read_u48(&mut self) -> Result<u64, CodecError> {
        self.read_be(6)
    }

    pub fn read_i48(&mut self) -> Result<i64, CodecError> {
        self.read_be_signed(6)
    }

    pub fn read_u56(&mut self) -> Result<u64, CodecError> {
        self.read_be(7)
    }

    pub fn read_i56(&mut self) -> Result<i64, CodecError> {
        self.read_be_signed(7)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.read_be(8)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(self.read_be(8)? as i64)
    }

    // -----------------------------------------------------------------------
    // Floating point
    // -----------------------------------------------------------------------

    pub fn read_f16(&mut self) -> Result<f32, CodecError> {
        Ok(f16_bits_to_f32(self.read_u16()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a byte written by `write_signed_unit`.
    pub fn read_signed_unit(&mut self) -> Result<f32, CodecError> {
        let raw = self.read_i8()?;
        Ok(if raw >= 0 {
            f32::from(raw) / 127.0
        } else {
            f32::from(raw) / 128.0
        })
    }

    /// Reads a byte written by `write_unsigned_unit`.
    pub fn read_unsigned_unit(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from(self.read_u8()?) / 255.0)
    }

    /// Reads a value written by `write_fixed` (1/64 precision).
    pub fn read_fixed(&mut self) -> Result<f64, CodecError> {
        Ok(self.read_ivar64()? as f64 / 64.0)
    }

    // -----------------------------------------------------------------------
    // Varints
    // -----------------------------------------------------------------------

    pub fn read_ivar32(&mut self) -> Result<i32, CodecError> {
        let zigzag = self.read_uvar(32)? as u32;
        Ok((zigzag >> 1) as i32 ^ -((zigzag & 1) as i32))
    }

    pub fn read_ivar64(&mut self) -> Result<i64, CodecError> {
        let zigzag = self.read_uvar(64)?;
        Ok((zigzag >> 1) as i64 ^ -((zigzag & 1) as i64))
    }

    /// Reads an unsigned LEB128 value of at most `bits` bits.
    fn read_uvar(&mut self, bits: u32) -> Result<u64, CodecError> {
        let max_bytes = bits.div_ceil(7) as usize;
        self.discard_bits();
        let start = self.pos;
        let mut value = 0u64;
        for group in 0..max_bytes {
            let Some(&byte) = self.buf.get(start + group) else {
                return Err(CodecError::Underflow {
                    needed: group + 1,
                    remaining: self.remaining(),
                });
            };
            let payload = byte & 0x7f;
            if group == max_bytes - 1 && u32::from(payload) >> (bits - 7 * group as u32) != 0 {
                return Err(CodecError::VarintOverflow { bits });
            }
            value |= u64::from(payload) << (7 * group);
            if byte & 0x80 == 0 {
                self.pos = start + group + 1;
                return Ok(value);
            }
        }
        Err(CodecError::VarintTooLong { max_bytes })
    }

    // -----------------------------------------------------------------------
    // Variable-length data
    // -----------------------------------------------------------------------

    /// Borrows the next `len` bytes with no length prefix.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }

    /// Borrows a length-prefixed byte run.
    ///
    /// On underflow the cursor is left at the length prefix, so the caller
    /// can retry once more bytes arrive.
    pub fn read_byte_slice(&mut self) -> Result<&'a [u8], CodecError> {
        let start = self.pos;
        let len = self.read_ivar32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        self.take(len as usize).inspect_err(|_| self.pos = start)
    }

    /// Reads a length-prefixed byte run into a new vector.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        Ok(self.read_byte_slice()?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_byte_slice()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_identifier(&mut self) -> Result<Identifier, CodecError> {
        let namespace = self.read_string()?;
        let path = self.read_string()?;
        Ok(Identifier::new(namespace, path))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, CodecError> {
        let high = self.read_u64()?;
        let low = self.read_u64()?;
        Ok(Uuid::from_u64_pair(high, low))
    }
}
