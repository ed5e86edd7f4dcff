//! Byte-level cursor over a binary module.
//!
//! Every read is bounds-checked and every failure carries the byte offset
//! at which it occurred. LEB128 decoding is strict: over-long encodings and
//! non-zero unused bits in the final byte are malformed, as are truncated
//! sequences.

use byteorder::{ByteOrder, LittleEndian};

use super::LoadError;

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    /// Current byte offset from the start of the input.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn eof(&self) -> LoadError {
        LoadError::new(self.pos, "unexpected end of input")
    }

    pub fn read_u8(&mut self) -> Result<u8, LoadError> {
        let byte = *self.bytes.get(self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], LoadError> {
        if self.remaining() < len {
            return Err(self.eof());
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Fixed-width little-endian u32 (magic number and version fields).
    pub fn read_u32(&mut self) -> Result<u32, LoadError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    /// Raw f32 bit pattern, preserving NaN payloads exactly.
    pub fn read_f32_bits(&mut self) -> Result<u32, LoadError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    /// Raw f64 bit pattern, preserving NaN payloads exactly.
    pub fn read_f64_bits(&mut self) -> Result<u64, LoadError> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    /// Unsigned LEB128, at most 32 bits.
    pub fn read_vu32(&mut self) -> Result<u32, LoadError> {
        let start = self.pos;
        let mut result: u32 = 0;
        for i in 0..5 {
            let byte = self.read_u8()?;
            let payload = (byte & 0x7f) as u32;
            // The fifth byte may only contribute the low 4 bits.
            if i == 4 && payload >> 4 != 0 {
                return Err(LoadError::new(start, "malformed LEB128 integer"));
            }
            result |= payload << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(LoadError::new(start, "malformed LEB128 integer"))
    }

    /// Signed LEB128, at most 32 bits.
    pub fn read_vs32(&mut self) -> Result<i32, LoadError> {
        Ok(self.read_vs(32)? as i32)
    }

    /// Signed LEB128, at most 64 bits.
    pub fn read_vs64(&mut self) -> Result<i64, LoadError> {
        self.read_vs(64)
    }

    fn read_vs(&mut self, size: u32) -> Result<i64, LoadError> {
        let start = self.pos;
        let max_bytes = (size + 6) / 7;
        let mut result: i64 = 0;
        let mut shift: u32 = 0;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            result |= (((byte & 0x7f) as i64) << shift) as i64;
            shift += 7;
            if byte & 0x80 == 0 {
                if i + 1 == max_bytes {
                    // The final byte holds `size - 7 * (max_bytes - 1)` value
                    // bits; the rest must all equal the sign bit.
                    let payload = byte & 0x7f;
                    let used = size - 7 * (max_bytes - 1);
                    let extra = payload >> used;
                    let sign_fill = if payload & (1 << (used - 1)) != 0 {
                        (1u8 << (7 - used)) - 1
                    } else {
                        0
                    };
                    if extra != sign_fill {
                        return Err(LoadError::new(start, "malformed LEB128 integer"));
                    }
                } else if shift < 64 && byte & 0x40 != 0 {
                    result |= -1_i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(LoadError::new(start, "malformed LEB128 integer"))
    }

    /// Length-prefixed UTF-8 string (import/export names).
    pub fn read_string(&mut self) -> Result<String, LoadError> {
        let len = self.read_vu32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| LoadError::new(start, "invalid UTF-8 encoding"))
    }
}
