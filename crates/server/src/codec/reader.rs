use lowcraft_engine::world::position::BlockPos;
use uuid::Uuid;

use super::error::CodecError;
use super::unpack_position;

/// Cursor over one received packet body.
///
/// Every read is bounds-checked and fails with [`CodecError::Truncated`]
/// when the body ends early; the cursor does not move on failure.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unread bytes, without consuming them.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_bytes(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                field,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N, field)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>("u8")?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_array::<1>("bool")?[0] != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.read_array("i16").map(i16::from_be_bytes)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.read_array("u16").map(u16::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.read_array("i32").map(i32::from_be_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.read_array("i64").map(i64::from_be_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.read_array("f32").map(f32::from_be_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.read_array("f64").map(f64::from_be_bytes)
    }

    /// Reads at most five bytes. Stops at the first byte without the
    /// continuation bit.
    pub fn read_varint(&mut self) -> Result<i32, CodecError> {
        let mut value: u32 = 0;
        for i in 0..5 {
            let Some(&byte) = self.buf.get(self.pos + i) else {
                return Err(CodecError::Truncated {
                    field: "varint",
                    needed: i + 1,
                    remaining: self.remaining(),
                });
            };
            value |= u32::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                self.pos += i + 1;
                return Ok(value as i32);
            }
        }
        Err(CodecError::VarIntTooLong)
    }

    /// Length-prefixed UTF-8 string of at most `max` bytes.
    pub fn read_string(&mut self, field: &'static str, max: usize) -> Result<String, CodecError> {
        let start = self.pos;
        let result = self.read_string_inner(field, max);
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn read_string_inner(&mut self, field: &'static str, max: usize) -> Result<String, CodecError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| CodecError::NegativeLength { field, len })?;
        if len > max {
            return Err(CodecError::OversizedField { field, len, max });
        }
        let bytes = self.read_bytes(len, field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field })
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, CodecError> {
        self.read_array("uuid").map(Uuid::from_bytes)
    }

    pub fn read_position(&mut self) -> Result<BlockPos, CodecError> {
        self.read_array("position")
            .map(|b| unpack_position(i64::from_be_bytes(b)))
    }
}
