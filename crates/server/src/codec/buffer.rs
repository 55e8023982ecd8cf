use lowcraft_engine::world::position::BlockPos;
use uuid::Uuid;

use super::error::CodecError;
use super::pack_position;

const MIN_CAPACITY: usize = 16;

/// Append-only packet writer.
///
/// Capacity grows by doubling. Growth uses `try_reserve`, so an allocation
/// failure fails the one write with [`CodecError::Alloc`] instead of
/// aborting the process; bytes already written are untouched.
#[derive(Debug, Default, Clone)]
pub struct PacketBuffer {
    data: Vec<u8>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far (the write cursor).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn grow_for(&mut self, additional: usize) -> Result<(), CodecError> {
        let needed = self
            .data
            .len()
            .checked_add(additional)
            .ok_or(CodecError::Alloc { requested: usize::MAX })?;
        if needed <= self.data.capacity() {
            return Ok(());
        }
        let mut target = self.data.capacity().max(MIN_CAPACITY);
        while target < needed {
            target = target
                .checked_mul(2)
                .ok_or(CodecError::Alloc { requested: needed })?;
        }
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| CodecError::Alloc { requested: target })
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.grow_for(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.write_bytes(&[v])
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), CodecError> {
        self.write_u8(v as u8)
    }

    pub fn write_i16(&mut self, v: i16) -> Result<(), CodecError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), CodecError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), CodecError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), CodecError> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), CodecError> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// 7 data bits per byte, least significant group first, high bit set on
    /// every byte but the last. Negative values take five bytes.
    pub fn write_varint(&mut self, v: i32) -> Result<(), CodecError> {
        let mut value = v as u32;
        let mut out = [0u8; 5];
        let mut n = 0;
        loop {
            if value & !0x7F == 0 {
                out[n] = value as u8;
                n += 1;
                break;
            }
            out[n] = (value as u8 & 0x7F) | 0x80;
            value >>= 7;
            n += 1;
        }
        self.write_bytes(&out[..n])
    }

    /// VarInt byte length followed by the UTF-8 bytes.
    pub fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        let len = i32::try_from(s.len()).map_err(|_| CodecError::OversizedField {
            field: "string",
            len: s.len(),
            max: i32::MAX as usize,
        })?;
        self.write_varint(len)?;
        self.write_bytes(s.as_bytes())
    }

    pub fn write_uuid(&mut self, uuid: &Uuid) -> Result<(), CodecError> {
        self.write_bytes(uuid.as_bytes())
    }

    pub fn write_position(&mut self, pos: BlockPos) -> Result<(), CodecError> {
        self.write_i64(pack_position(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_preserves_written_bytes() {
        let mut buf = PacketBuffer::with_capacity(1);
        for i in 0..=255u8 {
            buf.write_u8(i).unwrap();
        }
        assert_eq!(buf.len(), 256);
        assert!(buf.capacity() >= 256);
        assert!(buf.as_slice().iter().enumerate().all(|(i, &b)| b == i as u8));
    }

    #[test]
    fn capacity_doubles() {
        let mut buf = PacketBuffer::with_capacity(16);
        buf.write_bytes(&[0; 16]).unwrap();
        assert_eq!(buf.capacity(), 16);
        buf.write_u8(1).unwrap();
        assert_eq!(buf.capacity(), 32);
    }

    #[test]
    fn fixed_width_is_big_endian() {
        let mut buf = PacketBuffer::new();
        buf.write_i16(0x0102).unwrap();
        buf.write_i32(0x03040506).unwrap();
        buf.write_i64(-2).unwrap();
        assert_eq!(
            buf.as_slice(),
            &[1, 2, 3, 4, 5, 6, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]
        );
    }

    #[test]
    fn known_varints() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (255, &[0xFF, 0x01]),
            (25565, &[0xDD, 0xC7, 0x01]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (i32::MAX, &[0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            (-1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];
        for &(value, bytes) in cases {
            let mut buf = PacketBuffer::new();
            buf.write_varint(value).unwrap();
            assert_eq!(buf.as_slice(), bytes, "varint {value}");
        }
    }

    #[test]
    fn string_prefix_counts_bytes() {
        let mut buf = PacketBuffer::new();
        buf.write_string("héllo").unwrap();
        assert_eq!(buf.as_slice()[0], 6);
        assert_eq!(&buf.as_slice()[1..], "héllo".as_bytes());
    }
}
