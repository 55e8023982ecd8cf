//! Wire codec: field encoding, decoding and framing.
//!
//! Integers and floats are big-endian, lengths and ids are VarInts, strings
//! are VarInt-byte-length-prefixed UTF-8, UUIDs are 16 raw bytes, and block
//! positions are packed into one 64-bit value.

pub mod buffer;
pub mod error;
pub mod frame;
pub mod reader;

pub use buffer::PacketBuffer;
pub use error::CodecError;
pub use frame::{FrameDecoder, MAX_FRAME_LEN, encode_frame, split_packet};
pub use reader::PacketReader;

use lowcraft_engine::world::position::BlockPos;

/// Smallest and largest x/z a packed position can carry (26 bits, signed).
pub const POSITION_XZ_RANGE: (i32, i32) = (-(1 << 25), (1 << 25) - 1);
/// Smallest and largest y a packed position can carry (12 bits, signed).
pub const POSITION_Y_RANGE: (i32, i32) = (-(1 << 11), (1 << 11) - 1);

/// Pack a block position: x in bits 63..38, z in 37..12, y in 11..0.
/// Out-of-range coordinates are truncated to their field width.
pub fn pack_position(pos: BlockPos) -> i64 {
    ((i64::from(pos.x) & 0x3FF_FFFF) << 38)
        | ((i64::from(pos.z) & 0x3FF_FFFF) << 12)
        | (i64::from(pos.y) & 0xFFF)
}

/// Inverse of [`pack_position`], sign-extending each field.
pub fn unpack_position(v: i64) -> BlockPos {
    let x = v >> 38;
    let z = (v << 26) >> 38;
    let y = (v << 52) >> 52;
    BlockPos::new(x as i32, y as i32, z as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_boundaries() {
        let (xz_min, xz_max) = POSITION_XZ_RANGE;
        let (y_min, y_max) = POSITION_Y_RANGE;
        for x in [xz_min, -1, 0, 1, 10, xz_max] {
            for z in [xz_min, -17, 0, 10, xz_max] {
                for y in [y_min, -1, 0, 64, 255, y_max] {
                    let pos = BlockPos::new(x, y, z);
                    assert_eq!(unpack_position(pack_position(pos)), pos, "{pos:?}");
                }
            }
        }
    }

    #[test]
    fn position_bit_layout() {
        let v = pack_position(BlockPos::new(1, 2, 3));
        assert_eq!(v, (1 << 38) | (3 << 12) | 2);
        assert_eq!(pack_position(BlockPos::new(-1, -1, -1)), -1);
    }
}
