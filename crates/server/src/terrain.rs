//! Deterministic terrain: a pure function from column coordinates to a
//! height, filled by height band.

use lowcraft_engine::world::block::BlockId;
use lowcraft_engine::world::chunk::{CHUNK_HEIGHT, CHUNK_WIDTH, Chunk};
use lowcraft_engine::world::position::ChunkPos;
use lowcraft_engine::world::storage::ChunkGenerator;

use crate::block;

const BASE_HEIGHT: i32 = 64;
const VARIATION: i32 = 24;
/// Columns whose surface is below this are flooded up to it.
const SEA_LEVEL: i32 = 63;

/// Surface height of the world column at (x, z): 52..=75.
pub fn column_height(x: i32, z: i32) -> i32 {
    let h = (x.wrapping_mul(73_856_093) ^ z.wrapping_mul(19_349_663)) & 0x7FFF_FFFF;
    BASE_HEIGHT + (h % VARIATION) - VARIATION / 2
}

/// Block at height `y` of a column whose surface is at `height`.
pub fn block_at(y: i32, height: i32) -> BlockId {
    if y == 0 {
        block::BEDROCK
    } else if y < height - 3 {
        block::STONE
    } else if y < height {
        block::DIRT
    } else if y == height {
        block::GRASS
    } else if y < SEA_LEVEL {
        block::WATER
    } else {
        block::AIR
    }
}

/// Hash-height terrain of bedrock, stone, dirt and grass with water below
/// sea level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerrainGenerator;

impl ChunkGenerator for TerrainGenerator {
    fn generate(&self, pos: ChunkPos) -> Chunk {
        let mut chunk = Chunk::new(pos);
        let origin = pos.block_origin(0);
        for lx in 0..CHUNK_WIDTH as u8 {
            for lz in 0..CHUNK_WIDTH as u8 {
                let height = column_height(origin.x + i32::from(lx), origin.z + i32::from(lz));
                // Runs of equal blocks, bottom up.
                let mut start = 0usize;
                let mut current = block_at(0, height);
                for y in 1..=CHUNK_HEIGHT {
                    let next = if y < CHUNK_HEIGHT { Some(block_at(y as i32, height)) } else { None };
                    if next != Some(current) {
                        chunk.fill_column(lx, lz, start, y, current);
                        if let Some(b) = next {
                            current = b;
                            start = y;
                        }
                    }
                }
            }
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowcraft_engine::world::position::LocalBlockPos;

    #[test]
    fn heights_stay_in_band() {
        for x in -200..200 {
            for z in [-1_000_000, -5, 0, 7, 123_456] {
                let h = column_height(x, z);
                assert!((52..=75).contains(&h), "height {h} at ({x}, {z})");
            }
        }
    }

    #[test]
    fn origin_column() {
        // Hash of (0, 0) is 0, so the surface sits at 52 and is flooded.
        assert_eq!(column_height(0, 0), 52);
        let chunk = TerrainGenerator.generate(ChunkPos::new(0, 0));
        let at = |y| chunk.get_block(LocalBlockPos { x: 0, y, z: 0 });
        assert_eq!(at(0), block::BEDROCK);
        assert_eq!(at(48), block::STONE);
        assert_eq!(at(49), block::DIRT);
        assert_eq!(at(51), block::DIRT);
        assert_eq!(at(52), block::GRASS);
        assert_eq!(at(53), block::WATER);
        assert_eq!(at(62), block::WATER);
        assert_eq!(at(63), block::AIR);
        assert_eq!(at(255), block::AIR);
    }

    #[test]
    fn generation_is_deterministic_and_clean() {
        let a = TerrainGenerator.generate(ChunkPos::new(-3, 9));
        let b = TerrainGenerator.generate(ChunkPos::new(-3, 9));
        assert_eq!(a.blocks(), b.blocks());
        assert!(!a.is_dirty());
    }

    #[test]
    fn generated_columns_match_block_at() {
        let pos = ChunkPos::new(2, -1);
        let chunk = TerrainGenerator.generate(pos);
        let origin = pos.block_origin(0);
        for (lx, lz) in [(0u8, 0u8), (5, 11), (15, 15)] {
            let height = column_height(origin.x + i32::from(lx), origin.z + i32::from(lz));
            for y in 0..=255u8 {
                assert_eq!(
                    chunk.get_block(LocalBlockPos { x: lx, y, z: lz }),
                    block_at(i32::from(y), height)
                );
            }
        }
    }
}
