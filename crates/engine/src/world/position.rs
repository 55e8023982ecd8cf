use super::chunk::{CHUNK_HEIGHT, CHUNK_WIDTH};

/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk this block belongs to (arithmetic shift, so negative
    /// coordinates round toward negative infinity).
    pub const fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> 4,
            z: self.z >> 4,
        }
    }

    /// Position within the chunk, or `None` when `y` is outside the column.
    pub const fn local(&self) -> Option<LocalBlockPos> {
        if self.y < 0 || self.y >= CHUNK_HEIGHT as i32 {
            return None;
        }
        Some(LocalBlockPos {
            x: (self.x & 0xF) as u8,
            y: self.y as u8,
            z: (self.z & 0xF) as u8,
        })
    }

    /// Squared Euclidean distance from the block's corner to a point.
    pub fn distance_sq_to(&self, x: f64, y: f64, z: f64) -> f64 {
        let dx = self.x as f64 - x;
        let dy = self.y as f64 - y;
        let dz = self.z as f64 - z;
        dx * dx + dy * dy + dz * dz
    }
}

/// Chunk column position (each chunk is 16x16 blocks horizontally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The chunk containing a (possibly fractional) world position.
    pub fn containing(x: f64, z: f64) -> Self {
        Self {
            x: (x.floor() as i32) >> 4,
            z: (z.floor() as i32) >> 4,
        }
    }

    pub const fn block_origin(&self, y: i32) -> BlockPos {
        BlockPos::new(self.x * CHUNK_WIDTH as i32, y, self.z * CHUNK_WIDTH as i32)
    }

    /// All chunks in the square of side `2 * radius + 1` centred on `self`,
    /// row by row (x outer, z inner).
    pub fn square(&self, radius: i32) -> Vec<ChunkPos> {
        let side = (2 * radius + 1).max(0) as usize;
        let mut out = Vec::with_capacity(side * side);
        for x in (self.x - radius)..=(self.x + radius) {
            for z in (self.z - radius)..=(self.z + radius) {
                out.push(ChunkPos::new(x, z));
            }
        }
        out
    }
}

/// Block position local to a chunk (x, z in 0..16, y in 0..256).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalBlockPos {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}
