use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::block::BlockId;
use super::position::{ChunkPos, LocalBlockPos};

/// Number of blocks along the horizontal axes of a chunk.
pub const CHUNK_WIDTH: usize = 16;
/// Number of blocks along the vertical axis of a chunk.
pub const CHUNK_HEIGHT: usize = 256;
/// Total block count in one chunk (one byte per voxel, 64 KiB).
pub const CHUNK_VOLUME: usize = CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_WIDTH;

/// A 16x256x16 column of blocks.
///
/// Stored as one flat array in YZX order (x varies fastest), addressed by
/// [`Chunk::index`]. The same byte order is used on disk and on the wire.
///
/// The access timestamp and dirty flag are atomics so that shared-lock
/// readers can refresh recency and the saver can clear the flag without
/// taking the store's exclusive lock. The block grid itself only changes
/// through `&mut self`.
pub struct Chunk {
    pos: ChunkPos,
    blocks: Box<[u8]>,
    dirty: AtomicBool,
    last_accessed: AtomicU64,
}

impl Chunk {
    /// An all-air chunk.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            blocks: vec![BlockId::AIR.0; CHUNK_VOLUME].into_boxed_slice(),
            dirty: AtomicBool::new(false),
            last_accessed: AtomicU64::new(0),
        }
    }

    /// Wrap a raw block grid. Returns `None` unless `blocks` holds exactly
    /// [`CHUNK_VOLUME`] bytes.
    pub fn from_blocks(pos: ChunkPos, blocks: Vec<u8>) -> Option<Self> {
        if blocks.len() != CHUNK_VOLUME {
            return None;
        }
        Some(Self {
            pos,
            blocks: blocks.into_boxed_slice(),
            dirty: AtomicBool::new(false),
            last_accessed: AtomicU64::new(0),
        })
    }

    #[inline]
    pub const fn index(x: u8, y: u8, z: u8) -> usize {
        (y as usize) * CHUNK_WIDTH * CHUNK_WIDTH + (z as usize) * CHUNK_WIDTH + (x as usize)
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    #[inline]
    pub fn get_block(&self, local: LocalBlockPos) -> BlockId {
        BlockId(self.blocks[Self::index(local.x, local.y, local.z)])
    }

    /// Write a block and mark the chunk dirty.
    #[inline]
    pub fn set_block(&mut self, local: LocalBlockPos, block: BlockId) {
        self.blocks[Self::index(local.x, local.y, local.z)] = block.0;
        self.dirty.store(true, Ordering::Release);
    }

    /// Fill a vertical run `[y_from, y_to)` of one column. Used by
    /// generators; does not mark the chunk dirty.
    pub fn fill_column(&mut self, x: u8, z: u8, y_from: usize, y_to: usize, block: BlockId) {
        for y in y_from..y_to.min(CHUNK_HEIGHT) {
            self.blocks[Self::index(x, y as u8, z)] = block.0;
        }
    }

    /// The raw block grid in YZX order.
    pub fn blocks(&self) -> &[u8] {
        &self.blocks
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_accessed.store(now_ms, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("pos", &self.pos)
            .field("dirty", &self.is_dirty())
            .field("last_accessed", &self.last_accessed())
            .finish()
    }
}
