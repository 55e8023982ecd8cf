//! Persistence and generation seams for the chunk store.
//!
//! The store never touches the filesystem or knows how terrain looks; it is
//! handed a [`ChunkStorage`] and a [`ChunkGenerator`] at construction.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use super::chunk::Chunk;
use super::position::ChunkPos;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("chunk storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt chunk ({}, {}): {reason}", pos.x, pos.z)]
    Corrupt { pos: ChunkPos, reason: String },
}

/// Durable backing store for chunk block grids.
pub trait ChunkStorage: Send + Sync + 'static {
    /// Read the raw block grid for `pos`. `Ok(None)` means nothing was ever
    /// saved there. Implementations must validate what they read and return
    /// [`StorageError::Corrupt`] rather than a partial grid.
    fn load(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StorageError>;

    /// Durably write the raw block grid for `pos`.
    fn save(&self, pos: ChunkPos, blocks: &[u8]) -> Result<(), StorageError>;
}

/// Deterministic terrain source: a pure function of chunk coordinates.
pub trait ChunkGenerator: Send + Sync + 'static {
    fn generate(&self, pos: ChunkPos) -> Chunk;
}

/// In-memory storage, for tests and ephemeral worlds.
#[derive(Default)]
pub struct MemoryStorage {
    chunks: Mutex<HashMap<ChunkPos, Vec<u8>>>,
    fail_saves: std::sync::atomic::AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.lock().expect("memory storage poisoned").contains_key(&pos)
    }

    pub fn stored(&self, pos: ChunkPos) -> Option<Vec<u8>> {
        self.chunks.lock().expect("memory storage poisoned").get(&pos).cloned()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().expect("memory storage poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every subsequent `save` fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::Relaxed);
    }
}

impl ChunkStorage for MemoryStorage {
    fn load(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.stored(pos))
    }

    fn save(&self, pos: ChunkPos, blocks: &[u8]) -> Result<(), StorageError> {
        if self.fail_saves.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(StorageError::Io(std::io::Error::other("saves disabled")));
        }
        self.chunks
            .lock()
            .expect("memory storage poisoned")
            .insert(pos, blocks.to_vec());
        Ok(())
    }
}

impl<T: ChunkStorage + ?Sized> ChunkStorage for std::sync::Arc<T> {
    fn load(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load(pos)
    }

    fn save(&self, pos: ChunkPos, blocks: &[u8]) -> Result<(), StorageError> {
        (**self).save(pos, blocks)
    }
}
