pub mod block;
pub mod chunk;
pub mod clock;
pub mod position;
pub mod storage;

use std::sync::RwLock;
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;

use block::BlockId;
use chunk::Chunk;
use clock::Clock;
use position::{BlockPos, ChunkPos};
use storage::{ChunkGenerator, ChunkStorage, StorageError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to persist chunk ({}, {}) before eviction: {source}", pos.x, pos.z)]
    Persist {
        pos: ChunkPos,
        #[source]
        source: StorageError,
    },

    #[error("chunk store capacity must be at least 1")]
    ZeroCapacity,

    #[error("could not build chunk generation pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Sizing knobs for a [`ChunkStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    /// Maximum number of resident chunks.
    pub capacity: usize,
    /// Clean chunks idle for longer than this are dropped by
    /// [`ChunkStore::sweep_idle`].
    pub unload_timeout_ms: u64,
    /// Worker threads used by [`ChunkStore::preload`].
    pub gen_threads: usize,
}

/// Outcome of a save pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
}

/// Outcome of an idle sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Clean idle chunks that were dropped.
    pub dropped: usize,
    /// Idle chunks kept because they still need saving.
    pub dirty_idle: usize,
}

/// Bounded cache of resident chunks.
///
/// Chunks live in one `Vec` behind a single reader/writer lock. Lookups scan
/// under the shared lock and refresh the access timestamp atomically; a
/// miss escalates to the exclusive lock, re-checks, evicts the least recently
/// accessed chunk if the cache is full, then loads or generates the new one.
///
/// Lock order: callers that also hold the player registry lock must take it
/// *before* calling into the store.
pub struct ChunkStore {
    chunks: RwLock<Vec<Chunk>>,
    limits: StoreLimits,
    generator: Box<dyn ChunkGenerator>,
    storage: Box<dyn ChunkStorage>,
    clock: Box<dyn Clock>,
    gen_pool: rayon::ThreadPool,
}

impl ChunkStore {
    pub fn new(
        limits: StoreLimits,
        generator: impl ChunkGenerator,
        storage: impl ChunkStorage,
        clock: impl Clock,
    ) -> Result<Self, StoreError> {
        if limits.capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        let gen_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(limits.gen_threads.max(1))
            .thread_name(|i| format!("chunk-gen-{i}"))
            .build()?;
        let mut chunks = Vec::new();
        chunks.reserve_exact(limits.capacity);
        Ok(Self {
            chunks: RwLock::new(chunks),
            limits,
            generator: Box::new(generator),
            storage: Box::new(storage),
            clock: Box::new(clock),
            gen_pool,
        })
    }

    pub fn capacity(&self) -> usize {
        self.limits.capacity
    }

    /// Number of resident chunks.
    pub fn len(&self) -> usize {
        self.chunks.read().expect("chunk store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is `pos` resident? Does not refresh its access time.
    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks
            .read()
            .expect("chunk store poisoned")
            .iter()
            .any(|c| c.pos() == pos)
    }

    pub fn loaded_positions(&self) -> Vec<ChunkPos> {
        self.chunks
            .read()
            .expect("chunk store poisoned")
            .iter()
            .map(Chunk::pos)
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.chunks
            .read()
            .expect("chunk store poisoned")
            .iter()
            .filter(|c| c.is_dirty())
            .count()
    }

    /// Last access timestamp of a resident chunk (diagnostics and tests).
    pub fn last_accessed(&self, pos: ChunkPos) -> Option<u64> {
        self.chunks
            .read()
            .expect("chunk store poisoned")
            .iter()
            .find(|c| c.pos() == pos)
            .map(Chunk::last_accessed)
    }

    /// Get-or-create `pos` and run `f` on it under the shared lock (or the
    /// exclusive lock, when the chunk had to be brought in).
    pub fn with_chunk<R>(&self, pos: ChunkPos, f: impl FnOnce(&Chunk) -> R) -> Result<R, StoreError> {
        let now = self.clock.now_ms();
        {
            let chunks = self.chunks.read().expect("chunk store poisoned");
            if let Some(chunk) = chunks.iter().find(|c| c.pos() == pos) {
                chunk.touch(now);
                return Ok(f(chunk));
            }
        }

        let mut chunks = self.chunks.write().expect("chunk store poisoned");
        let idx = self.index_or_insert(&mut chunks, pos)?;
        let chunk = &chunks[idx];
        chunk.touch(now);
        Ok(f(chunk))
    }

    /// Get-or-create `pos` and run `f` on it under the exclusive lock.
    pub fn with_chunk_mut<R>(
        &self,
        pos: ChunkPos,
        f: impl FnOnce(&mut Chunk) -> R,
    ) -> Result<R, StoreError> {
        let now = self.clock.now_ms();
        let mut chunks = self.chunks.write().expect("chunk store poisoned");
        let idx = self.index_or_insert(&mut chunks, pos)?;
        let chunk = &mut chunks[idx];
        chunk.touch(now);
        Ok(f(chunk))
    }

    /// Read a block, bringing its chunk in if needed. Heights outside the
    /// column read as air.
    pub fn get_block(&self, pos: BlockPos) -> Result<BlockId, StoreError> {
        let Some(local) = pos.local() else {
            return Ok(BlockId::AIR);
        };
        self.with_chunk(pos.chunk(), |chunk| chunk.get_block(local))
    }

    /// Write a block and mark its chunk dirty. Returns `false` (and does
    /// nothing) when `y` is outside the column.
    pub fn set_block(&self, pos: BlockPos, block: BlockId) -> Result<bool, StoreError> {
        let Some(local) = pos.local() else {
            return Ok(false);
        };
        self.with_chunk_mut(pos.chunk(), |chunk| chunk.set_block(local, block))?;
        Ok(true)
    }

    /// Bring every chunk in `positions` into the cache.
    ///
    /// Missing chunks are loaded or generated in parallel on the generation
    /// pool *without* holding the lock, then inserted in one exclusive
    /// section. Returns the number of chunks that were brought in.
    pub fn preload(&self, positions: &[ChunkPos]) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let missing: Vec<ChunkPos> = {
            let chunks = self.chunks.read().expect("chunk store poisoned");
            positions
                .iter()
                .copied()
                .filter(|&pos| match chunks.iter().find(|c| c.pos() == pos) {
                    Some(chunk) => {
                        chunk.touch(now);
                        false
                    }
                    None => true,
                })
                .collect()
        };
        if missing.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let fresh: Vec<Chunk> = self
            .gen_pool
            .install(|| missing.par_iter().map(|&pos| self.load_or_generate(pos)).collect());

        let mut inserted = 0;
        let mut chunks = self.chunks.write().expect("chunk store poisoned");
        for chunk in fresh {
            // Another thread may have brought it in while we were generating.
            if chunks.iter().any(|c| c.pos() == chunk.pos()) {
                continue;
            }
            chunk.touch(now);
            self.insert_locked(&mut chunks, chunk)?;
            inserted += 1;
        }
        tracing::debug!("Preloaded {} chunks in {:.2?}", inserted, start.elapsed());
        Ok(inserted)
    }

    /// Drop every clean chunk that has not been accessed for longer than
    /// the unload timeout.
    ///
    /// Nothing is written here: idle chunks that are still dirty stay
    /// resident and are counted in [`SweepReport::dirty_idle`], so the caller
    /// can schedule a [`ChunkStore::save_dirty`] off its hot path and let a
    /// later sweep drop them once they are clean.
    pub fn sweep_idle(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let timeout = self.limits.unload_timeout_ms;
        let mut chunks = self.chunks.write().expect("chunk store poisoned");
        let before = chunks.len();
        let mut dirty_idle = 0;
        chunks.retain(|chunk| {
            if now.saturating_sub(chunk.last_accessed()) <= timeout {
                return true;
            }
            if chunk.is_dirty() {
                dirty_idle += 1;
                return true;
            }
            false
        });
        let report = SweepReport {
            dropped: before - chunks.len(),
            dirty_idle,
        };
        if report.dropped > 0 {
            tracing::debug!(
                "Idle sweep unloaded {} chunks ({} resident)",
                report.dropped,
                chunks.len()
            );
        }
        report
    }

    /// Write every dirty chunk through the storage backend.
    ///
    /// Each chunk is written while the shared lock is held, so its grid
    /// cannot change mid-write and clearing the dirty flag afterwards is
    /// exact. A failed write leaves the chunk dirty for the next pass.
    pub fn save_dirty(&self) -> SaveReport {
        let dirty: Vec<ChunkPos> = self
            .chunks
            .read()
            .expect("chunk store poisoned")
            .iter()
            .filter(|c| c.is_dirty())
            .map(Chunk::pos)
            .collect();

        let mut report = SaveReport::default();
        for pos in dirty {
            let chunks = self.chunks.read().expect("chunk store poisoned");
            let Some(chunk) = chunks.iter().find(|c| c.pos() == pos) else {
                continue; // evicted (and persisted) since we looked
            };
            match self.persist(chunk) {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    tracing::warn!("{}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Index of `pos`, inserting it first if absent. Caller holds the
    /// exclusive lock.
    fn index_or_insert(&self, chunks: &mut Vec<Chunk>, pos: ChunkPos) -> Result<usize, StoreError> {
        if let Some(idx) = chunks.iter().position(|c| c.pos() == pos) {
            return Ok(idx);
        }
        let chunk = self.load_or_generate(pos);
        self.insert_locked(chunks, chunk)
    }

    /// Append a chunk, evicting the least recently accessed one first when
    /// the cache is full. Caller holds the exclusive lock.
    fn insert_locked(&self, chunks: &mut Vec<Chunk>, chunk: Chunk) -> Result<usize, StoreError> {
        if chunks.len() >= self.limits.capacity {
            self.evict_oldest(chunks)?;
        }
        chunks.push(chunk);
        Ok(chunks.len() - 1)
    }

    fn evict_oldest(&self, chunks: &mut Vec<Chunk>) -> Result<(), StoreError> {
        // `min_by_key` keeps the first of equal minima: ties go to the
        // lowest store index.
        let Some((idx, _)) = chunks
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.last_accessed())
        else {
            return Ok(());
        };
        self.persist(&chunks[idx])?;
        let evicted = chunks.remove(idx);
        tracing::debug!(
            "Evicted chunk ({}, {}) last accessed at {} ms",
            evicted.pos().x,
            evicted.pos().z,
            evicted.last_accessed(),
        );
        Ok(())
    }

    /// Save a chunk if it is dirty. Clean chunks are a no-op.
    fn persist(&self, chunk: &Chunk) -> Result<(), StoreError> {
        if !chunk.is_dirty() {
            return Ok(());
        }
        let pos = chunk.pos();
        self.storage
            .save(pos, chunk.blocks())
            .map_err(|source| StoreError::Persist { pos, source })?;
        chunk.mark_clean();
        Ok(())
    }

    fn load_or_generate(&self, pos: ChunkPos) -> Chunk {
        match self.storage.load(pos) {
            Ok(Some(blocks)) => match Chunk::from_blocks(pos, blocks) {
                Some(chunk) => return chunk,
                None => tracing::warn!(
                    "Saved chunk ({}, {}) has the wrong size, regenerating",
                    pos.x,
                    pos.z
                ),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load chunk ({}, {}), regenerating: {}", pos.x, pos.z, e),
        }
        let chunk = self.generator.generate(pos);
        debug_assert_eq!(chunk.pos(), pos);
        chunk
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("resident", &self.len())
            .field("limits", &self.limits)
            .finish()
    }
}
