//! Bounded chunk cache behaviour: capacity, LRU order, persistence policy.

use std::sync::Arc;

use lowcraft_engine::world::block::BlockId;
use lowcraft_engine::world::chunk::{CHUNK_VOLUME, Chunk};
use lowcraft_engine::world::clock::ManualClock;
use lowcraft_engine::world::position::{BlockPos, ChunkPos};
use lowcraft_engine::world::storage::{ChunkGenerator, ChunkStorage, MemoryStorage, StorageError};
use lowcraft_engine::world::{ChunkStore, SaveReport, StoreError, StoreLimits, SweepReport};

const STONE: BlockId = BlockId(1);
const GLASS: BlockId = BlockId(20);

/// Stone up to y = 10, air above.
struct SlabGenerator;

impl ChunkGenerator for SlabGenerator {
    fn generate(&self, pos: ChunkPos) -> Chunk {
        let mut chunk = Chunk::new(pos);
        for x in 0..16 {
            for z in 0..16 {
                chunk.fill_column(x, z, 0, 11, STONE);
            }
        }
        chunk
    }
}

/// Storage whose loads always fail.
struct BrokenStorage;

impl ChunkStorage for BrokenStorage {
    fn load(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StorageError> {
        Err(StorageError::Corrupt {
            pos,
            reason: "header mismatch".into(),
        })
    }

    fn save(&self, _pos: ChunkPos, _blocks: &[u8]) -> Result<(), StorageError> {
        Ok(())
    }
}

fn limits(capacity: usize) -> StoreLimits {
    StoreLimits {
        capacity,
        unload_timeout_ms: 1_000,
        gen_threads: 2,
    }
}

fn store(capacity: usize) -> (ChunkStore, Arc<MemoryStorage>, Arc<ManualClock>) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(1));
    let store = ChunkStore::new(
        limits(capacity),
        SlabGenerator,
        Arc::clone(&storage),
        Arc::clone(&clock),
    )
    .unwrap();
    (store, storage, clock)
}

fn touch(store: &ChunkStore, x: i32, z: i32) {
    store.with_chunk(ChunkPos::new(x, z), |_| ()).unwrap();
}

#[test]
fn zero_capacity_is_rejected() {
    let result = ChunkStore::new(limits(0), SlabGenerator, MemoryStorage::new(), ManualClock::new(0));
    assert!(matches!(result, Err(StoreError::ZeroCapacity)));
}

#[test]
fn get_or_create_generates_once() {
    let (store, _, _) = store(4);
    assert_eq!(store.get_block(BlockPos::new(3, 5, 3)).unwrap(), STONE);
    assert_eq!(store.get_block(BlockPos::new(3, 50, 3)).unwrap(), BlockId::AIR);
    assert_eq!(store.len(), 1);
    assert!(store.contains(ChunkPos::new(0, 0)));
    // Generated terrain is reproducible, so it starts clean.
    assert_eq!(store.dirty_count(), 0);
}

#[test]
fn out_of_column_heights() {
    let (store, _, _) = store(4);
    assert_eq!(store.get_block(BlockPos::new(0, -1, 0)).unwrap(), BlockId::AIR);
    assert_eq!(store.get_block(BlockPos::new(0, 256, 0)).unwrap(), BlockId::AIR);
    assert!(!store.set_block(BlockPos::new(0, 300, 0), STONE).unwrap());
    assert!(store.is_empty());
}

#[test]
fn resident_count_never_exceeds_capacity() {
    let (store, _, clock) = store(5);
    for i in 0..40 {
        clock.advance(1);
        touch(&store, i % 13, i / 3);
        assert!(store.len() <= store.capacity());
    }
    assert_eq!(store.len(), 5);
}

#[test]
fn evicts_least_recently_accessed() {
    let (store, _, clock) = store(3);
    touch(&store, 0, 0); // t=1
    clock.advance(10);
    touch(&store, 1, 0); // t=11
    clock.advance(10);
    touch(&store, 2, 0); // t=21
    clock.advance(10);
    touch(&store, 0, 0); // (0,0) refreshed to t=31

    clock.advance(10);
    touch(&store, 3, 0);

    assert!(!store.contains(ChunkPos::new(1, 0)));
    assert!(store.contains(ChunkPos::new(0, 0)));
    assert!(store.contains(ChunkPos::new(2, 0)));
    assert!(store.contains(ChunkPos::new(3, 0)));
}

#[test]
fn equal_timestamps_evict_lowest_index() {
    let (store, _, _) = store(2);
    touch(&store, 5, 5);
    touch(&store, 6, 6);
    touch(&store, 7, 7);
    assert!(!store.contains(ChunkPos::new(5, 5)));
    assert_eq!(
        store.loaded_positions(),
        vec![ChunkPos::new(6, 6), ChunkPos::new(7, 7)]
    );
}

#[test]
fn mutated_chunk_is_persisted_on_eviction() {
    let (store, storage, clock) = store(4);
    assert!(store.set_block(BlockPos::new(10, 64, 10), GLASS).unwrap());
    assert!(!storage.contains(ChunkPos::new(0, 0)));

    for x in 1..=4 {
        clock.advance(5);
        touch(&store, x, 0);
    }

    assert!(!store.contains(ChunkPos::new(0, 0)));
    let saved = storage.stored(ChunkPos::new(0, 0)).expect("evicted chunk saved");
    assert_eq!(saved.len(), CHUNK_VOLUME);
    assert_eq!(saved[Chunk::index(10, 64, 10)], GLASS.0);

    // Clean evictions are not written.
    assert!(!storage.contains(ChunkPos::new(1, 0)));

    // Coming back loads the saved grid, not fresh terrain.
    clock.advance(5);
    assert_eq!(store.get_block(BlockPos::new(10, 64, 10)).unwrap(), GLASS);
}

#[test]
fn failed_eviction_save_keeps_chunk() {
    let (store, storage, clock) = store(1);
    store.set_block(BlockPos::new(0, 20, 0), GLASS).unwrap();
    storage.set_fail_saves(true);

    clock.advance(5);
    let err = store.with_chunk(ChunkPos::new(1, 0), |_| ()).unwrap_err();
    assert!(matches!(err, StoreError::Persist { pos, .. } if pos == ChunkPos::new(0, 0)));
    assert!(store.contains(ChunkPos::new(0, 0)));
    assert_eq!(store.len(), 1);
    assert_eq!(store.dirty_count(), 1);
}

#[test]
fn saving_clean_chunks_is_a_noop() {
    let (store, storage, _) = store(4);
    touch(&store, 0, 0);
    touch(&store, 1, 1);
    assert_eq!(store.save_dirty(), SaveReport::default());
    assert!(storage.is_empty());
}

#[test]
fn save_pass_clears_dirty_and_round_trips() {
    let (store, storage, _) = store(4);
    store.set_block(BlockPos::new(17, 30, -2), GLASS).unwrap();
    let before = store.with_chunk(ChunkPos::new(1, -1), |c| c.blocks().to_vec()).unwrap();

    assert_eq!(store.save_dirty(), SaveReport { saved: 1, failed: 0 });
    assert_eq!(store.dirty_count(), 0);
    assert_eq!(storage.stored(ChunkPos::new(1, -1)).unwrap(), before);

    // A second pass has nothing left to do.
    assert_eq!(store.save_dirty(), SaveReport::default());
}

#[test]
fn failed_save_stays_dirty_for_retry() {
    let (store, storage, _) = store(4);
    store.set_block(BlockPos::new(1, 1, 1), GLASS).unwrap();
    storage.set_fail_saves(true);
    assert_eq!(store.save_dirty(), SaveReport { saved: 0, failed: 1 });
    assert_eq!(store.dirty_count(), 1);

    storage.set_fail_saves(false);
    assert_eq!(store.save_dirty(), SaveReport { saved: 1, failed: 0 });
    assert_eq!(store.dirty_count(), 0);
}

#[test]
fn idle_sweep_drops_stale_clean_chunks() {
    let (store, storage, clock) = store(8);
    touch(&store, 0, 0);
    touch(&store, 1, 0);
    clock.advance(900);
    touch(&store, 2, 0);
    clock.advance(200);

    // (0,0) and (1,0) are 1100 ms idle, (2,0) only 200 ms.
    assert_eq!(store.sweep_idle(), SweepReport { dropped: 2, dirty_idle: 0 });
    assert_eq!(store.loaded_positions(), vec![ChunkPos::new(2, 0)]);
    // Clean chunks are dropped without a write.
    assert!(!storage.contains(ChunkPos::new(0, 0)));
    assert!(!storage.contains(ChunkPos::new(1, 0)));
}

#[test]
fn idle_sweep_never_writes_dirty_chunks() {
    let (store, storage, clock) = store(8);
    touch(&store, 0, 0);
    store.set_block(BlockPos::new(16, 40, 0), GLASS).unwrap(); // chunk (1, 0)
    clock.advance(5_000);

    assert_eq!(store.sweep_idle(), SweepReport { dropped: 1, dirty_idle: 1 });
    assert_eq!(store.loaded_positions(), vec![ChunkPos::new(1, 0)]);
    assert!(!storage.contains(ChunkPos::new(1, 0)));
    assert_eq!(store.dirty_count(), 1);

    // Once a save pass has run elsewhere the next sweep can drop it.
    assert_eq!(store.save_dirty(), SaveReport { saved: 1, failed: 0 });
    assert_eq!(store.sweep_idle(), SweepReport { dropped: 1, dirty_idle: 0 });
    assert!(store.is_empty());
    assert!(storage.contains(ChunkPos::new(1, 0)));
}

#[test]
fn idle_sweep_keeps_chunk_when_save_fails() {
    let (store, storage, clock) = store(8);
    store.set_block(BlockPos::new(0, 40, 0), GLASS).unwrap();
    storage.set_fail_saves(true);
    clock.advance(5_000);
    assert_eq!(store.save_dirty(), SaveReport { saved: 0, failed: 1 });
    assert_eq!(store.sweep_idle(), SweepReport { dropped: 0, dirty_idle: 1 });
    assert!(store.contains(ChunkPos::new(0, 0)));
}

#[test]
fn corrupt_storage_falls_back_to_generation() {
    let store = ChunkStore::new(limits(2), SlabGenerator, BrokenStorage, ManualClock::new(0)).unwrap();
    assert_eq!(store.get_block(BlockPos::new(0, 0, 0)).unwrap(), STONE);
}

#[test]
fn wrong_size_grid_falls_back_to_generation() {
    let storage = Arc::new(MemoryStorage::new());
    storage.save(ChunkPos::new(0, 0), &[9; 100]).unwrap();
    let store = ChunkStore::new(limits(2), SlabGenerator, Arc::clone(&storage), ManualClock::new(0)).unwrap();
    assert_eq!(store.get_block(BlockPos::new(0, 0, 0)).unwrap(), STONE);
}

#[test]
fn preload_brings_in_square() {
    let (store, _, _) = store(64);
    let square = ChunkPos::new(0, 0).square(2);
    assert_eq!(store.preload(&square).unwrap(), 25);
    assert_eq!(store.len(), 25);
    // Already resident: nothing new.
    assert_eq!(store.preload(&square).unwrap(), 0);
}

#[test]
fn preload_respects_capacity() {
    let (store, _, _) = store(4);
    let inserted = store.preload(&ChunkPos::new(0, 0).square(1)).unwrap();
    assert_eq!(inserted, 9);
    assert_eq!(store.len(), 4);
}

#[test]
fn concurrent_readers_and_writers() {
    let (store, _, clock) = store(16);
    let store = Arc::new(store);
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                for i in 0..200 {
                    clock.advance(1);
                    let pos = BlockPos::new((i % 40) * 16, 20, t * 16);
                    if i % 3 == 0 {
                        store.set_block(pos, GLASS).unwrap();
                    } else {
                        store.get_block(pos).unwrap();
                    }
                    assert!(store.len() <= 16);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(store.len() <= 16);
}
