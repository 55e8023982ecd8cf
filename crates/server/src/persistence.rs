//! World persistence: one file per chunk plus the background saver.
//!
//! Chunks are stored as `<world>/chunk_<x>_<z>.dat`: an 8-byte header with
//! the chunk coordinates (two little-endian `i32`s) followed by the raw
//! block grid. Files are written to a temporary name and renamed into
//! place, so a crash mid-save leaves the previous version intact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};

use lowcraft_engine::world::SaveReport;
use lowcraft_engine::world::chunk::CHUNK_VOLUME;
use lowcraft_engine::world::position::ChunkPos;
use lowcraft_engine::world::storage::{ChunkStorage, StorageError};

use crate::server::Server;

const HEADER_LEN: usize = 8;
const FILE_LEN: usize = HEADER_LEN + CHUNK_VOLUME;

// ── Chunk files ─────────────────────────────────────────────────────────────

pub struct ChunkFileStorage {
    dir: PathBuf,
}

impl ChunkFileStorage {
    /// Use `dir` as the world directory, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("creating world dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.dir.join(format!("chunk_{}_{}.dat", pos.x, pos.z))
    }

    /// Positions of every chunk file in the world directory, sorted.
    pub fn saved_chunks(&self) -> Result<Vec<ChunkPos>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.dir).with_context(|| format!("listing {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match parse_file_name(&name) {
                Some(pos) => out.push(pos),
                None if name.ends_with(".tmp") => {}
                None => tracing::warn!("Skipping unexpected file in world dir: {}", name),
            }
        }
        out.sort();
        Ok(out)
    }
}

fn parse_file_name(name: &str) -> Option<ChunkPos> {
    let coords = name.strip_prefix("chunk_")?.strip_suffix(".dat")?;
    let (x, z) = coords.split_once('_')?;
    Some(ChunkPos::new(x.parse().ok()?, z.parse().ok()?))
}

fn header(pos: ChunkPos) -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[..4].copy_from_slice(&pos.x.to_le_bytes());
    h[4..].copy_from_slice(&pos.z.to_le_bytes());
    h
}

impl ChunkStorage for ChunkFileStorage {
    fn load(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StorageError> {
        let mut bytes = match fs::read(self.chunk_path(pos)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() != FILE_LEN {
            return Err(StorageError::Corrupt {
                pos,
                reason: format!("expected {} bytes, found {}", FILE_LEN, bytes.len()),
            });
        }
        if bytes[..HEADER_LEN] != header(pos) {
            return Err(StorageError::Corrupt {
                pos,
                reason: "header does not match file name".into(),
            });
        }
        bytes.drain(..HEADER_LEN);
        Ok(Some(bytes))
    }

    fn save(&self, pos: ChunkPos, blocks: &[u8]) -> Result<(), StorageError> {
        let path = self.chunk_path(pos);
        let tmp = path.with_extension("dat.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&header(pos))?;
        file.write_all(blocks)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ── Save passes ─────────────────────────────────────────────────────────────

/// Write every dirty chunk once and record the outcome.
pub fn save_pass(server: &Server) -> SaveReport {
    let start = Instant::now();
    let report = server.chunks.save_dirty();
    server.metrics.record_save(&report);
    if report.saved == 0 && report.failed == 0 {
        tracing::debug!("World save: nothing to save");
    } else if report.failed > 0 {
        tracing::warn!(
            "World save: {} chunks written, {} failed in {:.1?}",
            report.saved,
            report.failed,
            start.elapsed()
        );
    } else {
        tracing::info!("World save: {} chunks written in {:.1?}", report.saved, start.elapsed());
    }
    report
}

/// Outcome of asking for a save from the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveRequest {
    /// Ran on the calling thread.
    Completed(SaveReport),
    /// Handed to the saver thread.
    Queued,
    /// A save is already pending; this one folds into it.
    Coalesced,
    /// The saver thread is gone.
    Unavailable,
}

/// How the tick loop reaches the persistence pass.
#[derive(Debug, Clone)]
pub enum SaveTrigger {
    Inline,
    Background(SyncSender<()>),
}

impl SaveTrigger {
    pub fn request(&self, server: &Server) -> SaveRequest {
        match self {
            SaveTrigger::Inline => SaveRequest::Completed(save_pass(server)),
            SaveTrigger::Background(tx) => match tx.try_send(()) {
                Ok(()) => SaveRequest::Queued,
                Err(TrySendError::Full(())) => SaveRequest::Coalesced,
                Err(TrySendError::Disconnected(())) => SaveRequest::Unavailable,
            },
        }
    }
}

/// Background thread running save passes on request, so a slow disk never
/// stalls the tick loop. At most one request waits behind the running pass.
pub struct Saver {
    tx: SyncSender<()>,
    thread: JoinHandle<()>,
}

impl Saver {
    pub fn spawn(server: Arc<Server>) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<()>(1);
        let thread = thread::Builder::new()
            .name("chunk-saver".into())
            .spawn(move || {
                for () in rx {
                    save_pass(&server);
                }
                tracing::debug!("Saver thread exiting");
            })
            .context("spawning saver thread")?;
        Ok(Self { tx, thread })
    }

    pub fn trigger(&self) -> SaveTrigger {
        SaveTrigger::Background(self.tx.clone())
    }

    /// Finish pending work and stop. Every trigger handed out must have
    /// been dropped, or this waits for them.
    pub fn join(self) {
        drop(self.tx);
        if self.thread.join().is_err() {
            tracing::error!("Saver thread panicked");
        }
    }
}
