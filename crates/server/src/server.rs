//! Shared server context: configuration, players, chunks and counters.
//!
//! One `Arc<Server>` is handed to the accept loop, every connection task,
//! the tick thread and the background saver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::sync::Notify;

use lowcraft_engine::world::ChunkStore;
use lowcraft_engine::world::clock::{Clock, SystemClock};
use lowcraft_engine::world::storage::ChunkStorage;

use crate::config::ServerConfig;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::persistence::ChunkFileStorage;
use crate::player_registry::PlayerRegistry;
use crate::terrain::TerrainGenerator;

pub const PROTOCOL_VERSION: i32 = 767;
pub const VERSION_NAME: &str = "lowcraft 0.1";

pub struct Server {
    config: ServerConfig,
    pub players: PlayerRegistry,
    pub chunks: ChunkStore,
    pub metrics: Metrics,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    shutdown: Notify,
}

impl Server {
    /// Open the world directory from `config` and generate missing terrain.
    pub fn open(config: ServerConfig) -> Result<Self> {
        let storage = ChunkFileStorage::open(&config.world.dir)?;
        match storage.saved_chunks() {
            Ok(saved) => tracing::info!("World {}: {} saved chunks", config.world.dir.display(), saved.len()),
            Err(e) => tracing::warn!("Could not list saved chunks: {:#}", e),
        }
        Self::with_storage(config, storage, Arc::new(SystemClock::new()))
    }

    pub fn with_storage(
        config: ServerConfig,
        storage: impl ChunkStorage,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let chunks = ChunkStore::new(config.store_limits(), TerrainGenerator, storage, clock.clone())
            .context("creating chunk store")?;
        Ok(Self {
            players: PlayerRegistry::new(config.server.max_players),
            chunks,
            metrics: Metrics::new(),
            clock,
            running: AtomicBool::new(true),
            shutdown: Notify::new(),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting connections and let the tick loop wind down.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        // The accept loop is the only waiter; a stored permit covers the
        // case where it is between accepts.
        self.shutdown.notify_one();
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        if self.is_running() {
            self.shutdown.notified().await;
        }
    }

    /// Server-list JSON for status requests.
    pub fn status_json(&self) -> String {
        serde_json::json!({
            "version": { "name": VERSION_NAME, "protocol": PROTOCOL_VERSION },
            "players": {
                "max": self.players.capacity(),
                "online": self.players.active_count(),
            },
            "description": { "text": self.config.server.motd },
        })
        .to_string()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.chunks.len() as u64)
    }

    pub fn log_status(&self, tick: u32) {
        let s = self.snapshot();
        tracing::info!(
            "tick {}: {} players, {} chunks loaded ({} dirty), mean tick {:.2?}, {} lag ticks",
            tick,
            self.players.active_count(),
            s.chunks_loaded,
            self.chunks.dirty_count(),
            s.mean_tick(),
            s.lag_ticks,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowcraft_engine::world::clock::ManualClock;
    use lowcraft_engine::world::storage::MemoryStorage;

    #[test]
    fn status_json_reports_capacity_and_motd() {
        let mut config = ServerConfig::default();
        config.server.max_players = 7;
        config.server.motd = "hello \"world\"".into();
        let server =
            Server::with_storage(config, MemoryStorage::new(), Arc::new(ManualClock::new(0))).unwrap();
        let v: serde_json::Value = serde_json::from_str(&server.status_json()).unwrap();
        assert_eq!(v["players"]["max"], 7);
        assert_eq!(v["players"]["online"], 0);
        assert_eq!(v["description"]["text"], "hello \"world\"");
        assert_eq!(v["version"]["protocol"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn stopped_resolves_after_stop() {
        let server = Arc::new(
            Server::with_storage(ServerConfig::default(), MemoryStorage::new(), Arc::new(ManualClock::new(0)))
                .unwrap(),
        );
        assert!(server.is_running());
        server.stop();
        assert!(!server.is_running());
        server.stopped().await;
    }
}
