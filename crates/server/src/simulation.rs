//! Fixed-rate tick loop and pluggable simulation layers.
//!
//! The loop runs on its own OS thread. Each tick it walks the phases that
//! are due in their fixed order (simulation layers, entity broadcast,
//! keep-alive, save, idle sweep), then sleeps out the rest of the tick
//! budget or records lag. Chunk writes never happen on this thread unless
//! the server runs with synchronous saves.
//!
//! # Adding a new layer
//!
//! 1. Implement [`SimulationLayer`] for your struct.
//! 2. Add a `Box::new(YourLayer)` to the layers passed to [`TickLoop::new`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};

use lowcraft_engine::tick::{Phase, TickSchedule, TickTimer};

use crate::broadcast;
use crate::persistence::{SaveRequest, SaveTrigger};
use crate::server::Server;

/// Ticks between status lines.
const STATUS_EVERY: u32 = 400;

/// World simulation hook run on one of the simulation phases.
///
/// Layers run on the tick thread and share its budget; heavy work should be
/// amortized across ticks.
pub trait SimulationLayer: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// [`Phase::MobAi`], [`Phase::Redstone`] or [`Phase::Fluids`].
    fn phase(&self) -> Phase;

    fn run(&self, server: &Server, tick: u32);
}

/// A layer that reserves its phase slot and does nothing yet.
pub struct IdleLayer {
    name: &'static str,
    phase: Phase,
}

impl SimulationLayer for IdleLayer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn run(&self, _server: &Server, tick: u32) {
        tracing::trace!("{} layer: tick {}", self.name, tick);
    }
}

/// Mob AI, redstone and fluid hooks.
pub fn default_layers() -> Vec<Box<dyn SimulationLayer>> {
    vec![
        Box::new(IdleLayer {
            name: "mob-ai",
            phase: Phase::MobAi,
        }),
        Box::new(IdleLayer {
            name: "redstone",
            phase: Phase::Redstone,
        }),
        Box::new(IdleLayer {
            name: "fluids",
            phase: Phase::Fluids,
        }),
    ]
}

pub struct TickLoop {
    server: Arc<Server>,
    schedule: TickSchedule,
    timer: TickTimer,
    layers: Vec<Box<dyn SimulationLayer>>,
    saves: SaveTrigger,
}

impl TickLoop {
    pub fn new(server: Arc<Server>, layers: Vec<Box<dyn SimulationLayer>>, saves: SaveTrigger) -> Self {
        let config = server.config();
        let schedule = config.tick_schedule();
        let timer = TickTimer::with_period(config.tick_period());
        Self {
            server,
            schedule,
            timer,
            layers,
            saves,
        }
    }

    pub fn timer(&self) -> &TickTimer {
        &self.timer
    }

    /// Advance the counter and run every due phase. Returns the phases run.
    pub fn run_tick(&mut self) -> Vec<Phase> {
        let tick = self.timer.begin_tick();
        let due: Vec<Phase> = self.schedule.due(tick).collect();
        for &phase in &due {
            self.run_phase(phase, tick);
        }
        if tick % STATUS_EVERY == 0 {
            self.server.log_status(tick);
        }
        due
    }

    fn run_phase(&self, phase: Phase, tick: u32) {
        let server = &*self.server;
        let config = server.config();
        match phase {
            Phase::MobAi | Phase::Redstone | Phase::Fluids => {
                for layer in self.layers.iter().filter(|l| l.phase() == phase) {
                    layer.run(server, tick);
                }
            }
            Phase::EntityBroadcast => {
                let stats = broadcast::broadcast_entities(&server.players, config.view_range_blocks());
                if stats != broadcast::BroadcastStats::default() {
                    tracing::trace!("Broadcast tick {}: {:?}", tick, stats);
                }
            }
            Phase::KeepAlive => {
                let stats = broadcast::keep_alive(
                    &server.players,
                    i64::from(tick),
                    server.now_ms(),
                    config.server.player_timeout_ms,
                );
                tracing::trace!("Keep-alive tick {}: {:?}", tick, stats);
            }
            Phase::Save => self.request_save(),
            Phase::IdleSweep => {
                let sweep = server.chunks.sweep_idle();
                if sweep.dropped > 0 {
                    tracing::debug!("Unloaded {} idle chunks", sweep.dropped);
                }
                // Idle chunks with unsaved edits wait for a save pass and go
                // on a later sweep.
                if sweep.dirty_idle > 0 {
                    tracing::debug!("{} idle chunks need saving before unload", sweep.dirty_idle);
                    self.request_save();
                }
            }
        }
    }

    fn request_save(&self) {
        match self.saves.request(&self.server) {
            SaveRequest::Completed(_) | SaveRequest::Queued => {}
            SaveRequest::Coalesced => tracing::debug!("Save still running, request coalesced"),
            SaveRequest::Unavailable => tracing::error!("Saver thread is gone, skipping save"),
        }
    }

    /// Close out a tick that took `elapsed`, returning how long to sleep.
    pub fn finish_tick(&mut self, elapsed: std::time::Duration) -> Option<std::time::Duration> {
        let sleep = self.timer.finish_tick(elapsed);
        self.server.metrics.record_tick(elapsed, self.timer.lag_ticks());
        sleep
    }

    /// Tick until the server stops.
    pub fn run(mut self) {
        tracing::info!(
            "Tick loop started ({:?} per tick, {} simulation layers)",
            self.timer.period(),
            self.layers.len()
        );
        while self.server.is_running() {
            let start = Instant::now();
            self.run_tick();
            if let Some(rest) = self.finish_tick(start.elapsed()) {
                thread::sleep(rest);
            }
        }
        tracing::info!(
            "Tick loop stopped after {} ticks ({} lag ticks)",
            self.timer.total_ticks(),
            self.timer.lag_ticks()
        );
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("tick".into())
            .spawn(move || self.run())
            .context("spawning tick thread")
    }
}
