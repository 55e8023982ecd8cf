//! Server configuration, loaded from a TOML file.
//!
//! Every field has a default, so a missing or empty file yields a working
//! server; command-line overrides are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use lowcraft_engine::tick::{Phase, TickSchedule};
use lowcraft_engine::world::StoreLimits;
use lowcraft_engine::world::position::BlockPos;

/// Frames queued on top of a full login burst.
const LOGIN_BURST_SLACK: usize = 16;
const MAX_RENDER_DISTANCE: u32 = 32;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub world: WorldSection,
    pub simulation: SimulationSection,
    pub gameplay: GameplaySection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    pub max_players: usize,
    pub motd: String,
    /// Per-connection outbound queue depth, in frames. A client that falls
    /// this far behind is disconnected.
    pub outbound_queue_frames: usize,
    pub keep_alive_interval_ms: u64,
    pub player_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 25565,
            max_players: 1000,
            motd: "A lowcraft server".into(),
            outbound_queue_frames: 2048,
            keep_alive_interval_ms: 30_000,
            player_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldSection {
    pub dir: PathBuf,
    /// Radius in chunks for login chunk sends and entity visibility.
    pub render_distance: u32,
    pub max_loaded_chunks: usize,
    pub chunk_unload_timeout_ms: u64,
    pub save_interval_ms: u64,
    /// Run save passes on a background thread instead of inside the tick.
    pub async_save: bool,
    pub chunk_gen_threads: usize,
    pub spawn_x: i32,
    pub spawn_y: i32,
    pub spawn_z: i32,
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("world"),
            render_distance: 6,
            max_loaded_chunks: 512,
            chunk_unload_timeout_ms: 300_000,
            save_interval_ms: 12_000,
            async_save: true,
            chunk_gen_threads: 2,
            spawn_x: 0,
            spawn_y: 64,
            spawn_z: 0,
        }
    }
}

/// Tick rate and per-phase divisors (0 disables a phase).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub tick_rate: u32,
    pub mob_ai_ticks: u32,
    pub redstone_interval: u32,
    pub fluid_update_ticks: u32,
    pub entity_update_rate: u32,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            mob_ai_ticks: 3,
            redstone_interval: 2,
            fluid_update_ticks: 5,
            entity_update_rate: 2,
        }
    }
}

/// Passed through to clients; not enforced by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameplaySection {
    pub difficulty: u8,
    pub pvp: bool,
}

impl Default for GameplaySection {
    fn default() -> Self {
        Self {
            difficulty: 1,
            pvp: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if sim.tick_rate == 0 || sim.tick_rate > 1000 {
            bail!("tick_rate must be between 1 and 1000, got {}", sim.tick_rate);
        }
        if self.server.max_players == 0 {
            bail!("max_players must be at least 1");
        }
        if self.world.max_loaded_chunks == 0 {
            bail!("max_loaded_chunks must be at least 1");
        }
        let r = self.world.render_distance;
        if r == 0 || r > MAX_RENDER_DISTANCE {
            bail!("render_distance must be between 1 and {}, got {}", MAX_RENDER_DISTANCE, r);
        }
        let burst = self.login_burst_frames();
        if self.server.outbound_queue_frames < burst {
            bail!(
                "outbound_queue_frames ({}) cannot hold a login burst of {} frames \
                 (render distance {}, {} players)",
                self.server.outbound_queue_frames,
                burst,
                r,
                self.server.max_players
            );
        }
        Ok(())
    }

    /// `host:port` to listen on.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.simulation.tick_rate.max(1)))
    }

    /// Entity visibility and block-change radius in blocks.
    pub fn view_range_blocks(&self) -> f64 {
        f64::from(self.world.render_distance) * 16.0
    }

    /// Frames queued for a client before it becomes ready: one chunk-data
    /// frame per chunk in the spawn square, one spawn per other player that
    /// may be standing at spawn, and the fixed login packets.
    pub fn login_burst_frames(&self) -> usize {
        let side = 2 * self.world.render_distance as usize + 1;
        let peers = self.server.max_players.saturating_sub(1);
        side * side + peers + LOGIN_BURST_SLACK
    }

    pub fn spawn(&self) -> BlockPos {
        BlockPos::new(self.world.spawn_x, self.world.spawn_y, self.world.spawn_z)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            capacity: self.world.max_loaded_chunks,
            unload_timeout_ms: self.world.chunk_unload_timeout_ms,
            gen_threads: self.world.chunk_gen_threads,
        }
    }

    /// Phase divisors in ticks. Millisecond intervals are rounded down to
    /// whole ticks, never below one; an interval of 0 disables the phase.
    pub fn tick_schedule(&self) -> TickSchedule {
        let period_ms = self.tick_period().as_millis().max(1) as u64;
        let ticks = |ms: u64| match ms {
            0 => 0,
            ms => (ms / period_ms).clamp(1, u64::from(u32::MAX)) as u32,
        };
        let sim = &self.simulation;
        TickSchedule::new()
            .with(Phase::MobAi, sim.mob_ai_ticks)
            .with(Phase::Redstone, sim.redstone_interval)
            .with(Phase::Fluids, sim.fluid_update_ticks)
            .with(Phase::EntityBroadcast, sim.entity_update_rate)
            .with(Phase::KeepAlive, ticks(self.server.keep_alive_interval_ms))
            .with(Phase::Save, ticks(self.world.save_interval_ms))
            .with(Phase::IdleSweep, sim.tick_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.server.port, 25565);
        assert_eq!(config.server.max_players, 1000);
        assert_eq!(config.simulation.tick_rate, 20);
        assert_eq!(config.world.render_distance, 6);
        assert_eq!(config.world.max_loaded_chunks, 512);
        assert_eq!(config.world.chunk_unload_timeout_ms, 300_000);
        assert_eq!(config.world.save_interval_ms, 12_000);
        assert!(config.world.async_save);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.spawn(), BlockPos::new(0, 64, 0));
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections() {
        let config = ServerConfig::from_toml(
            r#"
            [server]
            port = 25570
            max_players = 8

            [world]
            render_distance = 2
            dir = "/tmp/lowcraft-world"

            [simulation]
            fluid_update_ticks = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:25570");
        assert_eq!(config.server.max_players, 8);
        assert_eq!(config.world.render_distance, 2);
        assert_eq!(config.world.dir, PathBuf::from("/tmp/lowcraft-world"));
        assert_eq!(config.world.max_loaded_chunks, 512);
        assert_eq!(config.simulation.fluid_update_ticks, 0);
        assert_eq!(config.view_range_blocks(), 32.0);
    }

    #[test]
    fn unknown_types_are_errors() {
        assert!(ServerConfig::from_toml("[server]\nport = \"high\"").is_err());
    }

    #[test]
    fn validation() {
        let mut config = ServerConfig::default();
        config.simulation.tick_rate = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.world.render_distance = 33;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.world.max_loaded_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.server.max_players = 1;
        config.server.outbound_queue_frames = 100;
        // 13 * 13 + 16 = 185 frames at render distance 6.
        assert_eq!(config.login_burst_frames(), 185);
        assert!(config.validate().is_err());
    }

    #[test]
    fn login_burst_counts_peers_at_spawn() {
        let mut config = ServerConfig::default();
        // 169 chunks, 999 possible peers and the fixed packets.
        assert_eq!(config.login_burst_frames(), 1184);
        assert!(config.validate().is_ok());

        config.server.outbound_queue_frames = 1024;
        assert!(config.validate().is_err());
        config.server.max_players = 500;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_schedule() {
        let schedule = ServerConfig::default().tick_schedule();
        assert_eq!(schedule.divisor(Phase::MobAi), 3);
        assert_eq!(schedule.divisor(Phase::Redstone), 2);
        assert_eq!(schedule.divisor(Phase::Fluids), 5);
        assert_eq!(schedule.divisor(Phase::EntityBroadcast), 2);
        assert_eq!(schedule.divisor(Phase::KeepAlive), 600);
        assert_eq!(schedule.divisor(Phase::Save), 240);
        assert_eq!(schedule.divisor(Phase::IdleSweep), 20);
    }

    #[test]
    fn short_intervals_round_up_to_one_tick() {
        let mut config = ServerConfig::default();
        config.world.save_interval_ms = 10;
        config.server.keep_alive_interval_ms = 0;
        let schedule = config.tick_schedule();
        assert_eq!(schedule.divisor(Phase::Save), 1);
        assert_eq!(schedule.divisor(Phase::KeepAlive), 0);
    }
}
