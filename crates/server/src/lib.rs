//! lowcraft server: a small multiplayer voxel world server.
//!
//! Networking runs on tokio; the tick loop and the background saver run on
//! their own OS threads and share one [`server::Server`] with every
//! connection task.

pub mod block;
pub mod broadcast;
pub mod codec;
pub mod config;
pub mod metrics;
pub mod net;
pub mod persistence;
pub mod player_registry;
pub mod protocol;
pub mod server;
pub mod simulation;
pub mod terrain;
