//! Per-connection protocol state machine.
//!
//! Handshake -> Status | Login -> Play
//!
//! A [`Session`] owns the connection's protocol state and consumes one
//! decoded frame at a time. Any error it returns ends the connection; the
//! caller reports it with [`Session::fail`].

use std::net::SocketAddr;

use lowcraft_engine::world::block::BlockId;
use lowcraft_engine::world::position::ChunkPos;

use super::clientbound::Clientbound;
use super::serverbound::{DIG_FINISHED, Serverbound};
use super::{ProtocolError, ProtocolState};
use crate::broadcast;
use crate::codec::split_packet;
use crate::net::connection::ConnectionHandle;
use crate::player_registry::{HOTBAR_SLOTS, Pose, RegistryError};
use crate::server::Server;

/// What the connection should do after a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop reading; queued frames are still flushed.
    Close,
}

pub struct Session {
    entity_id: i32,
    state: ProtocolState,
    conn: ConnectionHandle,
}

impl Session {
    pub fn new(entity_id: i32, conn: ConnectionHandle) -> Self {
        Self {
            entity_id,
            state: ProtocolState::Handshake,
            conn,
        }
    }

    pub fn entity_id(&self) -> i32 {
        self.entity_id
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.conn.peer()
    }

    /// Decode and handle one frame body (packet id + payload).
    pub fn handle_frame(&mut self, server: &Server, body: &[u8]) -> Result<Flow, ProtocolError> {
        let (id, payload) = split_packet(body)?;
        let packet = Serverbound::decode(self.state, id, payload)?;
        self.handle_packet(server, packet)
    }

    pub fn handle_packet(&mut self, server: &Server, packet: Serverbound) -> Result<Flow, ProtocolError> {
        match packet {
            // ── Handshake ───────────────────────────────────────────────
            Serverbound::Handshake {
                protocol_version,
                address,
                port,
                next_state,
            } => {
                let next = ProtocolState::from_next_state(next_state)
                    .ok_or(ProtocolError::InvalidNextState(next_state))?;
                tracing::debug!(
                    "Handshake from {}: protocol={}, host={}:{}, next={}",
                    self.peer(),
                    protocol_version,
                    address,
                    port,
                    next
                );
                self.set_state(server, next);
                Ok(Flow::Continue)
            }

            // ── Status ──────────────────────────────────────────────────
            Serverbound::StatusRequest => {
                let json = server.status_json();
                self.conn.send_packet(&Clientbound::StatusResponse { json: &json })?;
                Ok(Flow::Continue)
            }
            Serverbound::Ping { payload } => {
                self.conn.send_packet(&Clientbound::Pong { payload })?;
                Ok(Flow::Close)
            }

            // ── Login ───────────────────────────────────────────────────
            Serverbound::LoginStart { username } => self.login(server, &username),

            // ── Play ────────────────────────────────────────────────────
            Serverbound::PositionAndRotation {
                x,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                server.players.with_player_mut(self.entity_id, |p| {
                    p.pose = Pose {
                        x,
                        y,
                        z,
                        yaw,
                        pitch,
                        on_ground,
                    };
                });
                Ok(Flow::Continue)
            }
            Serverbound::BlockDig { status, pos } => {
                if status == DIG_FINISHED && server.chunks.set_block(pos, BlockId::AIR)? {
                    let n = broadcast::broadcast_block_change(
                        &server.players,
                        pos,
                        BlockId::AIR,
                        server.config().view_range_blocks(),
                    );
                    tracing::debug!("Entity {} broke {:?}, notified {}", self.entity_id, pos, n);
                }
                Ok(Flow::Continue)
            }
            Serverbound::BlockPlace { pos, face } => {
                tracing::debug!("Entity {} placed against {:?} face {} (ignored)", self.entity_id, pos, face);
                Ok(Flow::Continue)
            }
            Serverbound::KeepAlive { id } => {
                let now = server.now_ms();
                server.players.with_player_mut(self.entity_id, |p| p.last_keep_alive_ms = now);
                tracing::trace!("Keep-alive {} from entity {}", id, self.entity_id);
                Ok(Flow::Continue)
            }
            Serverbound::HeldItemChange { slot } => {
                if (0..HOTBAR_SLOTS).contains(&slot) {
                    server
                        .players
                        .with_player_mut(self.entity_id, |p| p.selected_slot = slot as u8);
                } else {
                    tracing::debug!("Entity {} selected invalid slot {}", self.entity_id, slot);
                }
                Ok(Flow::Continue)
            }
            Serverbound::ChatMessage { message } => {
                tracing::debug!("Chat from entity {}: {}", self.entity_id, message);
                Ok(Flow::Continue)
            }
        }
    }

    /// Report a fatal error to the client (where the state allows it) and
    /// close the connection.
    pub fn fail(&self, err: &ProtocolError) {
        self.conn.disconnect(self.state, &format!("Protocol error: {err}"));
    }

    fn set_state(&mut self, server: &Server, state: ProtocolState) {
        self.state = state;
        server.players.with_player_mut(self.entity_id, |p| p.state = state);
    }

    fn login(&mut self, server: &Server, username: &str) -> Result<Flow, ProtocolError> {
        if username.is_empty() {
            self.conn.disconnect(self.state, "Invalid username");
            return Ok(Flow::Close);
        }
        let config = server.config();
        let spawn = config.spawn();
        let pose = Pose::at_spawn(spawn);
        let uuid = match server.players.claim_name(self.entity_id, username, pose, server.now_ms()) {
            Ok(uuid) => uuid,
            Err(RegistryError::NameTaken(_)) => {
                tracing::info!("Rejected {} from {}: already connected", username, self.peer());
                self.conn.disconnect(self.state, "already connected");
                return Ok(Flow::Close);
            }
            Err(e) => {
                tracing::warn!("Login for {} failed: {}", username, e);
                return Ok(Flow::Close);
            }
        };
        self.state = ProtocolState::Play;

        self.conn.send_packet(&Clientbound::LoginSuccess { uuid, username })?;
        self.conn.send_packet(&Clientbound::SpawnPosition { pos: spawn, angle: 0.0 })?;
        self.conn.send_packet(&Clientbound::PositionAndLook {
            x: pose.x,
            y: pose.y,
            z: pose.z,
            yaw: pose.yaw,
            pitch: pose.pitch,
        })?;

        let square = ChunkPos::containing(pose.x, pose.z).square(config.world.render_distance as i32);
        server.chunks.preload(&square)?;
        for pos in square {
            let frame = server
                .chunks
                .with_chunk(pos, |chunk| Clientbound::ChunkData { pos, blocks: chunk.blocks() }.encode())??;
            self.conn.send(frame)?;
        }

        let range = config.view_range_blocks();
        let peers = broadcast::send_initial_entities(&server.players, self.entity_id, range)?;
        server.players.with_player_mut(self.entity_id, |p| p.ready = true);
        server.metrics.player_joined();
        tracing::info!(
            "{} joined as entity {} from {} ({} players in view)",
            username,
            self.entity_id,
            self.peer(),
            peers
        );
        Ok(Flow::Continue)
    }
}
