//! Radius-filtered fan-out between ready players.
//!
//! Each viewer's [`Tracking`] records which peers its client has spawned and
//! where the client believes they are. The entity pass diffs that against
//! the registry and emits spawn, relative-move and destroy packets.
//!
//! All passes run under the registry's shared lock and only queue frames;
//! a failed send is logged and the player is left for its own connection
//! task to unregister.

use lowcraft_engine::world::block::BlockId;
use lowcraft_engine::world::position::BlockPos;

use crate::player_registry::{Player, PlayerRegistry, Pose, Tracking};
use crate::protocol::{ProtocolError, ProtocolState};
use crate::protocol::clientbound::Clientbound;

/// Relative moves are sent in 1/4096 of a block.
const MOVE_SCALE: f64 = 4096.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub spawned: usize,
    pub moved: usize,
    pub destroyed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveStats {
    pub pinged: usize,
    pub timed_out: usize,
}

/// Horizontal visibility test. Symmetric in `a` and `b`.
pub fn in_view(a: &Pose, b: &Pose, range: f64) -> bool {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    dx * dx + dz * dz <= range * range
}

/// Quantized move from `from` to `to`, or `None` if any axis overflows a
/// short (the client must then be re-spawned).
pub fn relative_move(from: [f64; 3], to: [f64; 3]) -> Option<[i16; 3]> {
    let mut delta = [0i16; 3];
    for i in 0..3 {
        let d = ((to[i] - from[i]) * MOVE_SCALE).round();
        if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&d) {
            return None;
        }
        delta[i] = d as i16;
    }
    Some(delta)
}

fn send(viewer: &Player, packet: &Clientbound<'_>) -> bool {
    match viewer.conn.send_packet(packet) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Dropping packet 0x{:02X} for entity {}: {}", packet.id(), viewer.entity_id, e);
            false
        }
    }
}

fn spawn_packet(peer: &Player) -> Clientbound<'static> {
    Clientbound::SpawnPlayer {
        entity_id: peer.entity_id,
        uuid: peer.uuid,
        x: peer.pose.x,
        y: peer.pose.y,
        z: peer.pose.z,
        yaw: peer.pose.yaw,
        pitch: peer.pose.pitch,
    }
}

fn spawn(viewer: &Player, tracking: &mut Tracking, peer: &Player) {
    if send(viewer, &spawn_packet(peer)) {
        tracking.known.insert(peer.entity_id, peer.pose.position());
    }
}

fn destroy(viewer: &Player, tracking: &mut Tracking, entity_id: i32) {
    tracking.known.remove(&entity_id);
    send(
        viewer,
        &Clientbound::DestroyEntities {
            entity_ids: &[entity_id],
        },
    );
}

/// Spawn every ready peer within `range` for a player that is just logging
/// in. Returns how many were sent.
///
/// Unlike the periodic passes this stops at the first failed send: a client
/// that cannot take its initial spawn list must not be marked ready.
pub fn send_initial_entities(players: &PlayerRegistry, viewer_id: i32, range: f64) -> Result<usize, ProtocolError> {
    let view = players.read();
    let Some(viewer) = view.get(viewer_id) else {
        return Ok(0);
    };
    let mut tracking = viewer.tracking();
    let mut sent = 0;
    for peer in view.ready() {
        if peer.entity_id == viewer_id || !in_view(&viewer.pose, &peer.pose, range) {
            continue;
        }
        viewer.conn.send_packet(&spawn_packet(peer))?;
        tracking.known.insert(peer.entity_id, peer.pose.position());
        sent += 1;
    }
    Ok(sent)
}

/// One entity-broadcast pass over all ready players.
pub fn broadcast_entities(players: &PlayerRegistry, range: f64) -> BroadcastStats {
    let view = players.read();
    let ready: Vec<&Player> = view.ready().collect();
    let mut stats = BroadcastStats::default();

    for viewer in &ready {
        let mut tracking = viewer.tracking();

        for peer in &ready {
            if peer.entity_id == viewer.entity_id {
                continue;
            }
            let visible = in_view(&viewer.pose, &peer.pose, range);
            let known = tracking.known.get(&peer.entity_id).copied();
            match (visible, known) {
                (true, None) => {
                    spawn(viewer, &mut tracking, peer);
                    stats.spawned += 1;
                }
                (true, Some(believed)) => match relative_move(believed, peer.pose.position()) {
                    Some([0, 0, 0]) => {}
                    Some(delta) => {
                        let sent = send(
                            viewer,
                            &Clientbound::EntityPosition {
                                entity_id: peer.entity_id,
                                delta,
                                on_ground: peer.pose.on_ground,
                            },
                        );
                        if sent {
                            let mut pos = believed;
                            for i in 0..3 {
                                pos[i] += f64::from(delta[i]) / MOVE_SCALE;
                            }
                            tracking.known.insert(peer.entity_id, pos);
                            stats.moved += 1;
                        }
                    }
                    None => {
                        destroy(viewer, &mut tracking, peer.entity_id);
                        spawn(viewer, &mut tracking, peer);
                        stats.moved += 1;
                    }
                },
                (false, Some(_)) => {
                    destroy(viewer, &mut tracking, peer.entity_id);
                    stats.destroyed += 1;
                }
                (false, None) => {}
            }
        }

        // Entities the client still knows about that are no longer ready.
        let gone: Vec<i32> = tracking
            .known
            .keys()
            .copied()
            .filter(|id| !ready.iter().any(|p| p.entity_id == *id))
            .collect();
        for id in gone {
            destroy(viewer, &mut tracking, id);
            stats.destroyed += 1;
        }
    }
    stats
}

/// Notify every ready player within `range` of `pos` that its block is now
/// `block`. Returns the number of players notified.
pub fn broadcast_block_change(players: &PlayerRegistry, pos: BlockPos, block: BlockId, range: f64) -> usize {
    let frame = match (Clientbound::BlockChange { pos, block }).encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Failed to encode block change at {:?}: {}", pos, e);
            return 0;
        }
    };
    let range_sq = range * range;
    let view = players.read();
    let mut notified = 0;
    for player in view.ready() {
        if pos.distance_sq_to(player.pose.x, player.pose.y, player.pose.z) > range_sq {
            continue;
        }
        if player.conn.send(frame.clone()).is_ok() {
            notified += 1;
        }
    }
    notified
}

/// Ping every ready player, disconnecting those that have not answered
/// within `timeout_ms`.
pub fn keep_alive(players: &PlayerRegistry, id: i64, now_ms: u64, timeout_ms: u64) -> KeepAliveStats {
    let view = players.read();
    let mut stats = KeepAliveStats::default();
    for player in view.ready() {
        if now_ms.saturating_sub(player.last_keep_alive_ms) > timeout_ms {
            tracing::info!("{} timed out", player.username);
            player.conn.disconnect(ProtocolState::Play, "Timed out");
            stats.timed_out += 1;
        } else if send(player, &Clientbound::KeepAlive { id }) {
            stats.pinged += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(x: f64, z: f64) -> Pose {
        Pose {
            x,
            y: 64.0,
            z,
            ..Pose::default()
        }
    }

    #[test]
    fn view_test_is_symmetric_and_inclusive() {
        let a = pose(0.0, 0.0);
        let b = pose(30.0, 40.0);
        assert!(in_view(&a, &b, 50.0));
        assert!(in_view(&b, &a, 50.0));
        assert!(!in_view(&a, &b, 49.9));
        assert!(!in_view(&b, &a, 49.9));
    }

    #[test]
    fn view_test_ignores_height() {
        let a = pose(0.0, 0.0);
        let mut b = pose(0.0, 0.0);
        b.y = 250.0;
        assert!(in_view(&a, &b, 16.0));
    }

    #[test]
    fn relative_move_quantizes_and_overflows() {
        assert_eq!(relative_move([0.0; 3], [1.0, -0.5, 0.0]), Some([4096, -2048, 0]));
        assert_eq!(relative_move([0.0; 3], [7.9, 0.0, 0.0]), Some([32358, 0, 0]));
        assert_eq!(relative_move([0.0; 3], [8.0, 0.0, 0.0]), None);
        assert_eq!(relative_move([0.0; 3], [0.0, 0.0, -8.0]), Some([0, 0, i16::MIN]));
    }
}
