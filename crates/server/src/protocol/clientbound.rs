//! Packets the server sends.

use lowcraft_engine::world::block::BlockId;
use lowcraft_engine::world::position::{BlockPos, ChunkPos};
use uuid::Uuid;

use super::ids::{login, play_out, status};
use crate::codec::{CodecError, PacketBuffer, encode_frame};

/// Entity type id of a player.
pub const PLAYER_ENTITY_TYPE: i32 = 0x0F;

#[derive(Debug, Clone, PartialEq)]
pub enum Clientbound<'a> {
    StatusResponse {
        json: &'a str,
    },
    Pong {
        payload: i64,
    },
    LoginDisconnect {
        reason: &'a str,
    },
    LoginSuccess {
        uuid: Uuid,
        username: &'a str,
    },
    SpawnPosition {
        pos: BlockPos,
        angle: f32,
    },
    PositionAndLook {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    },
    ChunkData {
        pos: ChunkPos,
        blocks: &'a [u8],
    },
    BlockChange {
        pos: BlockPos,
        block: BlockId,
    },
    SpawnPlayer {
        entity_id: i32,
        uuid: Uuid,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    },
    DestroyEntities {
        entity_ids: &'a [i32],
    },
    EntityPosition {
        entity_id: i32,
        delta: [i16; 3],
        on_ground: bool,
    },
    KeepAlive {
        id: i64,
    },
    Disconnect {
        reason: &'a str,
    },
}

/// Rotation in degrees to the 1/256-turn byte used on the wire.
pub fn angle_byte(degrees: f32) -> u8 {
    ((degrees * 256.0 / 360.0) as i32) as u8
}

/// A chat component carrying plain text.
pub fn text_component(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

impl Clientbound<'_> {
    pub fn id(&self) -> i32 {
        match self {
            Self::StatusResponse { .. } => status::RESPONSE,
            Self::Pong { .. } => status::PONG,
            Self::LoginDisconnect { .. } => login::DISCONNECT,
            Self::LoginSuccess { .. } => login::SUCCESS,
            Self::SpawnPosition { .. } => play_out::SPAWN_POSITION,
            Self::PositionAndLook { .. } => play_out::POSITION_AND_LOOK,
            Self::ChunkData { .. } => play_out::CHUNK_DATA,
            Self::BlockChange { .. } => play_out::BLOCK_CHANGE,
            Self::SpawnPlayer { .. } => play_out::SPAWN_PLAYER,
            Self::DestroyEntities { .. } => play_out::DESTROY_ENTITIES,
            Self::EntityPosition { .. } => play_out::ENTITY_POSITION,
            Self::KeepAlive { .. } => play_out::KEEP_ALIVE,
            Self::Disconnect { .. } => play_out::DISCONNECT,
        }
    }

    pub fn write_payload(&self, buf: &mut PacketBuffer) -> Result<(), CodecError> {
        match *self {
            Self::StatusResponse { json } => buf.write_string(json)?,
            Self::Pong { payload } => buf.write_i64(payload)?,
            Self::LoginDisconnect { reason } | Self::Disconnect { reason } => {
                buf.write_string(&text_component(reason))?
            }
            Self::LoginSuccess { uuid, username } => {
                buf.write_uuid(&uuid)?;
                buf.write_string(username)?;
                buf.write_varint(0)?; // properties
            }
            Self::SpawnPosition { pos, angle } => {
                buf.write_position(pos)?;
                buf.write_f32(angle)?;
            }
            Self::PositionAndLook { x, y, z, yaw, pitch } => {
                buf.write_f64(x)?;
                buf.write_f64(y)?;
                buf.write_f64(z)?;
                buf.write_f32(yaw)?;
                buf.write_f32(pitch)?;
                buf.write_u8(0)?; // flags: all absolute
                buf.write_varint(0)?; // teleport id
                buf.write_bool(false)?; // dismount
            }
            Self::ChunkData { pos, blocks } => {
                buf.write_i32(pos.x)?;
                buf.write_i32(pos.z)?;
                buf.write_varint(1)?; // section mask
                buf.write_varint(0)?; // heightmaps
                buf.write_varint(0)?; // biomes
                buf.write_varint(blocks.len() as i32)?;
                buf.write_bytes(blocks)?;
                buf.write_varint(0)?; // block entities
            }
            Self::BlockChange { pos, block } => {
                buf.write_position(pos)?;
                buf.write_varint(i32::from(block.0))?;
            }
            Self::SpawnPlayer {
                entity_id,
                uuid,
                x,
                y,
                z,
                yaw,
                pitch,
            } => {
                buf.write_varint(entity_id)?;
                buf.write_uuid(&uuid)?;
                buf.write_varint(PLAYER_ENTITY_TYPE)?;
                buf.write_f64(x)?;
                buf.write_f64(y)?;
                buf.write_f64(z)?;
                buf.write_u8(angle_byte(pitch))?;
                buf.write_u8(angle_byte(yaw))?;
                buf.write_u8(angle_byte(yaw))?; // head yaw
                for _ in 0..3 {
                    buf.write_i16(0)?; // velocity
                }
            }
            Self::DestroyEntities { entity_ids } => {
                buf.write_varint(entity_ids.len() as i32)?;
                for &id in entity_ids {
                    buf.write_varint(id)?;
                }
            }
            Self::EntityPosition {
                entity_id,
                delta,
                on_ground,
            } => {
                buf.write_varint(entity_id)?;
                for d in delta {
                    buf.write_i16(d)?;
                }
                buf.write_bool(on_ground)?;
            }
            Self::KeepAlive { id } => buf.write_i64(id)?,
        }
        Ok(())
    }

    /// The complete, length-prefixed frame.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut payload = match self {
            Self::ChunkData { blocks, .. } => PacketBuffer::with_capacity(blocks.len() + 32),
            _ => PacketBuffer::new(),
        };
        self.write_payload(&mut payload)?;
        encode_frame(self.id(), payload.as_slice())
    }
}
