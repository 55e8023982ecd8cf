//! Packets the server receives, decoded per protocol state.

use lowcraft_engine::world::position::BlockPos;

use super::ids::{handshake, login, play_in, status};
use super::{ProtocolError, ProtocolState};
use crate::codec::PacketReader;

pub const MAX_ADDRESS_LEN: usize = 255;
pub const MAX_USERNAME_LEN: usize = 16;
pub const MAX_CHAT_LEN: usize = 256;

const LONGEST_STRING: usize = if MAX_ADDRESS_LEN > MAX_CHAT_LEN {
    MAX_ADDRESS_LEN
} else {
    MAX_CHAT_LEN
};

/// Largest frame body a client may send: the longest string field plus
/// room for the packet id, its length prefix and the fixed-size fields of
/// the biggest packet.
pub const MAX_SERVERBOUND_FRAME_LEN: usize = LONGEST_STRING + 64;

/// Block-dig status meaning "finished digging".
pub const DIG_FINISHED: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Serverbound {
    Handshake {
        protocol_version: i32,
        address: String,
        port: u16,
        next_state: i32,
    },
    StatusRequest,
    Ping {
        payload: i64,
    },
    LoginStart {
        username: String,
    },
    ChatMessage {
        message: String,
    },
    KeepAlive {
        id: i64,
    },
    PositionAndRotation {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    BlockDig {
        status: u8,
        pos: BlockPos,
    },
    HeldItemChange {
        slot: i16,
    },
    BlockPlace {
        pos: BlockPos,
        face: i32,
    },
}

impl Serverbound {
    /// Decode packet `id` with `payload` in `state`.
    ///
    /// An id that is not defined for the state, a field that fails to
    /// decode, or bytes left over after the last field are all errors.
    pub fn decode(state: ProtocolState, id: i32, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let packet = match (state, id) {
            (ProtocolState::Handshake, handshake::HANDSHAKE) => Self::Handshake {
                protocol_version: r.read_varint()?,
                address: r.read_string("server address", MAX_ADDRESS_LEN)?,
                port: r.read_u16()?,
                next_state: r.read_varint()?,
            },
            (ProtocolState::Status, status::REQUEST) => Self::StatusRequest,
            (ProtocolState::Status, status::PING) => Self::Ping {
                payload: r.read_i64()?,
            },
            (ProtocolState::Login, login::START) => Self::LoginStart {
                username: r.read_string("username", MAX_USERNAME_LEN)?,
            },
            (ProtocolState::Play, play_in::CHAT_MESSAGE) => Self::ChatMessage {
                message: r.read_string("chat message", MAX_CHAT_LEN)?,
            },
            (ProtocolState::Play, play_in::KEEP_ALIVE) => Self::KeepAlive { id: r.read_i64()? },
            (ProtocolState::Play, play_in::POSITION_AND_ROTATION) => Self::PositionAndRotation {
                x: r.read_f64()?,
                y: r.read_f64()?,
                z: r.read_f64()?,
                yaw: r.read_f32()?,
                pitch: r.read_f32()?,
                on_ground: r.read_bool()?,
            },
            (ProtocolState::Play, play_in::BLOCK_DIG) => {
                let status = r.read_u8()?;
                let x = r.read_i32()?;
                let y = r.read_u8()?;
                let z = r.read_i32()?;
                Self::BlockDig {
                    status,
                    pos: BlockPos::new(x, i32::from(y), z),
                }
            }
            (ProtocolState::Play, play_in::HELD_ITEM_CHANGE) => Self::HeldItemChange {
                slot: r.read_i16()?,
            },
            (ProtocolState::Play, play_in::BLOCK_PLACE) => Self::BlockPlace {
                pos: r.read_position()?,
                face: r.read_varint()?,
            },
            (state, id) => return Err(ProtocolError::UnexpectedPacket { state, id }),
        };
        if !r.is_empty() {
            return Err(ProtocolError::TrailingBytes {
                id,
                remaining: r.remaining(),
            });
        }
        Ok(packet)
    }
}
