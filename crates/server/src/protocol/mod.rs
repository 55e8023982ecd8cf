//! Per-connection protocol: packet definitions and the state machine.

pub mod clientbound;
pub mod handler;
pub mod serverbound;

use thiserror::Error;

use lowcraft_engine::world::StoreError;

use crate::codec::CodecError;
use crate::net::connection::ConnectionError;

/// Connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Handshake,
    Status,
    Login,
    Play,
}

impl ProtocolState {
    /// State requested by a handshake `next_state` field.
    pub fn from_next_state(v: i32) -> Option<Self> {
        match v {
            1 => Some(Self::Status),
            2 => Some(Self::Login),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Handshake => "handshake",
            Self::Status => "status",
            Self::Login => "login",
            Self::Play => "play",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("unexpected packet 0x{id:02X} in {state} state")]
    UnexpectedPacket { state: ProtocolState, id: i32 },

    #[error("invalid handshake next state {0}")]
    InvalidNextState(i32),

    #[error("packet 0x{id:02X} has {remaining} trailing bytes")]
    TrailingBytes { id: i32, remaining: usize },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Packet ids, grouped by state and direction.
pub mod ids {
    pub mod handshake {
        pub const HANDSHAKE: i32 = 0x00;
    }

    pub mod status {
        pub const REQUEST: i32 = 0x00;
        pub const PING: i32 = 0x01;
        pub const RESPONSE: i32 = 0x00;
        pub const PONG: i32 = 0x01;
    }

    pub mod login {
        pub const START: i32 = 0x00;
        pub const DISCONNECT: i32 = 0x00;
        pub const SUCCESS: i32 = 0x02;
    }

    /// Serverbound play packets.
    pub mod play_in {
        pub const CHAT_MESSAGE: i32 = 0x06;
        pub const KEEP_ALIVE: i32 = 0x1A;
        pub const POSITION_AND_ROTATION: i32 = 0x1D;
        pub const BLOCK_DIG: i32 = 0x27;
        pub const HELD_ITEM_CHANGE: i32 = 0x33;
        pub const BLOCK_PLACE: i32 = 0x3E;
    }

    /// Clientbound play packets.
    pub mod play_out {
        pub const SPAWN_PLAYER: i32 = 0x01;
        pub const BLOCK_CHANGE: i32 = 0x08;
        pub const DISCONNECT: i32 = 0x1C;
        pub const KEEP_ALIVE: i32 = 0x26;
        pub const CHUNK_DATA: i32 = 0x27;
        pub const ENTITY_POSITION: i32 = 0x2E;
        pub const POSITION_AND_LOOK: i32 = 0x41;
        pub const DESTROY_ENTITIES: i32 = 0x46;
        pub const SPAWN_POSITION: i32 = 0x5A;
    }
}
