//! Fixed-capacity registry of connected players.
//!
//! Every accepted connection claims a slot; the slot index is the player's
//! entity id for as long as the slot is occupied. Joining and leaving take
//! the exclusive lock, everything else (broadcast, lookups) shares it.
//!
//! Uses `std::sync::RwLock` because every operation is brief (no awaits and
//! no socket I/O while the lock is held) and the access pattern is
//! read-heavy. Outbound packets go through each player's bounded queue, so
//! sending under the shared lock never blocks.
//!
//! Lock order: registry before chunk store, never the reverse.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use thiserror::Error;
use uuid::Uuid;

use lowcraft_engine::world::position::BlockPos;

use crate::net::connection::ConnectionHandle;
use crate::protocol::ProtocolState;
use crate::protocol::clientbound::Clientbound;

pub const INVENTORY_SLOTS: usize = 36;
pub const HOTBAR_SLOTS: i16 = 9;
pub const MAX_HEALTH: f32 = 20.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("server is full ({0} players)")]
    Full(usize),

    #[error("{0} is already connected")]
    NameTaken(String),

    #[error("no player in slot {0}")]
    NoSuchPlayer(i32),
}

/// Position and orientation as last reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl Pose {
    /// Standing in the middle of the spawn block.
    pub fn at_spawn(spawn: BlockPos) -> Self {
        Self {
            x: f64::from(spawn.x) + 0.5,
            y: f64::from(spawn.y),
            z: f64::from(spawn.z) + 0.5,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: true,
        }
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// What one player's client currently knows about other entities: each
/// visible entity id and the position that client last saw it at.
#[derive(Debug, Default)]
pub struct Tracking {
    pub known: HashMap<i32, [f64; 3]>,
}

impl Tracking {
    pub fn sees(&self, entity_id: i32) -> bool {
        self.known.contains_key(&entity_id)
    }
}

#[derive(Debug)]
pub struct Player {
    pub entity_id: i32,
    pub username: String,
    pub uuid: Uuid,
    pub pose: Pose,
    pub health: f32,
    pub experience: f32,
    pub level: i32,
    /// Item ids, 0 = empty.
    pub inventory: [u16; INVENTORY_SLOTS],
    pub selected_slot: u8,
    pub joined_at_ms: u64,
    pub last_keep_alive_ms: u64,
    /// Fully logged in and eligible for broadcast.
    pub ready: bool,
    pub state: ProtocolState,
    pub conn: ConnectionHandle,
    // Only the viewer's own entry is locked at a time, so broadcast can run
    // under the registry's shared lock.
    tracking: Mutex<Tracking>,
}

impl Player {
    fn new(entity_id: i32, conn: ConnectionHandle, now_ms: u64) -> Self {
        Self {
            entity_id,
            username: String::new(),
            uuid: Uuid::nil(),
            pose: Pose::default(),
            health: MAX_HEALTH,
            experience: 0.0,
            level: 0,
            inventory: [0; INVENTORY_SLOTS],
            selected_slot: 0,
            joined_at_ms: now_ms,
            last_keep_alive_ms: now_ms,
            ready: false,
            state: ProtocolState::Handshake,
            conn,
            tracking: Mutex::new(Tracking::default()),
        }
    }

    /// Offline-mode UUID: version 3 of `"OfflinePlayer:<name>"`.
    pub fn offline_uuid(name: &str) -> Uuid {
        Uuid::new_v3(&Uuid::NAMESPACE_URL, format!("OfflinePlayer:{name}").as_bytes())
    }

    pub fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().expect("player tracking poisoned")
    }

    pub fn set_health(&mut self, health: f32) {
        self.health = health.clamp(0.0, MAX_HEALTH);
        if self.health == 0.0 {
            tracing::info!("{} died", self.username);
        }
    }

    /// Put `item` in the first empty slot. Returns the slot, or `None` when
    /// the inventory is full.
    pub fn give_item(&mut self, item: u16) -> Option<usize> {
        let slot = self.inventory.iter().position(|&s| s == 0)?;
        self.inventory[slot] = item;
        Some(slot)
    }
}

#[derive(Debug)]
pub enum Slot {
    Empty,
    Occupied(Box<Player>),
}

impl Slot {
    pub fn player(&self) -> Option<&Player> {
        match self {
            Slot::Occupied(p) => Some(p),
            Slot::Empty => None,
        }
    }
}

/// Shared view of the registry, holding its read lock.
pub struct Players<'a> {
    slots: RwLockReadGuard<'a, Vec<Slot>>,
}

impl Players<'_> {
    /// All occupied slots, in entity id order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.slots.iter().filter_map(Slot::player)
    }

    /// Fully logged-in players.
    pub fn ready(&self) -> impl Iterator<Item = &Player> {
        self.iter().filter(|p| p.ready)
    }

    pub fn get(&self, entity_id: i32) -> Option<&Player> {
        let idx = usize::try_from(entity_id).ok()?;
        self.slots.get(idx).and_then(Slot::player)
    }
}

pub struct PlayerRegistry {
    slots: RwLock<Vec<Slot>>,
    active: AtomicUsize,
}

impl PlayerRegistry {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Empty);
        Self {
            slots: RwLock::new(slots),
            active: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.read().slots.len()
    }

    /// Number of occupied slots.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn read(&self) -> Players<'_> {
        Players {
            slots: self.slots.read().expect("player registry poisoned"),
        }
    }

    /// Claim the first free slot for a new connection. Its index becomes
    /// the entity id.
    pub fn join(&self, conn: ConnectionHandle, now_ms: u64) -> Result<i32, RegistryError> {
        let mut slots = self.slots.write().expect("player registry poisoned");
        let Some(idx) = slots.iter().position(|s| matches!(s, Slot::Empty)) else {
            return Err(RegistryError::Full(slots.len()));
        };
        let entity_id = idx as i32;
        slots[idx] = Slot::Occupied(Box::new(Player::new(entity_id, conn, now_ms)));
        self.active.fetch_add(1, Ordering::AcqRel);
        Ok(entity_id)
    }

    /// Release a slot: close the connection, free the entity id, and tell
    /// every other ready player to despawn it. Returns the departed player.
    pub fn leave(&self, entity_id: i32) -> Option<Box<Player>> {
        let idx = usize::try_from(entity_id).ok()?;
        let mut slots = self.slots.write().expect("player registry poisoned");
        let slot = slots.get_mut(idx)?;
        let Slot::Occupied(player) = std::mem::replace(slot, Slot::Empty) else {
            return None;
        };
        self.active.fetch_sub(1, Ordering::AcqRel);
        player.conn.close();

        // A peer still finishing its login may already track the leaver
        // from its initial spawn list, so it gets the destroy too.
        let frame = match (Clientbound::DestroyEntities {
            entity_ids: &[entity_id],
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode destroy for entity {}: {}", entity_id, e);
                return Some(player);
            }
        };
        for other in slots.iter().filter_map(Slot::player) {
            let tracked = other.tracking().known.remove(&entity_id).is_some();
            if !tracked && !(player.ready && other.ready) {
                continue;
            }
            if let Err(e) = other.conn.send(frame.clone()) {
                tracing::debug!(
                    "Destroy for entity {} not delivered to {}: {}",
                    entity_id,
                    other.conn.peer(),
                    e
                );
            }
        }
        Some(player)
    }

    /// Bind a name to a connected slot and move it into play at `spawn`.
    ///
    /// Fails if another occupied slot already uses the name; the check and
    /// the update happen under one exclusive section.
    pub fn claim_name(
        &self,
        entity_id: i32,
        username: &str,
        spawn: Pose,
        now_ms: u64,
    ) -> Result<Uuid, RegistryError> {
        let mut slots = self.slots.write().expect("player registry poisoned");
        let taken = slots
            .iter()
            .filter_map(Slot::player)
            .any(|p| p.entity_id != entity_id && p.username == username);
        if taken {
            return Err(RegistryError::NameTaken(username.to_owned()));
        }
        let player = usize::try_from(entity_id)
            .ok()
            .and_then(|idx| slots.get_mut(idx))
            .and_then(|slot| match slot {
                Slot::Occupied(p) => Some(p),
                Slot::Empty => None,
            })
            .ok_or(RegistryError::NoSuchPlayer(entity_id))?;
        player.username = username.to_owned();
        player.uuid = Player::offline_uuid(username);
        player.pose = spawn;
        player.state = ProtocolState::Play;
        player.last_keep_alive_ms = now_ms;
        Ok(player.uuid)
    }

    pub fn with_player<R>(&self, entity_id: i32, f: impl FnOnce(&Player) -> R) -> Option<R> {
        self.read().get(entity_id).map(f)
    }

    pub fn with_player_mut<R>(&self, entity_id: i32, f: impl FnOnce(&mut Player) -> R) -> Option<R> {
        let idx = usize::try_from(entity_id).ok()?;
        let mut slots = self.slots.write().expect("player registry poisoned");
        match slots.get_mut(idx)? {
            Slot::Occupied(p) => Some(f(p)),
            Slot::Empty => None,
        }
    }

    pub fn find_by_name(&self, username: &str) -> Option<i32> {
        self.read()
            .iter()
            .find(|p| p.username == username)
            .map(|p| p.entity_id)
    }

    pub fn find_by_peer(&self, peer: SocketAddr) -> Option<i32> {
        self.read()
            .iter()
            .find(|p| p.conn.peer() == peer)
            .map(|p| p.entity_id)
    }

    /// Ask every connection to close with `reason`. Slots are released by
    /// the connection tasks as they wind down. Returns how many were asked.
    pub fn close_all(&self, reason: &str) -> usize {
        let players = self.read();
        let mut n = 0;
        for player in players.iter() {
            player.conn.disconnect(player.state, reason);
            n += 1;
        }
        n
    }
}
