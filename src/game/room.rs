//! Room directory: membership, host election, and spawn placement

use std::collections::HashMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SimConfig;
use crate::util::num::{quantize_angle, quantize_pos};
use crate::ws::protocol::{RoomInfo, RoomPlayer};

use super::InputCommand;

/// Connection id; doubles as the player id
pub type ConnId = Uuid;

/// The well-known room that survives being empty
pub const PERSISTENT_ROOM: &str = "plaza";

/// Maximum display name length after sanitization
pub const MAX_NAME_LEN: usize = 16;

const SPAWN_CANDIDATES: usize = 48;
const SPAWN_RING_RADIUS: f32 = 6.0;
const SPAWN_RING_JITTER: f32 = 0.5;
/// Below this nearest-neighbor distance the ring is considered saturated
const SPAWN_MIN_SEPARATION: f32 = 1.5;

/// Authoritative kinematic state of one player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Radians, normalized to (-PI, PI]
    pub yaw: f32,
    /// Radians, clamped to the vertical look limit
    pub pitch: f32,
    /// Unix millis of the last integration step that produced this state
    pub updated_at: u64,
}

impl PlayerState {
    /// Round to the wire precision (position 1e-3, angles 1e-4) so
    /// diffing and transmission see identical values
    pub fn quantized(self) -> Self {
        Self {
            x: quantize_pos(self.x),
            y: quantize_pos(self.y),
            z: quantize_pos(self.z),
            yaw: quantize_angle(self.yaw),
            pitch: quantize_angle(self.pitch),
            updated_at: self.updated_at,
        }
    }

    /// Wire representation as [x, y, z, yaw, pitch]
    pub fn wire(&self) -> [f32; 5] {
        [self.x, self.y, self.z, self.yaw, self.pitch]
    }
}

/// A seated player (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: ConnId,
    pub name: String,
    pub state: PlayerState,
    pub pending_input: InputCommand,
    /// Highest input sequence accepted from this connection
    pub last_input_seq: u32,
    /// Highest input sequence the integrator has applied; monotone and
    /// never above `last_input_seq`
    pub last_processed_input_seq: u32,
    pub vertical_velocity: f32,
    pub on_ground: bool,
}

impl Player {
    fn new(id: ConnId, name: String, spawn: PlayerState, now: u64) -> Self {
        Self {
            id,
            name,
            state: spawn,
            // Seed the pending slot with the spawn facing so the first
            // tick does not snap yaw to zero.
            pending_input: InputCommand {
                yaw: spawn.yaw,
                pitch: spawn.pitch,
                received_at: now,
                ..InputCommand::default()
            },
            last_input_seq: 0,
            last_processed_input_seq: 0,
            vertical_velocity: 0.0,
            on_ground: true,
        }
    }
}

/// A room: membership plus host, nothing else. Cosmetic subsystems hang
/// their state off `ext` without the core knowing about them.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub host_id: Option<ConnId>,
    pub players: HashMap<ConnId, Player>,
    pub capacity: usize,
    pub ext: Map<String, Value>,
}

impl Room {
    fn new(code: String, capacity: usize) -> Self {
        Self {
            code,
            host_id: None,
            players: HashMap::new(),
            capacity,
            ext: Map::new(),
        }
    }

    /// Ensure the host slot points at a seated player; any seat will do
    /// when the previous host is gone
    pub fn elect_host(&mut self) -> bool {
        match self.host_id {
            Some(id) if self.players.contains_key(&id) => false,
            _ => {
                self.host_id = self.players.keys().next().copied();
                true
            }
        }
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            code: self.code.clone(),
            host_id: self.host_id,
            players: self
                .players
                .values()
                .map(|p| RoomPlayer {
                    id: p.id,
                    name: p.name.clone(),
                    state: p.state.wire(),
                })
                .collect(),
            ext: self.ext.clone(),
        }
    }
}

/// Room operation failures surfaced to the caller as structured acks
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room is full")]
    Full,
    #[error("not seated in a room")]
    NotSeated,
    #[error("not authorized")]
    NotAuthorized,
}

impl RoomError {
    /// Stable error code used in acks
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::Full => "room_full",
            RoomError::NotSeated => "not_seated",
            RoomError::NotAuthorized => "not_authorized",
        }
    }
}

/// Owns the room -> players mapping. Mutated only by join/leave/prune
/// and host election, never by tick logic.
pub struct RoomDirectory {
    rooms: HashMap<String, Room>,
    /// conn -> code of the room the connection is seated in
    seats: HashMap<ConnId, String>,
    capacity: usize,
}

impl RoomDirectory {
    pub fn new(capacity: usize) -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(
            PERSISTENT_ROOM.to_string(),
            Room::new(PERSISTENT_ROOM.to_string(), capacity),
        );
        Self {
            rooms,
            seats: HashMap::new(),
            capacity,
        }
    }

    /// Seat a connection in the room with the given code, creating the
    /// room lazily. Re-joining the same room only updates the display
    /// name; joining a different room leaves the old one first.
    pub fn join_room(
        &mut self,
        conn: ConnId,
        code: &str,
        name: &str,
        now: u64,
        rng: &mut ChaCha8Rng,
        cfg: &SimConfig,
    ) -> Result<&Room, RoomError> {
        let name = sanitize_name(name);

        if let Some(current) = self.seats.get(&conn) {
            if current == code {
                let room = self.rooms.get_mut(code).ok_or(RoomError::NotSeated)?;
                if let Some(player) = room.players.get_mut(&conn) {
                    player.name = name;
                }
                return Ok(room);
            }
            self.leave_room(conn);
        }

        let capacity = self.capacity;
        let room = self
            .rooms
            .entry(code.to_string())
            .or_insert_with(|| Room::new(code.to_string(), capacity));

        if room.players.len() >= room.capacity {
            return Err(RoomError::Full);
        }

        let occupied: Vec<(f32, f32)> = room.players.values().map(|p| (p.state.x, p.state.z)).collect();
        let (x, z) = spawn_position(&occupied, rng, cfg);
        let spawn = PlayerState {
            x,
            y: cfg.player_height,
            z,
            yaw: 0.0,
            pitch: 0.0,
            updated_at: now,
        }
        .quantized();

        room.players.insert(conn, Player::new(conn, name, spawn, now));
        room.elect_host();
        self.seats.insert(conn, code.to_string());

        info!(conn_id = %conn, room = %code, seats = room.players.len(), "player joined room");
        Ok(self.rooms.get(code).expect("room just inserted"))
    }

    /// Unseat a connection. Returns the code of the room it left, if
    /// any. Non-persistent rooms are deleted when their last player
    /// leaves.
    pub fn leave_room(&mut self, conn: ConnId) -> Option<String> {
        let code = self.seats.remove(&conn)?;
        let room = self.rooms.get_mut(&code)?;
        room.players.remove(&conn);
        room.elect_host();

        if room.players.is_empty() && code != PERSISTENT_ROOM {
            self.rooms.remove(&code);
            debug!(room = %code, "empty room deleted");
        } else {
            info!(conn_id = %conn, room = %code, "player left room");
        }
        Some(code)
    }

    /// Drop players whose connection the transport no longer knows.
    /// Defends against missed disconnect events; call before any read
    /// that depends on accurate membership. Returns the removed ids.
    pub fn prune_disconnected<F>(&mut self, code: &str, alive: F) -> Vec<ConnId>
    where
        F: Fn(&ConnId) -> bool,
    {
        let Some(room) = self.rooms.get(code) else {
            return Vec::new();
        };
        let stale: Vec<ConnId> = room.players.keys().filter(|id| !alive(id)).copied().collect();
        for id in &stale {
            self.leave_room(*id);
        }
        stale
    }

    /// Claim the host slot. Authorization: the caller must be seated,
    /// and the claim goes through only when the slot is vacant, held by
    /// a gone connection, or already the caller's. The transition
    /// itself (`reassign_host`) is unconditional.
    pub fn claim_host<F>(&mut self, conn: ConnId, alive: F) -> Result<&Room, RoomError>
    where
        F: Fn(&ConnId) -> bool,
    {
        let code = self.seats.get(&conn).ok_or(RoomError::NotSeated)?.clone();
        let room = self.rooms.get(&code).ok_or(RoomError::NotSeated)?;

        let claimable = match room.host_id {
            None => true,
            Some(host) => host == conn || !room.players.contains_key(&host) || !alive(&host),
        };
        if !claimable {
            return Err(RoomError::NotAuthorized);
        }
        Ok(self.reassign_host(&code, conn))
    }

    /// Unconditionally hand the host slot to a connection
    pub fn reassign_host(&mut self, code: &str, conn: ConnId) -> &Room {
        let room = self.rooms.get_mut(code).expect("reassign on known room");
        room.host_id = Some(conn);
        room.elect_host();
        self.rooms.get(code).expect("room exists")
    }

    /// Mint an unused room code
    pub fn fresh_code(&self, rng: &mut ChaCha8Rng) -> String {
        // Skip look-alike characters so codes survive being read aloud.
        const ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";
        loop {
            let code: String = (0..5)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn room_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn room_of(&self, conn: &ConnId) -> Option<&str> {
        self.seats.get(conn).map(String::as_str)
    }

    pub fn player_mut(&mut self, conn: &ConnId) -> Option<&mut Player> {
        let code = self.seats.get(conn)?;
        self.rooms.get_mut(code)?.players.get_mut(conn)
    }

    pub fn room_codes(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.seats.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Trim, strip control characters, cap the length; empty falls back to
/// a default handle
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        "wizard".to_string()
    } else {
        cleaned
    }
}

/// Greedy farthest-point spawn placement on a jittered ring.
/// Bounded cost: O(SPAWN_CANDIDATES * players). Falls back to a
/// randomized wide-band point when the ring is saturated instead of
/// failing the join. Returns (x, z).
pub fn spawn_position(occupied: &[(f32, f32)], rng: &mut ChaCha8Rng, cfg: &SimConfig) -> (f32, f32) {
    if occupied.is_empty() {
        return (0.0, 0.0);
    }

    let mut best = (0.0_f32, 0.0_f32);
    let mut best_min_sq = f32::MIN;

    for i in 0..SPAWN_CANDIDATES {
        let angle = (i as f32 / SPAWN_CANDIDATES as f32) * std::f32::consts::TAU;
        let radius = SPAWN_RING_RADIUS + rng.gen_range(-SPAWN_RING_JITTER..SPAWN_RING_JITTER);
        let x = angle.cos() * radius;
        let z = angle.sin() * radius;

        let min_sq = occupied
            .iter()
            .map(|(ox, oz)| {
                let dx = x - ox;
                let dz = z - oz;
                dx * dx + dz * dz
            })
            .fold(f32::MAX, f32::min);

        if min_sq > best_min_sq {
            best_min_sq = min_sq;
            best = (x, z);
        }
    }

    if best_min_sq < SPAWN_MIN_SEPARATION * SPAWN_MIN_SEPARATION {
        // Ring saturated; scatter into a wider band instead.
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let radius = rng.gen_range(SPAWN_RING_RADIUS * 0.5..SPAWN_RING_RADIUS * 2.5);
        let jitter = rng.gen_range(-SPAWN_RING_JITTER..SPAWN_RING_JITTER);
        best = (angle.cos() * radius + jitter, angle.sin() * radius + jitter);
    }

    let limit = cfg.world_limit;
    (best.0.clamp(-limit, limit), best.1.clamp(-limit, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn directory() -> RoomDirectory {
        RoomDirectory::new(4)
    }

    #[test]
    fn join_seats_player_and_elects_host() {
        let cfg = SimConfig::default();
        let mut dir = directory();
        let mut rng = rng();
        let a = Uuid::new_v4();

        let room = dir.join_room(a, PERSISTENT_ROOM, "Alice", 1000, &mut rng, &cfg).unwrap();
        assert_eq!(room.host_id, Some(a));
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.players[&a].state.y, cfg.player_height);
    }

    #[test]
    fn rejoin_same_room_only_renames() {
        let cfg = SimConfig::default();
        let mut dir = directory();
        let mut rng = rng();
        let a = Uuid::new_v4();

        dir.join_room(a, PERSISTENT_ROOM, "Alice", 1000, &mut rng, &cfg).unwrap();
        let before = dir.room(PERSISTENT_ROOM).unwrap().players[&a].state;
        let room = dir.join_room(a, PERSISTENT_ROOM, "Alicia", 2000, &mut rng, &cfg).unwrap();
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.players[&a].name, "Alicia");
        assert_eq!(room.players[&a].state, before);
    }

    #[test]
    fn full_room_rejects() {
        let cfg = SimConfig::default();
        let mut dir = directory();
        let mut rng = rng();
        for _ in 0..4 {
            dir.join_room(Uuid::new_v4(), "abc", "p", 0, &mut rng, &cfg).unwrap();
        }
        let err = dir.join_room(Uuid::new_v4(), "abc", "late", 0, &mut rng, &cfg).unwrap_err();
        assert_eq!(err, RoomError::Full);
    }

    #[test]
    fn last_leave_deletes_room_but_not_plaza() {
        let cfg = SimConfig::default();
        let mut dir = directory();
        let mut rng = rng();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        dir.join_room(a, "abc", "a", 0, &mut rng, &cfg).unwrap();
        dir.leave_room(a);
        assert!(dir.room("abc").is_none());

        dir.join_room(b, PERSISTENT_ROOM, "b", 0, &mut rng, &cfg).unwrap();
        dir.leave_room(b);
        assert!(dir.room(PERSISTENT_ROOM).is_some());
    }

    #[test]
    fn host_reelected_when_host_leaves() {
        let cfg = SimConfig::default();
        let mut dir = directory();
        let mut rng = rng();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        dir.join_room(a, "abc", "a", 0, &mut rng, &cfg).unwrap();
        dir.join_room(b, "abc", "b", 0, &mut rng, &cfg).unwrap();
        assert_eq!(dir.room("abc").unwrap().host_id, Some(a));
        dir.leave_room(a);
        assert_eq!(dir.room("abc").unwrap().host_id, Some(b));
    }

    #[test]
    fn claim_host_requires_vacant_or_stale_slot() {
        let cfg = SimConfig::default();
        let mut dir = directory();
        let mut rng = rng();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        dir.join_room(a, "abc", "a", 0, &mut rng, &cfg).unwrap();
        dir.join_room(b, "abc", "b", 0, &mut rng, &cfg).unwrap();

        // Host connection still alive: denied.
        assert_eq!(dir.claim_host(b, |_| true).unwrap_err(), RoomError::NotAuthorized);
        // Host connection gone: allowed.
        let room = dir.claim_host(b, |id| *id != a).unwrap();
        assert_eq!(room.host_id, Some(b));
    }

    #[test]
    fn prune_removes_players_without_connections() {
        let cfg = SimConfig::default();
        let mut dir = directory();
        let mut rng = rng();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        dir.join_room(a, PERSISTENT_ROOM, "a", 0, &mut rng, &cfg).unwrap();
        dir.join_room(b, PERSISTENT_ROOM, "b", 0, &mut rng, &cfg).unwrap();

        let removed = dir.prune_disconnected(PERSISTENT_ROOM, |id| *id == b);
        assert_eq!(removed, vec![a]);
        assert_eq!(dir.room(PERSISTENT_ROOM).unwrap().players.len(), 1);
        assert_eq!(dir.room(PERSISTENT_ROOM).unwrap().host_id, Some(b));
    }

    #[test]
    fn sanitize_name_strips_and_caps() {
        assert_eq!(sanitize_name("  Gandalf\u{7}  "), "Gandalf");
        assert_eq!(sanitize_name(""), "wizard");
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz").len(), MAX_NAME_LEN);
    }

    #[test]
    fn spawn_separation_beats_most_ring_candidates() {
        // Ten players clustered within 5 units of the ring center; the
        // chosen spawn's nearest-neighbor distance should be at least
        // that of 80% of the sampled candidates.
        let cfg = SimConfig::default();
        let mut rng = rng();
        let occupied: Vec<(f32, f32)> = (0..10)
            .map(|_| (rng.gen_range(-2.5..2.5), rng.gen_range(-2.5..2.5)))
            .collect();

        let nearest_sq = |x: f32, z: f32| {
            occupied
                .iter()
                .map(|(ox, oz)| (x - ox).powi(2) + (z - oz).powi(2))
                .fold(f32::MAX, f32::min)
        };

        let (sx, sz) = spawn_position(&occupied, &mut rng.clone(), &cfg);
        let chosen = nearest_sq(sx, sz);

        let beaten = (0..SPAWN_CANDIDATES)
            .filter(|i| {
                let angle = (*i as f32 / SPAWN_CANDIDATES as f32) * std::f32::consts::TAU;
                let x = angle.cos() * SPAWN_RING_RADIUS;
                let z = angle.sin() * SPAWN_RING_RADIUS;
                chosen >= nearest_sq(x, z)
            })
            .count();
        assert!(beaten * 10 >= SPAWN_CANDIDATES * 8, "beat only {} of {}", beaten, SPAWN_CANDIDATES);
    }

    #[test]
    fn spawn_with_no_players_is_ring_center() {
        let cfg = SimConfig::default();
        let mut rng = rng();
        assert_eq!(spawn_position(&[], &mut rng, &cfg), (0.0, 0.0));
    }

    #[test]
    fn fresh_codes_are_unique_and_lowercase() {
        let dir = directory();
        let mut rng = rng();
        let code = dir.fresh_code(&mut rng);
        assert_eq!(code.len(), 5);
        assert!(code.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(code, PERSISTENT_ROOM);
    }
}
