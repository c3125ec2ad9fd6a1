//! The simulation engine: tick scheduler plus command dispatch
//!
//! One task owns the room directory and all per-connection scratch
//! state (admission window, viewer cache). Sessions talk to it through
//! `EngineCommand` over mpsc; outbound traffic leaves through the
//! connection table with try_send so the tick path never blocks. No
//! two mutations of the same room can ever race because everything
//! runs on this single control flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::util::num::{clamp_axis, clamp_pitch, finite_or, normalize_yaw};
use crate::util::time::unix_millis;
use crate::ws::conn::ConnectionTable;
use crate::ws::protocol::{frame, RoomInfo, ServerMsg};

use super::admission::InputWindow;
use super::metrics::Metrics;
use super::movement::integrate;
use super::room::{ConnId, RoomDirectory, RoomError, PERSISTENT_ROOM};
use super::snapshot::{build_snapshot, ViewerCache};
use super::InputCommand;

/// Commands from sessions into the engine. Room operations carry a
/// oneshot for their `{ok, room|error}` acknowledgement.
pub enum EngineCommand {
    /// Raw input; sanitized and admission-checked inside the engine
    Input { conn: ConnId, cmd: InputCommand },
    QuickJoin {
        conn: ConnId,
        name: String,
        ack: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },
    CreateRoom {
        conn: ConnId,
        name: String,
        ack: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },
    JoinRoom {
        conn: ConnId,
        code: String,
        name: String,
        ack: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },
    LeaveRoom { conn: ConnId },
    ClaimHost {
        conn: ConnId,
        ack: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },
    /// Implicit leave; cleanup shared with LeaveRoom
    Disconnect { conn: ConnId },
    /// Stop the tick timer and exit the task
    Shutdown,
}

/// Cloneable handle for sending commands to the engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) -> bool {
        self.tx.send(cmd).await.is_ok()
    }
}

/// Per-connection scratch owned by the engine, keyed by connection id
#[derive(Default)]
struct SessionState {
    window: InputWindow,
    cache: ViewerCache,
}

pub struct Engine {
    cfg: SimConfig,
    directory: RoomDirectory,
    sessions: HashMap<ConnId, SessionState>,
    connections: Arc<ConnectionTable>,
    metrics: Arc<Metrics>,
    rng: ChaCha8Rng,
    tick: u64,
}

impl Engine {
    pub fn new(
        cfg: SimConfig,
        connections: Arc<ConnectionTable>,
        metrics: Arc<Metrics>,
    ) -> (Self, EngineHandle, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(256);
        let engine = Self {
            directory: RoomDirectory::new(cfg.room_capacity),
            sessions: HashMap::new(),
            connections,
            metrics,
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
            tick: 0,
            cfg,
        };
        (engine, EngineHandle { tx }, rx)
    }

    /// Seeded constructor for deterministic tests
    pub fn with_seed(
        cfg: SimConfig,
        connections: Arc<ConnectionTable>,
        metrics: Arc<Metrics>,
        seed: u64,
    ) -> Self {
        let (mut engine, _, _) = Self::new(cfg, connections, metrics);
        engine.rng = ChaCha8Rng::seed_from_u64(seed);
        engine
    }

    /// Drive the fixed-rate tick loop, interleaved with command
    /// handling on the same control flow
    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineCommand>) {
        let period = self.cfg.tick_period();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Drift is diagnostic only; the schedule never catches up.
        let mut expected_next = Instant::now() + period;

        info!(tick_rate_hz = self.cfg.tick_rate_hz, "simulation engine started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let fired_at = Instant::now();
                    let drift_ms = if fired_at >= expected_next {
                        fired_at.duration_since(expected_next).as_secs_f64() * 1000.0
                    } else {
                        -(expected_next.duration_since(fired_at).as_secs_f64() * 1000.0)
                    };
                    expected_next += period;
                    self.metrics.record_tick_drift(drift_ms);
                    self.step(unix_millis());
                }
                cmd = rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => self.apply(cmd),
                }
            }
        }

        info!("simulation engine stopped");
    }

    /// One full simulation tick: per room, prune stale members, then
    /// integrate every player, then diff for every viewer. Rooms are
    /// independent units of work.
    pub fn step(&mut self, now: u64) {
        self.tick += 1;
        let dt = self.cfg.tick_dt();
        let cfg = self.cfg;

        for code in self.directory.room_codes() {
            let pruned = self
                .directory
                .prune_disconnected(&code, |id| self.connections.contains(id));
            for id in &pruned {
                self.sessions.remove(id);
            }
            if !pruned.is_empty() {
                debug!(room = %code, pruned = pruned.len(), "dropped players without connections");
                self.broadcast_room_update(&code);
            }

            let Some(room) = self.directory.room_mut(&code) else {
                continue; // pruned empty
            };
            for player in room.players.values_mut() {
                integrate(player, &cfg, now, dt);
            }

            let viewer_ids: Vec<ConnId> = room.players.keys().copied().collect();
            for id in viewer_ids {
                let Some(room) = self.directory.room(&code) else {
                    break;
                };
                let Some(viewer) = room.players.get(&id) else {
                    continue;
                };
                let Some(session) = self.sessions.get_mut(&id) else {
                    continue;
                };
                if let Some(msg) = build_snapshot(viewer, room, &mut session.cache, &cfg, now, self.tick) {
                    if let Some(frame) = frame(&msg) {
                        self.metrics.record_snapshot_bytes(frame.len());
                        self.connections.send(&id, frame);
                    }
                }
            }
        }

        self.metrics.set_world_gauges(
            self.directory.room_count(),
            self.directory.player_count(),
            self.directory.room_count() * self.cfg.room_capacity,
        );
    }

    /// Apply a single command. Public so tests can drive the engine
    /// with a virtual clock instead of the timer.
    pub fn apply(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Input { conn, cmd } => self.handle_input(conn, cmd),
            EngineCommand::QuickJoin { conn, name, ack } => {
                let result = self.join(conn, PERSISTENT_ROOM.to_string(), name);
                let _ = ack.send(result);
            }
            EngineCommand::CreateRoom { conn, name, ack } => {
                let code = self.directory.fresh_code(&mut self.rng);
                let result = self.join(conn, code, name);
                let _ = ack.send(result);
            }
            EngineCommand::JoinRoom { conn, code, name, ack } => {
                let result = self.join(conn, code, name);
                let _ = ack.send(result);
            }
            EngineCommand::LeaveRoom { conn } | EngineCommand::Disconnect { conn } => {
                self.leave(conn);
            }
            EngineCommand::ClaimHost { conn, ack } => {
                let result = self
                    .directory
                    .claim_host(conn, |id| self.connections.contains(id))
                    .map(|room| room.info());
                if let Ok(info) = &result {
                    let code = info.code.clone();
                    self.broadcast_room_update(&code);
                }
                let _ = ack.send(result);
            }
            EngineCommand::Shutdown => {} // handled by run()
        }
    }

    /// Admit, sanitize, and store an input command, acking on accept.
    /// Drops are silent toward the client and only counted.
    fn handle_input(&mut self, conn: ConnId, raw: InputCommand) {
        let now = raw.received_at;
        let Some(session) = self.sessions.get_mut(&conn) else {
            return; // not seated anywhere; nothing to drive
        };

        if session.window.should_drop(now, self.cfg.min_input_interval_ms, self.cfg.max_input_per_sec) {
            self.metrics.input_dropped();
            return;
        }

        let accepted = {
            let Some(player) = self.directory.player_mut(&conn) else {
                return;
            };
            // At-least-once ack: a replayed or out-of-order sequence
            // does not touch state but is re-acknowledged below.
            if raw.seq <= player.last_input_seq {
                false
            } else {
                let prev = player.state;
                player.pending_input = InputCommand {
                    seq: raw.seq,
                    move_x: clamp_axis(raw.move_x),
                    move_z: clamp_axis(raw.move_z),
                    yaw: normalize_yaw(finite_or(raw.yaw, prev.yaw)),
                    pitch: clamp_pitch(finite_or(raw.pitch, prev.pitch)),
                    sprint: raw.sprint,
                    jump: raw.jump,
                    received_at: now,
                };
                player.last_input_seq = raw.seq;
                true
            }
        };

        if accepted {
            self.metrics.input_accepted();
        }
        self.ack_input(conn, raw.seq, now);
    }

    fn ack_input(&self, conn: ConnId, seq: u32, t: u64) {
        if let Some(frame) = frame(&ServerMsg::AckInput { seq, t }) {
            self.connections.send(&conn, frame);
        }
    }

    fn join(&mut self, conn: ConnId, code: String, name: String) -> Result<RoomInfo, RoomError> {
        // Membership reads only count live connections.
        self.directory
            .prune_disconnected(&code, |id| self.connections.contains(id));

        let now = unix_millis();
        let info = self
            .directory
            .join_room(conn, &code, &name, now, &mut self.rng, &self.cfg)
            .map(|room| room.info())?;

        self.sessions.entry(conn).or_default();
        self.broadcast_room_update(&code);
        Ok(info)
    }

    fn leave(&mut self, conn: ConnId) {
        self.sessions.remove(&conn);
        if let Some(code) = self.directory.leave_room(conn) {
            self.broadcast_room_update(&code);
        }
    }

    /// Tell every member of a room about the current membership/host
    fn broadcast_room_update(&self, code: &str) {
        let Some(room) = self.directory.room(code) else {
            return;
        };
        let msg = ServerMsg::RoomUpdate {
            code: room.code.clone(),
            host_id: room.host_id,
            players: room.info().players,
        };
        let Some(frame) = frame(&msg) else {
            return;
        };
        for id in room.players.keys() {
            self.connections.send(id, frame.clone());
        }
    }

    /// Read-only view of the directory, for diagnostics and tests
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }
}
