//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Movement/look intent for the current frame.
    /// Numeric fields are sanitized server-side; out-of-range values are
    /// clamped, never rejected.
    Input {
        /// Monotonically increasing per connection
        seq: u32,
        /// Strafe axis in [-1, 1]
        #[serde(default)]
        move_x: f32,
        /// Forward axis in [-1, 1]
        #[serde(default)]
        move_z: f32,
        /// Facing in radians
        #[serde(default)]
        yaw: f32,
        /// Look elevation in radians
        #[serde(default)]
        pitch: f32,
        #[serde(default)]
        sprint: bool,
        #[serde(default)]
        jump: bool,
    },

    /// Latency probe, echoed back immediately and never rate limited
    Ping { id: u32, t: u64 },

    /// Client-measured round trip, kept per connection for metrics
    Rtt { rtt_ms: f64 },

    /// Join the well-known persistent room
    QuickJoin {
        #[serde(default)]
        name: String,
    },

    /// Create a room with a fresh code and join it
    CreateRoom {
        #[serde(default)]
        name: String,
    },

    /// Join a room by code (created lazily if absent)
    JoinRoom {
        code: String,
        #[serde(default)]
        name: String,
    },

    /// Leave the current room
    LeaveRoom,

    /// Claim the host slot of the current room
    ClaimHost,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { conn_id: Uuid, server_time: u64 },

    /// Acknowledgement of an accepted input
    AckInput { seq: u32, t: u64 },

    /// Ping echo
    Pong { id: u32, t: u64 },

    /// Per-viewer delta snapshot; emitted only when non-empty
    Snapshot {
        /// Server time at emission, unix millis
        t: u64,
        /// Global tick counter
        seq: u64,
        /// Viewer's own state, present when its diff/heartbeat tripped
        #[serde(rename = "self", skip_serializing_if = "Option::is_none", default)]
        self_: Option<SelfEntry>,
        /// Changed (or heartbeat-due, or newly visible) peers
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        players: Vec<PeerEntry>,
        /// Ids that left the viewer's area of interest, reported once
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        gone: Vec<Uuid>,
    },

    /// Room membership or host change
    RoomUpdate {
        code: String,
        host_id: Option<Uuid>,
        players: Vec<RoomPlayer>,
    },

    /// Acknowledgement for room operations
    RoomAck {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        room: Option<RoomInfo>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
}

/// The viewer's own snapshot entry, tagged with the last input sequence
/// the simulation has applied so the client can reconcile prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfEntry {
    /// Quantized [x, y, z, yaw, pitch]
    pub s: [f32; 5],
    pub seq: u32,
}

/// A visible peer's snapshot entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: Uuid,
    /// Quantized [x, y, z, yaw, pitch]
    pub s: [f32; 5],
    /// Display name, present only when new to the viewer or changed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub n: Option<String>,
}

/// A seated player as serialized in room payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPlayer {
    pub id: Uuid,
    pub name: String,
    /// Quantized [x, y, z, yaw, pitch]
    pub state: [f32; 5],
}

/// Serialized room for join acks and updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub code: String,
    pub host_id: Option<Uuid>,
    pub players: Vec<RoomPlayer>,
    /// Open extension point for cosmetic subsystems (billboards, audio,
    /// paint, portals); the simulation core never reads it
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub ext: Map<String, Value>,
}

/// Serialize a message to its outbound JSON frame.
/// Returns None (and logs) on the serialization failure that should
/// never happen for these types.
pub fn frame(msg: &ServerMsg) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_parses_with_missing_fields() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"input","seq":7}"#).unwrap();
        match msg {
            ClientMsg::Input { seq, move_x, jump, .. } => {
                assert_eq!(seq, 7);
                assert_eq!(move_x, 0.0);
                assert!(!jump);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn empty_snapshot_fields_are_omitted() {
        let json = frame(&ServerMsg::Snapshot {
            t: 5,
            seq: 9,
            self_: None,
            players: Vec::new(),
            gone: Vec::new(),
        })
        .unwrap();
        assert!(!json.contains("self"));
        assert!(!json.contains("players"));
        assert!(!json.contains("gone"));
    }

    #[test]
    fn peer_entry_name_is_optional_on_the_wire() {
        let entry = PeerEntry {
            id: Uuid::nil(),
            s: [0.0, 1.72, 0.0, 0.0, 0.0],
            n: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("\"n\""));
    }
}
