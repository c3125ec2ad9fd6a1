//! Per-viewer delta snapshots with area-of-interest culling
//!
//! Each viewer owns a cache of the last state it was sent for every
//! entity it can see (itself included). A tick's payload carries only
//! entities whose quantized state moved past the change thresholds, or
//! whose cache entry aged past the heartbeat, plus a one-time `gone`
//! notice for entities that left the viewer's area of interest. An
//! empty payload is not sent at all.
//!
//! Worst case this is O(players^2) per tick across a room (every viewer
//! scans every other player); `max_peers_per_client` bounds payload
//! size, not scan cost, so room sizes beyond tens of players need a
//! smarter broad phase.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::config::SimConfig;
use crate::util::num::yaw_delta;
use crate::ws::protocol::{PeerEntry, SelfEntry, ServerMsg};

use super::room::{ConnId, Player, PlayerState, Room};

/// Last state sent to one viewer for one entity
#[derive(Debug, Clone)]
struct CacheEntry {
    state: PlayerState,
    name: String,
    last_sent_at: u64,
}

/// Per-viewer snapshot cache, owned by the viewer's session entry
#[derive(Debug, Default)]
pub struct ViewerCache {
    entries: HashMap<ConnId, CacheEntry>,
}

impl ViewerCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Did the quantized state move past any change threshold?
fn state_changed(prev: &PlayerState, next: &PlayerState, cfg: &SimConfig) -> bool {
    let dx = next.x - prev.x;
    let dy = next.y - prev.y;
    let dz = next.z - prev.z;
    dx * dx + dy * dy + dz * dz >= cfg.min_move_sq
        || yaw_delta(next.yaw, prev.yaw).abs() >= cfg.min_yaw_delta
        || (next.pitch - prev.pitch).abs() >= cfg.min_pitch_delta
}

fn dist_sq(a: &PlayerState, b: &PlayerState) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

/// The in-radius peers nearest to the viewer, at most
/// `max_peers_per_client` of them, ascending by distance
pub fn collect_visible_peers<'a>(viewer: &Player, room: &'a Room, cfg: &SimConfig) -> Vec<&'a Player> {
    let radius_sq = cfg.aoi_radius * cfg.aoi_radius;
    let mut peers: Vec<(f32, &Player)> = room
        .players
        .values()
        .filter(|p| p.id != viewer.id)
        .filter_map(|p| {
            let d = dist_sq(&viewer.state, &p.state);
            (d <= radius_sq).then_some((d, p))
        })
        .collect();
    peers.sort_by(|a, b| a.0.total_cmp(&b.0));
    peers.truncate(cfg.max_peers_per_client);
    peers.into_iter().map(|(_, p)| p).collect()
}

/// Build one viewer's delta for this tick, or None when there is
/// nothing worth sending
pub fn build_snapshot(
    viewer: &Player,
    room: &Room,
    cache: &mut ViewerCache,
    cfg: &SimConfig,
    now: u64,
    tick: u64,
) -> Option<ServerMsg> {
    let visible = collect_visible_peers(viewer, room, cfg);

    let mut visible_ids: HashSet<ConnId> = HashSet::with_capacity(visible.len() + 1);
    visible_ids.insert(viewer.id);

    let mut players = Vec::new();
    for peer in visible {
        visible_ids.insert(peer.id);
        let include = match cache.entries.get(&peer.id) {
            Some(entry) => {
                let name_changed = entry.name != peer.name;
                let heartbeat_due = now.saturating_sub(entry.last_sent_at) >= cfg.heartbeat_ms;
                if state_changed(&entry.state, &peer.state, cfg) || name_changed || heartbeat_due {
                    Some(name_changed)
                } else {
                    None
                }
            }
            // New to this viewer: always included, with its name.
            None => Some(true),
        };

        if let Some(send_name) = include {
            players.push(PeerEntry {
                id: peer.id,
                s: peer.state.wire(),
                n: send_name.then(|| peer.name.clone()),
            });
            cache.entries.insert(
                peer.id,
                CacheEntry {
                    state: peer.state,
                    name: peer.name.clone(),
                    last_sent_at: now,
                },
            );
        }
    }

    let self_due = match cache.entries.get(&viewer.id) {
        Some(entry) => {
            state_changed(&entry.state, &viewer.state, cfg)
                || now.saturating_sub(entry.last_sent_at) >= cfg.heartbeat_ms
        }
        None => true,
    };
    let self_ = self_due.then(|| {
        cache.entries.insert(
            viewer.id,
            CacheEntry {
                state: viewer.state,
                name: viewer.name.clone(),
                last_sent_at: now,
            },
        );
        SelfEntry {
            s: viewer.state.wire(),
            seq: viewer.last_processed_input_seq,
        }
    });

    // Entities that dropped out of the visible set are purged and
    // reported exactly once.
    let gone: Vec<Uuid> = cache
        .entries
        .keys()
        .filter(|id| !visible_ids.contains(id))
        .copied()
        .collect();
    for id in &gone {
        cache.entries.remove(id);
    }

    if self_.is_none() && players.is_empty() && gone.is_empty() {
        return None;
    }

    Some(ServerMsg::Snapshot {
        t: now,
        seq: tick,
        self_,
        players,
        gone,
    })
}
