//! Connection table: transport-level registry of live sessions
//!
//! Maps connection ids to their outbound frame channel plus the
//! client-reported round-trip time. The engine consults it for
//! liveness (`contains`) when pruning and sends frames through it;
//! the health endpoint reads the RTT aggregate.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::game::ConnId;

/// RTT values a client may report, milliseconds
pub const RTT_MAX_MS: f64 = 5000.0;

const RTT_UNSET: u64 = u64::MAX;

/// One live connection's transport handle
pub struct ConnectionHandle {
    tx: mpsc::Sender<String>,
    /// Client-measured round trip in millis; RTT_UNSET until reported
    rtt_ms: AtomicU64,
}

/// Registry of all live connections
pub struct ConnectionTable {
    inner: DashMap<ConnId, ConnectionHandle>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn insert(&self, conn: ConnId, tx: mpsc::Sender<String>) {
        self.inner.insert(
            conn,
            ConnectionHandle {
                tx,
                rtt_ms: AtomicU64::new(RTT_UNSET),
            },
        );
    }

    pub fn remove(&self, conn: &ConnId) {
        self.inner.remove(conn);
    }

    pub fn contains(&self, conn: &ConnId) -> bool {
        self.inner.contains_key(conn)
    }

    pub fn online(&self) -> usize {
        self.inner.len()
    }

    /// Queue a frame toward a connection without blocking. A full
    /// channel means a slow client; the frame is dropped rather than
    /// stalling the caller (the tick path runs through here).
    pub fn send(&self, conn: &ConnId, frame: String) {
        if let Some(handle) = self.inner.get(conn) {
            if let Err(e) = handle.tx.try_send(frame) {
                debug!(conn_id = %conn, error = %e, "outbound frame dropped");
            }
        }
    }

    /// Store a client-reported round trip, already validated by the
    /// session layer
    pub fn set_rtt(&self, conn: &ConnId, rtt_ms: f64) {
        if let Some(handle) = self.inner.get(conn) {
            handle.rtt_ms.store(rtt_ms as u64, Ordering::Relaxed);
        }
    }

    /// Mean RTT across connections that have reported one
    pub fn avg_rtt_ms(&self) -> Option<f64> {
        let mut sum = 0u64;
        let mut n = 0u64;
        for entry in self.inner.iter() {
            let rtt = entry.value().rtt_ms.load(Ordering::Relaxed);
            if rtt != RTT_UNSET {
                sum += rtt;
                n += 1;
            }
        }
        (n > 0).then(|| sum as f64 / n as f64)
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_rtt_ignores_unreported_connections() {
        let table = ConnectionTable::new();
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        table.insert(a, tx_a);
        table.insert(b, tx_b);

        assert_eq!(table.avg_rtt_ms(), None);
        table.set_rtt(&a, 80.0);
        assert_eq!(table.avg_rtt_ms(), Some(80.0));
        table.set_rtt(&b, 40.0);
        assert_eq!(table.avg_rtt_ms(), Some(60.0));
    }

    #[test]
    fn send_to_unknown_connection_is_a_noop() {
        let table = ConnectionTable::new();
        table.send(&Uuid::new_v4(), "{}".to_string());
    }
}
