//! Server health metrics
//!
//! Rolling sample buffers plus running counters, shared between the
//! engine task, the CPU sampler, and the health endpoint. Pull-based:
//! `report()` recomputes everything from current buffer contents and
//! has no side effects.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::util::time::{uptime_secs, uptime_secs_f64};

/// Ring buffer capacity; at one sample per tick at 20 Hz this holds the
/// last ~15 seconds, at one per second the last five minutes
const SAMPLE_CAP: usize = 300;

/// Bounded rolling sample buffer
#[derive(Debug)]
pub struct RingBuffer {
    samples: VecDeque<f64>,
    cap: usize,
}

impl RingBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// 95th percentile of the current contents, 0 when empty
    pub fn p95(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Shared metric state
pub struct Metrics {
    tick_drift_ms: Mutex<RingBuffer>,
    snapshot_bytes: Mutex<RingBuffer>,
    cpu_percent: Mutex<RingBuffer>,

    inputs_accepted: AtomicU64,
    inputs_dropped: AtomicU64,
    snapshots_sent: AtomicU64,

    /// Cumulative process CPU time in millis, set by the sampler
    cpu_millis_total: AtomicU64,
    /// Resident set size in bytes, set by the sampler
    rss_bytes: AtomicU64,

    rooms: AtomicUsize,
    players: AtomicUsize,
    capacity: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tick_drift_ms: Mutex::new(RingBuffer::new(SAMPLE_CAP)),
            snapshot_bytes: Mutex::new(RingBuffer::new(SAMPLE_CAP)),
            cpu_percent: Mutex::new(RingBuffer::new(SAMPLE_CAP)),
            inputs_accepted: AtomicU64::new(0),
            inputs_dropped: AtomicU64::new(0),
            snapshots_sent: AtomicU64::new(0),
            cpu_millis_total: AtomicU64::new(0),
            rss_bytes: AtomicU64::new(0),
            rooms: AtomicUsize::new(0),
            players: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
        })
    }

    pub fn record_tick_drift(&self, drift_ms: f64) {
        self.tick_drift_ms.lock().push(drift_ms);
    }

    pub fn record_snapshot_bytes(&self, bytes: usize) {
        self.snapshot_bytes.lock().push(bytes as f64);
        self.snapshots_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cpu_percent(&self, percent: f64, cpu_millis_total: u64) {
        self.cpu_percent.lock().push(percent);
        self.cpu_millis_total.store(cpu_millis_total, Ordering::Relaxed);
    }

    pub fn set_rss_bytes(&self, bytes: u64) {
        self.rss_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn input_accepted(&self) {
        self.inputs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn input_dropped(&self) {
        self.inputs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inputs_dropped(&self) -> u64 {
        self.inputs_dropped.load(Ordering::Relaxed)
    }

    pub fn set_world_gauges(&self, rooms: usize, players: usize, capacity: usize) {
        self.rooms.store(rooms, Ordering::Relaxed);
        self.players.store(players, Ordering::Relaxed);
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn rooms(&self) -> usize {
        self.rooms.load(Ordering::Relaxed)
    }

    pub fn players(&self) -> usize {
        self.players.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Snapshot every aggregate into a serializable report.
    /// `avg_rtt_ms` comes from the connection table since RTT is
    /// per-connection state.
    pub fn report(&self, avg_rtt_ms: Option<f64>) -> MetricsReport {
        let accepted = self.inputs_accepted.load(Ordering::Relaxed);
        let dropped = self.inputs_dropped.load(Ordering::Relaxed);
        let total = accepted + dropped;
        let drop_rate = if total > 0 {
            dropped as f64 / total as f64
        } else {
            0.0
        };

        let uptime = uptime_secs_f64();
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let cpu_millis = self.cpu_millis_total.load(Ordering::Relaxed);
        let avg_cpu_percent = if uptime > 0.0 {
            (cpu_millis as f64 / 1000.0) / (uptime * cores as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            tick_drift_p95_ms: self.tick_drift_ms.lock().p95(),
            snapshot_bytes_p95: self.snapshot_bytes.lock().p95(),
            cpu_p95_percent: self.cpu_percent.lock().p95(),
            avg_cpu_percent,
            inputs_accepted: accepted,
            inputs_dropped: dropped,
            input_drop_rate: drop_rate,
            snapshots_sent: self.snapshots_sent.load(Ordering::Relaxed),
            avg_rtt_ms,
            rss_bytes: self.rss_bytes.load(Ordering::Relaxed),
            uptime_secs: uptime_secs(),
        }
    }
}

/// The metrics object of the health document
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub tick_drift_p95_ms: f64,
    pub snapshot_bytes_p95: f64,
    pub cpu_p95_percent: f64,
    pub avg_cpu_percent: f64,
    pub inputs_accepted: u64,
    pub inputs_dropped: u64,
    pub input_drop_rate: f64,
    pub snapshots_sent: u64,
    pub avg_rtt_ms: Option<f64>,
    pub rss_bytes: u64,
    pub uptime_secs: u64,
}

/// Periodically sample process CPU time and resident memory.
/// Linux-only source (/proc); elsewhere the gauges stay at zero.
pub async fn run_resource_sampler(metrics: Arc<Metrics>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut last_cpu_millis: Option<u64> = None;
    let mut last_sampled = std::time::Instant::now();

    loop {
        interval.tick().await;
        let elapsed = last_sampled.elapsed();
        last_sampled = std::time::Instant::now();

        if let Some(cpu_millis) = read_proc_cpu_millis() {
            if let Some(prev) = last_cpu_millis {
                let delta = cpu_millis.saturating_sub(prev) as f64;
                let window_ms = elapsed.as_secs_f64() * 1000.0;
                if window_ms > 0.0 {
                    let percent = delta / window_ms / cores as f64 * 100.0;
                    metrics.record_cpu_percent(percent, cpu_millis);
                }
            }
            last_cpu_millis = Some(cpu_millis);
        }

        if let Some(rss) = read_proc_rss_bytes() {
            metrics.set_rss_bytes(rss);
        }
    }
}

/// Cumulative user+system CPU time of this process in milliseconds,
/// from /proc/self/stat (assumes the common USER_HZ=100)
fn read_proc_cpu_millis() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Field 2 (comm) may contain spaces; everything after the closing
    // paren is whitespace-separated. utime/stime are fields 14 and 15
    // overall, so 12 and 13 relative to the tail.
    let tail = stat.rsplit_once(')').map(|(_, t)| t)?;
    let fields: Vec<&str> = tail.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some((utime + stime) * 10)
}

/// Resident set size in bytes from /proc/self/statm
fn read_proc_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096u64;
    let bytes = rss_pages * page_size;
    debug!(rss_bytes = bytes, "sampled resident memory");
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_is_bounded() {
        let mut rb = RingBuffer::new(3);
        for i in 0..10 {
            rb.push(i as f64);
        }
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.p95(), 9.0);
    }

    #[test]
    fn p95_of_uniform_samples() {
        let mut rb = RingBuffer::new(100);
        for i in 1..=100 {
            rb.push(i as f64);
        }
        assert_eq!(rb.p95(), 95.0);
    }

    #[test]
    fn p95_of_empty_buffer_is_zero() {
        let rb = RingBuffer::new(10);
        assert_eq!(rb.p95(), 0.0);
    }

    #[test]
    fn drop_rate_accounts_both_counters() {
        let m = Metrics::new();
        for _ in 0..95 {
            m.input_accepted();
        }
        for _ in 0..5 {
            m.input_dropped();
        }
        let report = m.report(None);
        assert_eq!(report.inputs_accepted, 95);
        assert_eq!(report.inputs_dropped, 5);
        assert!((report.input_drop_rate - 0.05).abs() < 1e-9);
    }

    #[test]
    fn report_has_no_side_effects() {
        let m = Metrics::new();
        m.record_tick_drift(1.0);
        m.record_snapshot_bytes(256);
        let a = m.report(Some(40.0));
        let b = m.report(Some(40.0));
        assert_eq!(a.snapshots_sent, b.snapshots_sent);
        assert_eq!(a.tick_drift_p95_ms, b.tick_drift_p95_ms);
    }
}
