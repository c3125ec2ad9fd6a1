//! Per-connection input admission control
//!
//! Two independent gates: a pacing floor between consecutive messages
//! and a burst cap over a 1-second sliding window. Drops are silent
//! toward the client; the engine counts them in metrics.

/// Sliding-window state, owned by the connection's session entry and
/// never shared
#[derive(Debug, Clone, Copy, Default)]
pub struct InputWindow {
    count: u32,
    window_start: u64,
    last_at: u64,
}

impl InputWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival at `now` (unix millis) and decide whether to
    /// drop it. The window resets once a full second has elapsed; the
    /// interval check only applies when the clock did not move
    /// backwards.
    pub fn should_drop(&mut self, now: u64, min_interval_ms: u64, max_per_sec: u32) -> bool {
        if now.saturating_sub(self.window_start) >= 1000 {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;

        let too_soon = self.last_at > 0
            && now >= self.last_at
            && now - self.last_at < min_interval_ms;
        let over_budget = self.count > max_per_sec;

        self.last_at = now;
        too_soon || over_budget
    }
}
