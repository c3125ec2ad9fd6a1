//! Configuration module - environment variable parsing
//!
//! Every simulation knob is read through a parse-and-clamp helper: a
//! missing, malformed, or out-of-range value falls back to something
//! sane instead of failing startup.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Simulation tunables
    pub sim: SimConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            sim: SimConfig::from_env(),
        })
    }
}

/// Simulation tunables, all bounded at load
#[derive(Clone, Copy, Debug)]
pub struct SimConfig {
    /// Simulation ticks per second
    pub tick_rate_hz: u32,
    /// Pacing floor between accepted inputs per connection
    pub min_input_interval_ms: u64,
    /// Burst cap for the 1-second input window
    pub max_input_per_sec: u32,
    /// Age beyond which a pending input no longer drives movement
    pub input_stale_ms: u64,
    /// Horizontal speed while walking, world units per second
    pub walk_speed: f32,
    /// Horizontal speed while sprinting
    pub sprint_speed: f32,
    /// Vertical acceleration (negative = down)
    pub gravity: f32,
    /// Initial vertical velocity of a jump
    pub jump_force: f32,
    /// Eye height; the ground clamp snaps y to this
    pub player_height: f32,
    /// World extent; x/z are clamped to +/- this
    pub world_limit: f32,
    /// Upper y clamp
    pub ceiling: f32,
    /// Area-of-interest radius for peer visibility
    pub aoi_radius: f32,
    /// Hard cap on peers included per viewer snapshot
    pub max_peers_per_client: usize,
    /// Forced resend interval for otherwise-unchanged entities
    pub heartbeat_ms: u64,
    /// Squared positional delta below which movement is suppressed
    pub min_move_sq: f32,
    /// Yaw delta (shortest arc) below which facing changes are suppressed
    pub min_yaw_delta: f32,
    /// Pitch delta below which look changes are suppressed
    pub min_pitch_delta: f32,
    /// Seats per room
    pub room_capacity: usize,
}

impl SimConfig {
    pub fn from_env() -> Self {
        Self {
            tick_rate_hz: env_u32("TICK_RATE_HZ", 20, 1, 60),
            min_input_interval_ms: env_u64("MIN_INPUT_INTERVAL_MS", 10, 0, 1000),
            max_input_per_sec: env_u32("MAX_INPUT_PER_SEC", 40, 1, 240),
            input_stale_ms: env_u64("INPUT_STALE_MS", 250, 50, 5000),
            walk_speed: env_f32("WALK_SPEED", 8.8, 0.1, 100.0),
            sprint_speed: env_f32("SPRINT_SPEED", 14.0, 0.1, 100.0),
            gravity: env_f32("GRAVITY", -24.0, -100.0, -1.0),
            jump_force: env_f32("JUMP_FORCE", 8.5, 0.0, 50.0),
            player_height: env_f32("PLAYER_HEIGHT", 1.72, 0.5, 5.0),
            world_limit: env_f32("WORLD_LIMIT", 120.0, 8.0, 10000.0),
            ceiling: env_f32("CEILING", 200.0, 10.0, 10000.0),
            aoi_radius: env_f32("AOI_RADIUS", 64.0, 1.0, 1000.0),
            max_peers_per_client: env_u32("MAX_PEERS_PER_CLIENT", 24, 1, 128) as usize,
            heartbeat_ms: env_u64("SNAPSHOT_HEARTBEAT_MS", 2000, 250, 30000),
            min_move_sq: env_f32("MIN_MOVE_SQ", 1e-4, 0.0, 1.0),
            min_yaw_delta: env_f32("MIN_YAW_DELTA", 3e-3, 0.0, 1.0),
            min_pitch_delta: env_f32("MIN_PITCH_DELTA", 3e-3, 0.0, 1.0),
            room_capacity: env_u32("ROOM_CAPACITY", 24, 1, 128) as usize,
        }
    }

    /// Fixed integration step in seconds
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate_hz as f32
    }

    /// Tick period for the scheduler timer
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate_hz as u64)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            min_input_interval_ms: 10,
            max_input_per_sec: 40,
            input_stale_ms: 250,
            walk_speed: 8.8,
            sprint_speed: 14.0,
            gravity: -24.0,
            jump_force: 8.5,
            player_height: 1.72,
            world_limit: 120.0,
            ceiling: 200.0,
            aoi_radius: 64.0,
            max_peers_per_client: 24,
            heartbeat_ms: 2000,
            min_move_sq: 1e-4,
            min_yaw_delta: 3e-3,
            min_pitch_delta: 3e-3,
            room_capacity: 24,
        }
    }
}

fn env_u32(name: &str, default: u32, min: u32, max: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_f32(name: &str, default: f32, min: f32, max: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test because env vars are process-global and tests run in
    // parallel.
    #[test]
    fn env_parsing_clamps_and_never_panics() {
        let defaults = SimConfig::default();
        assert_eq!(SimConfig::from_env().tick_rate_hz, defaults.tick_rate_hz);

        std::env::set_var("TICK_RATE_HZ", "not-a-number");
        std::env::set_var("WALK_SPEED", "inf");
        std::env::set_var("ROOM_CAPACITY", "99999");
        let cfg = SimConfig::from_env();
        assert_eq!(cfg.tick_rate_hz, 20);
        assert!((cfg.walk_speed - 8.8).abs() < f32::EPSILON);
        assert_eq!(cfg.room_capacity, 128);
        std::env::remove_var("TICK_RATE_HZ");
        std::env::remove_var("WALK_SPEED");
        std::env::remove_var("ROOM_CAPACITY");
    }
}
