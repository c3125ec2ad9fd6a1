//! Numeric sanitization and quantization helpers
//!
//! Everything arriving from a client goes through these before it
//! touches authoritative state: non-finite values are replaced, ranges
//! are clamped, and angles are wrapped. Keeping the policy in named
//! functions makes the "accept anything, clamp it" behavior auditable.

use std::f32::consts::{PI, TAU};

/// Maximum pitch magnitude in radians (just short of straight up/down)
pub const PITCH_LIMIT: f32 = 1.55;

/// Replace a non-finite value with a fallback
pub fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Clamp a movement axis to [-1, 1], coercing non-finite input to 0
pub fn clamp_axis(value: f32) -> f32 {
    finite_or(value, 0.0).clamp(-1.0, 1.0)
}

/// Normalize a yaw angle to (-PI, PI]
pub fn normalize_yaw(yaw: f32) -> f32 {
    let wrapped = (yaw + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Clamp pitch to the vertical look limit
pub fn clamp_pitch(pitch: f32) -> f32 {
    pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT)
}

/// Signed shortest-arc difference between two yaw angles
pub fn yaw_delta(a: f32, b: f32) -> f32 {
    normalize_yaw(a - b)
}

/// Quantize a position coordinate to 1e-3 world units
pub fn quantize_pos(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

/// Quantize an angle to 1e-4 radians
pub fn quantize_angle(value: f32) -> f32 {
    (value * 10000.0).round() / 10000.0
}
