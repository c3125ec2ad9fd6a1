//! Per-tick movement integration
//!
//! Explicit Euler at a fixed small dt against a flat ground plane.
//! Horizontal intent comes from the player's pending input and decays
//! to zero once the input stream goes stale, so a silently-dead
//! connection stops walking instead of running into the distance.

use crate::config::SimConfig;

use super::room::{Player, PlayerState};

/// Advance one player by one fixed step. `now` is unix millis, `dt`
/// the fixed step in seconds.
pub fn integrate(player: &mut Player, cfg: &SimConfig, now: u64, dt: f32) {
    let input = player.pending_input;
    let fresh = now.saturating_sub(input.received_at) <= cfg.input_stale_ms;

    // Facing always follows the last accepted input, even when stale.
    let yaw = input.yaw;
    let pitch = input.pitch;

    let (mut mx, mut mz) = if fresh {
        (input.move_x, input.move_z)
    } else {
        (0.0, 0.0)
    };
    let len_sq = mx * mx + mz * mz;
    if len_sq > 1.0 {
        let inv = len_sq.sqrt().recip();
        mx *= inv;
        mz *= inv;
    }

    let speed = if fresh && input.sprint {
        cfg.sprint_speed
    } else {
        cfg.walk_speed
    };

    // Rotate intent into world space: forward = (-sin yaw, -cos yaw),
    // right = (cos yaw, -sin yaw).
    let (sin_yaw, cos_yaw) = (yaw.sin(), yaw.cos());
    let dir_x = mx * cos_yaw - mz * sin_yaw;
    let dir_z = -mx * sin_yaw - mz * cos_yaw;

    let limit = cfg.world_limit;
    let x = (player.state.x + dir_x * speed * dt).clamp(-limit, limit);
    let z = (player.state.z + dir_z * speed * dt).clamp(-limit, limit);

    if input.jump && player.on_ground {
        player.vertical_velocity = cfg.jump_force;
        player.on_ground = false;
    }
    player.vertical_velocity += cfg.gravity * dt;
    let mut y = player.state.y + player.vertical_velocity * dt;
    if y <= cfg.player_height {
        y = cfg.player_height;
        player.vertical_velocity = 0.0;
        player.on_ground = true;
    }
    y = y.min(cfg.ceiling);

    // The jump edge fires once per accepted input.
    player.pending_input.jump = false;
    player.last_processed_input_seq = player.last_processed_input_seq.max(input.seq);

    player.state = PlayerState {
        x,
        y,
        z,
        yaw,
        pitch,
        updated_at: now,
    }
    .quantized();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::InputCommand;
    use uuid::Uuid;

    fn grounded_player(cfg: &SimConfig) -> Player {
        let mut p = test_player(cfg);
        p.state.y = cfg.player_height;
        p.on_ground = true;
        p
    }

    fn test_player(cfg: &SimConfig) -> Player {
        Player {
            id: Uuid::new_v4(),
            name: "t".to_string(),
            state: PlayerState {
                x: 0.0,
                y: cfg.player_height,
                z: 0.0,
                yaw: 0.0,
                pitch: 0.0,
                updated_at: 0,
            },
            pending_input: InputCommand::default(),
            last_input_seq: 0,
            last_processed_input_seq: 0,
            vertical_velocity: 0.0,
            on_ground: true,
        }
    }

    #[test]
    fn one_second_walk_covers_walk_speed_units() {
        // tick 20 Hz, continuous move_z=1 refreshed every tick for
        // exactly one second: final z is about -walk_speed.
        let cfg = SimConfig::default();
        let dt = cfg.tick_dt();
        let mut p = grounded_player(&cfg);

        for i in 0..20u64 {
            let now = 1_000 + i * 50;
            p.pending_input = InputCommand {
                seq: i as u32 + 1,
                move_z: 1.0,
                received_at: now,
                ..InputCommand::default()
            };
            integrate(&mut p, &cfg, now, dt);
        }

        assert!((p.state.x).abs() < 2e-3);
        assert!((p.state.y - cfg.player_height).abs() < 1e-3);
        assert!((p.state.z + cfg.walk_speed).abs() < 2e-3, "z = {}", p.state.z);
        assert_eq!(p.last_processed_input_seq, 20);
    }

    #[test]
    fn gravity_converges_to_ground() {
        let cfg = SimConfig::default();
        let dt = cfg.tick_dt();
        let mut p = test_player(&cfg);
        p.state.y = 10.0;
        p.on_ground = false;

        let mut settled_at = None;
        for i in 0..400u64 {
            integrate(&mut p, &cfg, 1_000 + i * 50, dt);
            if p.on_ground && settled_at.is_none() {
                settled_at = Some(i);
            }
        }
        assert!(settled_at.is_some(), "never settled");
        assert_eq!(p.state.y, cfg.player_height);
        assert!(p.on_ground);
    }

    #[test]
    fn jump_is_a_one_shot_edge() {
        let cfg = SimConfig::default();
        let dt = cfg.tick_dt();
        let mut p = grounded_player(&cfg);
        let now = 1_000;
        p.pending_input = InputCommand {
            seq: 1,
            jump: true,
            received_at: now,
            ..InputCommand::default()
        };

        integrate(&mut p, &cfg, now, dt);
        assert!(!p.on_ground);
        assert!(p.state.y > cfg.player_height);
        assert!(!p.pending_input.jump);

        // Landing back does not re-trigger the jump.
        let apex_ticks = 40;
        for i in 1..=apex_ticks {
            integrate(&mut p, &cfg, now + i * 50, dt);
        }
        assert!(p.on_ground);
        assert_eq!(p.state.y, cfg.player_height);
    }

    #[test]
    fn stale_input_stops_horizontal_movement_but_keeps_facing() {
        let cfg = SimConfig::default();
        let dt = cfg.tick_dt();
        let mut p = grounded_player(&cfg);
        p.pending_input = InputCommand {
            seq: 1,
            move_z: 1.0,
            yaw: 1.0,
            received_at: 1_000,
            ..InputCommand::default()
        };

        // Well past the staleness window.
        let later = 1_000 + cfg.input_stale_ms + 500;
        let z_before = p.state.z;
        integrate(&mut p, &cfg, later, dt);
        assert_eq!(p.state.z, z_before);
        assert!((p.state.yaw - 1.0).abs() < 1e-3);
    }

    #[test]
    fn position_clamped_to_world_limit() {
        let cfg = SimConfig::default();
        let dt = cfg.tick_dt();
        let mut p = grounded_player(&cfg);
        p.state.x = cfg.world_limit - 0.1;
        p.state.yaw = -std::f32::consts::FRAC_PI_2;

        for i in 0..60u64 {
            let now = 1_000 + i * 50;
            p.pending_input = InputCommand {
                seq: i as u32 + 1,
                move_z: 1.0,
                yaw: -std::f32::consts::FRAC_PI_2,
                sprint: true,
                received_at: now,
                ..InputCommand::default()
            };
            integrate(&mut p, &cfg, now, dt);
        }
        assert!(p.state.x.abs() <= cfg.world_limit);
        assert!(p.state.z.abs() <= cfg.world_limit);
    }

    #[test]
    fn diagonal_intent_is_normalized() {
        let cfg = SimConfig::default();
        let dt = cfg.tick_dt();
        let mut p = grounded_player(&cfg);
        let now = 1_000;
        p.pending_input = InputCommand {
            seq: 1,
            move_x: 1.0,
            move_z: 1.0,
            received_at: now,
            ..InputCommand::default()
        };
        integrate(&mut p, &cfg, now, dt);

        let moved = (p.state.x * p.state.x + p.state.z * p.state.z).sqrt();
        let expected = cfg.walk_speed * dt;
        assert!((moved - expected).abs() < 2e-3, "moved {}", moved);
    }
}
