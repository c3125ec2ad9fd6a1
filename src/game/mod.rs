//! Simulation core: rooms, admission, movement, snapshot diffing,
//! the tick engine, and metrics

pub mod admission;
pub mod engine;
pub mod metrics;
pub mod movement;
pub mod room;
pub mod snapshot;

pub use engine::{Engine, EngineCommand, EngineHandle};
pub use room::{ConnId, Player, PlayerState, Room, RoomDirectory, RoomError};

/// Sanitized input slot for a player, overwritten wholesale by each
/// accepted command. `jump` is a one-shot edge consumed by the next
/// simulation step.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputCommand {
    pub seq: u32,
    pub move_x: f32,
    pub move_z: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub sprint: bool,
    pub jump: bool,
    /// Server receipt time, unix millis; drives the staleness policy
    pub received_at: u64,
}
