//! World Sync Server - authoritative real-time synchronization engine
//!
//! Library crate exposing the simulation core and its HTTP/WebSocket
//! surface. The binary in `main.rs` wires these together.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
