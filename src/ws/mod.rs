//! WebSocket transport: protocol types, session handling, and the
//! connection table

pub mod conn;
pub mod handler;
pub mod protocol;
