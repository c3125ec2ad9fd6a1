//! Shared utilities

pub mod num;
pub mod rate_limit;
pub mod time;
