//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::metrics::Metrics;
use crate::game::EngineHandle;
use crate::ws::conn::ConnectionTable;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Command channel into the simulation engine task
    pub engine: EngineHandle,
    /// Transport-level registry of live connections
    pub connections: Arc<ConnectionTable>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: EngineHandle,
        connections: Arc<ConnectionTable>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            connections,
            metrics,
        }
    }
}
