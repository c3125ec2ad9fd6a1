//! HTTP surface: router and health/status endpoint

mod routes;

pub use routes::build_router;
