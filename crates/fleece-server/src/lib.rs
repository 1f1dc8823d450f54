//! Fleece Server - HTTP inference endpoint over the Fleece model cache
//!
//! This crate wires [`fleece_core`] into an axum application: prediction,
//! liveness and readiness probes, Prometheus metrics and cache introspection.

/// Version of the fleece-server crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{create_router, FleeceServer, ServerState};
