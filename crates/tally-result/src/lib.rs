//! tally-result: live vote results viewer
//!
//! Wires a configured backend into the tally poller and serves viewers over
//! WebSocket, plus the landing page and health endpoints.

pub mod config;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::{Args, BackendConfig, ConfigError, Settings};
pub use server::{router, AppState};
