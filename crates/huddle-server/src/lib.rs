//! # huddle-server
//!
//! HTTP and WebSocket front end for the huddle hub: the realtime endpoint,
//! the conversation REST API, health and Prometheus metrics.

pub mod api;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
