//! # relay-server
//!
//! Axum HTTP + `WebSocket` message hub.
//!
//! - `WebSocket` gateway: per-connection read/write pumps around a single routing actor
//! - Unicast and broadcast routing with drop-slow-receiver backpressure
//! - Run-once demo tick publisher triggered by clients
//! - HTTP endpoints: health check, metrics, user records, static front-end
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod assets;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod users;
pub mod websocket;

pub use error::{ApiError, ServerError};
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
