//! # switchboard-server
//!
//! Axum `WebSocket` rendezvous relay for peer-to-peer session negotiation.
//!
//! - Device registry: client-chosen identities mapped to live connections
//! - Presence: catch-up roster on registration plus online/offline fan-out
//! - Routing: addressed envelopes forwarded verbatim, fire-and-forget
//! - Heartbeat ping/pong liveness, `/health` and `/metrics` endpoints
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{build_router, start, AppState, ServerHandle};
