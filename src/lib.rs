//! Stream gateway - live MongoDB changes as server-sent events
//!
//! Clients open `/event-stream` or `/vespa-stream` with an account and a
//! shared secret. After the pair is checked against the users collection the
//! gateway watches a collection, narrows the change feed to documents the
//! account owns and relays each matching mutation as one SSE frame.
//!
//! ## Layers
//!
//! - **auth**: Identity records and credential checks
//! - **feed**: Change-feed source abstraction with an in-memory implementation
//! - **db**: MongoDB client, identity store and change-stream source
//! - **subscription**: Per-account stream plans and cursors
//! - **events** / **sse**: Record transcoding and frame writing
//! - **connection**: Lifecycle of one client stream
//! - **server** / **routes**: HTTP surface

pub mod auth;
pub mod config;
pub mod connection;
pub mod db;
pub mod events;
pub mod feed;
pub mod logging;
pub mod routes;
pub mod server;
pub mod sse;
pub mod subscription;
pub mod types;

pub use config::Args;
pub use server::{run, serve, AppState};
pub use types::{GatewayError, Result};
