//! # giftlist-server
//!
//! Real-time event fan-out for Giftlist clients.
//!
//! - `WebSocket` gateway at `/ws?token=…`: token check before upgrade,
//!   per-connection reader/writer tasks, heartbeat
//! - Topic registry: bidirectional connection ↔ topic index under one lock
//! - Event broadcaster: best-effort, at-most-once delivery with
//!   per-subscriber failure isolation
//! - HTTP: `/health`, `/metrics` (Prometheus), `POST /broadcast`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RealtimeServer;
pub use websocket::broadcast::{BroadcastOutcome, EventBroadcaster};
pub use websocket::registry::{RegistryLimits, TopicRegistry};
