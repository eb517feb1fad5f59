//! WebSocket connections, topic subscriptions and event fan-out.
//!
//! Admission ([`gate`]) → per-connection [`session`] loop driving the
//! [`dispatcher`] against the [`registry`]; independently, the
//! [`broadcast`] handle snapshots the registry and enqueues event frames.
//! Every teardown path goes through [`lifecycle`].

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod gate;
pub mod heartbeat;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod session;
