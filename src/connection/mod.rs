//! Connection management for a single persistent streaming connection
//!
//! This module handles:
//! - Connection lifecycle (disconnected / connecting / connected)
//! - Liveness probes while connected
//! - Automatic reconnection with capped, jittered exponential backoff

mod heartbeat;
mod manager;
mod reconnect;
mod timers;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager, MessageCallback};
