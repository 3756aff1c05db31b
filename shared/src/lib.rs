//! Tether Shared Types
//!
//! Runtime-free building blocks for the tether connection manager: the
//! connection state machine, the reconnect backoff policy and the
//! connection address builder.

pub mod address;
pub mod backoff;
pub mod state;

pub use address::{AddressBuilder, AddressError};
pub use backoff::BackoffPolicy;
pub use state::{ConnectionState, LinkEvent, LinkStateMachine, Transition};

/// Default tuning for the connection manager
pub mod defaults {
    /// Liveness probe period in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 20_000;

    /// Payload sent on every liveness probe
    pub const PROBE_PAYLOAD: &str = "ping";

    /// Consecutive reconnect attempts before giving up
    pub const MAX_RETRIES: u32 = 10;

    /// First reconnect delay in milliseconds
    pub const BASE_DELAY_MS: u64 = 800;

    /// Upper bound of the exponential part of the reconnect delay
    pub const CAP_DELAY_MS: u64 = 12_000;

    /// Exclusive upper bound of the random jitter added to each delay
    pub const JITTER_MS: u64 = 400;

    /// Path of the streaming endpoint on the server
    pub const CONNECT_PATH: &str = "/ws";

    /// Query parameter carrying the bearer token
    pub const TOKEN_PARAM: &str = "token";
}

/// Tag of a single connection attempt.
///
/// Every transport event and heartbeat tick carries the generation of the
/// attempt that produced it; anything not matching the live attempt is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation following this one
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
