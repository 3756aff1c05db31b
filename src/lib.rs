//! Tether
//!
//! Resilient persistent-connection client: opens a WebSocket to a server,
//! keeps it alive with periodic probes, and re-establishes it with bounded,
//! jittered exponential backoff when it drops.

pub mod auth;
pub mod connection;
pub mod transport;

pub use auth::{CredentialSource, TokenStore};
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, MessageCallback};
pub use tether_shared::{AddressBuilder, BackoffPolicy, ConnectionState, Generation};
pub use transport::{Payload, Transport, WebSocketTransport};
