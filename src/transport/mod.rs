pub mod traits;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use traits::{
    EventSink, Payload, ReadyState, Transport, TransportEvent, TransportEventKind, TransportHandle,
};
pub use websocket::{WebSocketHandle, WebSocketTransport};
