//! Transport trait abstraction for pluggable streaming backends

use anyhow::Result;
use bytes::Bytes;
use tether_shared::Generation;
use tokio::sync::mpsc;
use url::Url;

/// Raw message payload, delivered verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Text content, if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text.as_str()),
            Payload::Binary(_) => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

/// Readiness of a transport handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    /// Whether the handle is opening or open
    pub fn is_live(self) -> bool {
        matches!(self, ReadyState::Connecting | ReadyState::Open)
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// What happened on a transport handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Message(Payload),
    Closed { code: u16 },
    Errored(String),
}

/// Transport event tagged with the attempt that produced it
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub generation: Generation,
    pub kind: TransportEventKind,
}

/// Where a handle reports its events.
///
/// Cheap to clone; a send after the manager has gone away is silently dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn opened(&self) {
        self.emit(TransportEventKind::Opened);
    }

    pub fn message(&self, payload: Payload) {
        self.emit(TransportEventKind::Message(payload));
    }

    pub fn closed(&self, code: u16) {
        self.emit(TransportEventKind::Closed { code });
    }

    pub fn errored(&self, reason: impl Into<String>) {
        self.emit(TransportEventKind::Errored(reason.into()));
    }

    fn emit(&self, kind: TransportEventKind) {
        let _ = self.tx.send(TransportEvent {
            generation: self.generation,
            kind,
        });
    }
}

/// A live connection handle
pub trait TransportHandle: Send + 'static {
    /// Current readiness, read at the moment of the call
    fn ready_state(&self) -> ReadyState;

    /// Queue a payload for sending
    fn send(&self, payload: Payload) -> Result<()>;

    /// Begin closing the connection
    fn close(&self) -> Result<()>;
}

/// Factory for connection handles.
///
/// `open` must not block: the handshake runs in the background and its
/// outcome arrives through the sink as `Opened`, or `Errored`/`Closed`.
pub trait Transport: Send + 'static {
    /// The handle type this transport produces
    type Handle: TransportHandle;

    /// Start opening a connection to `target`
    fn open(&self, target: &Url, events: EventSink) -> Result<Self::Handle>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
