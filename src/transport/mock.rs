//! In-memory transport double with scripted events

use crate::transport::traits::{EventSink, Payload, ReadyState, Transport, TransportHandle};
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use tether_shared::Generation;
use url::Url;

#[derive(Debug)]
struct Socket {
    url: Url,
    sink: EventSink,
    state: ReadyState,
    sent: Vec<Payload>,
    closes: usize,
    fail_sends: bool,
}

type Shared = Arc<Mutex<Vec<Arc<Mutex<Socket>>>>>;

/// Records every opened handle; tests drive them through [`MockSocket`]
#[derive(Clone, Default)]
pub struct MockTransport {
    sockets: Shared,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles opened so far
    pub fn opened(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    /// The n-th opened socket (0-based)
    pub fn socket(&self, index: usize) -> MockSocket {
        MockSocket(self.sockets.lock().unwrap()[index].clone())
    }

    /// Most recently opened socket
    pub fn last(&self) -> MockSocket {
        let sockets = self.sockets.lock().unwrap();
        MockSocket(sockets.last().expect("no socket opened").clone())
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn open(&self, target: &Url, events: EventSink) -> Result<Self::Handle> {
        let socket = Arc::new(Mutex::new(Socket {
            url: target.clone(),
            sink: events,
            state: ReadyState::Connecting,
            sent: Vec::new(),
            closes: 0,
            fail_sends: false,
        }));
        self.sockets.lock().unwrap().push(socket.clone());
        Ok(MockHandle(socket))
    }

    fn name(&self) -> &'static str {
        "Mock"
    }
}

pub struct MockHandle(Arc<Mutex<Socket>>);

impl TransportHandle for MockHandle {
    fn ready_state(&self) -> ReadyState {
        self.0.lock().unwrap().state
    }

    fn send(&self, payload: Payload) -> Result<()> {
        let mut socket = self.0.lock().unwrap();
        if socket.fail_sends {
            return Err(anyhow!("send refused"));
        }
        socket.sent.push(payload);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut socket = self.0.lock().unwrap();
        socket.closes += 1;
        if socket.state != ReadyState::Closed {
            socket.state = ReadyState::Closed;
            socket.sink.closed(1000);
        }
        Ok(())
    }
}

/// Test-side view of an opened handle
#[derive(Clone)]
pub struct MockSocket(Arc<Mutex<Socket>>);

impl MockSocket {
    pub fn url(&self) -> Url {
        self.0.lock().unwrap().url.clone()
    }

    pub fn generation(&self) -> Generation {
        self.0.lock().unwrap().sink.generation()
    }

    pub fn state(&self) -> ReadyState {
        self.0.lock().unwrap().state
    }

    pub fn sent(&self) -> Vec<Payload> {
        self.0.lock().unwrap().sent.clone()
    }

    pub fn closes(&self) -> usize {
        self.0.lock().unwrap().closes
    }

    pub fn fail_sends(&self) {
        self.0.lock().unwrap().fail_sends = true;
    }

    /// Complete the handshake
    pub fn open(&self) {
        let mut socket = self.0.lock().unwrap();
        socket.state = ReadyState::Open;
        socket.sink.opened();
    }

    pub fn deliver(&self, payload: Payload) {
        self.0.lock().unwrap().sink.message(payload);
    }

    /// Drop the connection from the remote side
    pub fn drop_with(&self, code: u16) {
        let mut socket = self.0.lock().unwrap();
        socket.state = ReadyState::Closed;
        socket.sink.closed(code);
    }

    /// Report a transport error without closing
    pub fn error(&self, reason: &str) {
        self.0.lock().unwrap().sink.errored(reason);
    }

    /// Report closed readiness without emitting any event
    pub fn go_stale(&self) {
        self.0.lock().unwrap().state = ReadyState::Closed;
    }

    /// Emit a close event regardless of the current readiness
    pub fn late_close(&self, code: u16) {
        self.0.lock().unwrap().sink.closed(code);
    }
}
