//! WebSocket transport implementation over tokio-tungstenite

use crate::transport::traits::{EventSink, Payload, ReadyState, Transport, TransportHandle};
use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

/// Close code reported when the peer sent no status
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported after a local close
pub const CLOSE_NORMAL: u16 = 1000;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

enum Outbound {
    Frame(Message),
    Close,
}

/// WebSocket connector
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Transport for WebSocketTransport {
    type Handle = WebSocketHandle;

    fn open(&self, target: &Url, events: EventSink) -> Result<Self::Handle> {
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(
            target.to_string(),
            self.connect_timeout,
            state.clone(),
            outbound_rx,
            events,
        ));

        Ok(WebSocketHandle {
            state,
            outbound: outbound_tx,
        })
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}

/// Handle to a socket driven by a background task.
///
/// Dropping the handle closes the socket.
pub struct WebSocketHandle {
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle for WebSocketHandle {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send(&self, payload: Payload) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(anyhow!("Socket not open ({:?})", self.ready_state()));
        }
        let message = match payload {
            Payload::Text(text) => Message::Text(text.into()),
            Payload::Binary(data) => Message::Binary(data),
        };
        self.outbound
            .send(Outbound::Frame(message))
            .map_err(|_| anyhow!("Socket task stopped"))
    }

    fn close(&self) -> Result<()> {
        if self.ready_state() == ReadyState::Closed {
            return Ok(());
        }
        self.outbound
            .send(Outbound::Close)
            .map_err(|_| anyhow!("Socket task stopped"))
    }
}

fn set_state(state: &AtomicU8, value: ReadyState) {
    state.store(value as u8, Ordering::SeqCst);
}

fn fail(state: &AtomicU8, events: &EventSink, reason: String) {
    set_state(state, ReadyState::Closed);
    events.errored(reason);
    events.closed(CLOSE_ABNORMAL);
}

/// Resolves once a close is requested or the handle is dropped
async fn close_requested(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close) | None => return,
            Some(Outbound::Frame(_)) => {}
        }
    }
}

/// Drive one socket from handshake to close
async fn run_socket(
    target: String,
    connect_timeout: Duration,
    state: Arc<AtomicU8>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
) {
    let stream = tokio::select! {
        result = timeout(connect_timeout, connect_async(target.as_str())) => match result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                fail(&state, &events, format!("Connect failed: {}", e));
                return;
            }
            Err(_) => {
                fail(&state, &events, format!("Connect timeout ({:?})", connect_timeout));
                return;
            }
        },
        _ = close_requested(&mut outbound) => {
            set_state(&state, ReadyState::Closed);
            events.closed(CLOSE_ABNORMAL);
            return;
        }
    };

    set_state(&state, ReadyState::Open);
    events.opened();

    let (mut writer, mut reader) = stream.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Frame(message)) => {
                    if let Err(e) = writer.send(message).await {
                        fail(&state, &events, format!("Write error: {}", e));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    set_state(&state, ReadyState::Closing);
                    if let Err(e) = writer.close().await {
                        debug!("Close handshake failed: {}", e);
                    }
                    set_state(&state, ReadyState::Closed);
                    events.closed(CLOSE_NORMAL);
                    return;
                }
            },

            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.message(Payload::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.message(Payload::Binary(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_NO_STATUS);
                    set_state(&state, ReadyState::Closed);
                    let _ = writer.close().await;
                    events.closed(code);
                    return;
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    fail(&state, &events, format!("Read error: {}", e));
                    return;
                }
                None => {
                    set_state(&state, ReadyState::Closed);
                    events.closed(CLOSE_ABNORMAL);
                    return;
                }
            }
        }
    }
}
