use clap::Parser;
use std::time::Duration;
use tether::{
    BackoffPolicy, ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, Payload,
    TokenStore, WebSocketTransport,
};
use tokio::sync::broadcast::error::RecvError;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keep a WebSocket connection to a server alive and print what it sends
#[derive(Parser, Debug)]
#[command(name = "tether", version)]
struct Args {
    /// HTTP(S) base address of the server
    #[arg(long, env = "TETHER_BASE_URL", default_value = "http://127.0.0.1:8080")]
    base_url: String,

    /// Bearer token sent with the connection
    #[arg(long, env = "TETHER_TOKEN")]
    token: String,

    /// Seconds between liveness probes
    #[arg(long, env = "TETHER_HEARTBEAT_SECS", default_value_t = 20)]
    heartbeat_secs: u64,

    /// Reconnect attempts before giving up
    #[arg(long, env = "TETHER_MAX_RETRIES", default_value_t = 10)]
    max_retries: u32,

    /// Handshake timeout in seconds
    #[arg(long, env = "TETHER_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    connect_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let config = ConnectionConfig {
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        backoff: BackoffPolicy {
            max_retries: args.max_retries,
            ..Default::default()
        },
        ..Default::default()
    };

    info!("Tether client starting");
    info!("  Server: {}", args.base_url);

    let credentials = TokenStore::with_token(args.token);
    if !credentials.is_authed() {
        error!("No token given; set --token or TETHER_TOKEN");
        return;
    }
    let transport = WebSocketTransport::new(Duration::from_secs(args.connect_timeout_secs));
    let conn = ConnectionManager::new(config, transport, credentials);
    let mut events = conn.subscribe();

    conn.connect(args.base_url, |payload: Payload| match payload.as_text() {
        Some(text) => info!("<- {}", text),
        None => info!("<- binary message"),
    });

    // Main event loop
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected { generation }) => {
                    info!("Connected ({})", generation);
                }
                Ok(ConnectionEvent::Disconnected { code }) => {
                    warn!("Disconnected: code={:?}", code);
                }
                Ok(ConnectionEvent::ReconnectScheduled { attempt, delay }) => {
                    info!("Reconnect attempt {} in {:?}", attempt, delay);
                }
                Ok(ConnectionEvent::RetriesExhausted { attempts }) => {
                    error!("Connection failed after {} attempts", attempts);
                    break;
                }
                Ok(ConnectionEvent::AddressRejected { reason }) => {
                    error!("Bad server address: {}", reason);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} connection events", skipped);
                }
                Err(RecvError::Closed) => {
                    error!("Connection manager closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    let mut status = conn.watch_status();
    conn.disconnect();
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await;
    info!("Final status: {}", conn.status());
}
