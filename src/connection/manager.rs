//! Connection manager with a persistent connection and automatic reconnection

use super::heartbeat::{self, Probe};
use super::reconnect::{self, ReconnectPlan};
use super::timers::{TimerEvent, Timers};
use crate::auth::CredentialSource;
use crate::transport::{
    EventSink, Payload, Transport, TransportEvent, TransportEventKind, TransportHandle,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tether_shared::{
    defaults, AddressBuilder, BackoffPolicy, ConnectionState, Generation, LinkEvent,
    LinkStateMachine, Transition,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Callback receiving every inbound payload
pub type MessageCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport opened
    Connected { generation: Generation },
    /// Connection lost or torn down; `code` is absent for local teardown
    Disconnected { code: Option<u16> },
    /// Reconnect timer armed
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Gave up; only an explicit `connect` starts again
    RetriesExhausted { attempts: u32 },
    /// Base address could not be turned into a connection URI
    AddressRejected { reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Liveness probe period (zero disables probing)
    pub heartbeat_interval: Duration,
    /// Payload of each liveness probe
    pub probe_payload: String,
    /// Reconnect backoff
    pub backoff: BackoffPolicy,
    /// Connection URI construction
    pub address: AddressBuilder,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(defaults::HEARTBEAT_INTERVAL_MS),
            probe_payload: defaults::PROBE_PAYLOAD.into(),
            backoff: BackoffPolicy::default(),
            address: AddressBuilder::default(),
        }
    }
}

enum Command {
    Connect {
        base: String,
        on_message: MessageCallback,
    },
    Disconnect,
}

/// Owns a single logical persistent connection.
///
/// Commands are queued to a driver task that handles one event at a time, so
/// every state change runs to completion before the next event is looked at.
/// Dropping the manager tears the connection down.
pub struct ConnectionManager {
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    _task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create a new connection manager and start its driver task
    pub fn new<T, C>(config: ConnectionConfig, transport: T, credentials: C) -> Self
    where
        T: Transport,
        C: CredentialSource,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!("Connection manager starting ({} transport)", transport.name());

        let driver = Driver {
            config,
            transport,
            credentials,
            fsm: LinkStateMachine::new(),
            active: None,
            generation: Generation::default(),
            retry: 0,
            target: None,
            timers: Timers::new(timer_tx),
            transport_tx,
            status_tx,
            event_tx: event_tx.clone(),
        };
        let task = tokio::spawn(driver.run(command_rx, transport_rx, timer_rx));

        Self {
            command_tx,
            status_rx,
            event_tx,
            _task: task,
        }
    }

    /// Open the connection to `base_address` (http or https).
    ///
    /// No-op while connecting or connected, or when no credential is present.
    /// The command is queued to the driver, so `status()` may still report the
    /// previous state when this returns; use `watch_status()` to wait for it.
    pub fn connect<F>(&self, base_address: impl Into<String>, on_message: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.send_command(Command::Connect {
            base: base_address.into(),
            on_message: Arc::new(on_message),
        });
    }

    /// Tear the connection down and cancel every timer. Safe in any state.
    ///
    /// Like `connect`, this is queued; the status changes once it is handled.
    pub fn disconnect(&self) {
        self.send_command(Command::Disconnect);
    }

    /// Current connection status.
    ///
    /// Updated asynchronously by the driver after queued commands and
    /// transport events are handled.
    pub fn status(&self) -> ConnectionState {
        *self.status_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.status() == ConnectionState::Connecting
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status_rx.clone()
    }

    /// Subscribe to connection events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    fn send_command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            error!("Connection driver is not running");
        }
    }
}

struct Target {
    base: String,
    on_message: MessageCallback,
}

struct Active<H> {
    generation: Generation,
    handle: H,
}

/// Single owner of the handle, retry counter and timers
struct Driver<T: Transport, C> {
    config: ConnectionConfig,
    transport: T,
    credentials: C,
    fsm: LinkStateMachine,
    active: Option<Active<T::Handle>>,
    generation: Generation,
    /// Consecutive failed attempts since the last successful open
    retry: u32,
    target: Option<Target>,
    timers: Timers,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    status_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl<T: Transport, C: CredentialSource> Driver<T, C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        mut timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect { base, on_message }) => self.on_connect(base, on_message),
                    Some(Command::Disconnect) => self.on_disconnect(),
                    None => {
                        self.on_disconnect();
                        break;
                    }
                },
                Some(event) = transport_rx.recv() => self.on_transport_event(event),
                Some(event) = timer_rx.recv() => self.on_timer(event),
            }
        }

        debug!("Connection driver stopped");
    }

    /// Whether the owned handle is opening or open
    fn handle_is_live(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.handle.ready_state().is_live())
    }

    fn on_connect(&mut self, base: String, on_message: MessageCallback) {
        if self.handle_is_live() {
            debug!("Connect ignored: already {}", self.fsm.state());
            return;
        }
        if self.credentials.token().is_none() {
            debug!("Connect ignored: no credential");
            return;
        }

        self.target = Some(Target { base, on_message });
        if self.config.backoff.is_exhausted(self.retry) {
            self.retry = 0;
        } else if self.timers.reconnect_pending() {
            // Takes the place of the scheduled retry
            self.retry += 1;
        }
        self.attempt();
    }

    /// Start a new connection attempt to the remembered target
    fn attempt(&mut self) {
        self.timers.clear();

        let Some(base) = self.target.as_ref().map(|t| t.base.clone()) else {
            return;
        };
        let Some(token) = self.credentials.token() else {
            info!("No credential present; connection attempt abandoned");
            self.apply(LinkEvent::AttemptAborted);
            return;
        };

        let url = match self.config.address.build(&base, &token) {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot build connection address from {:?}: {}", base, e);
                self.apply(LinkEvent::AttemptAborted);
                self.emit(ConnectionEvent::AddressRejected {
                    reason: e.to_string(),
                });
                return;
            }
        };

        if let Some(stale) = self.active.take() {
            if let Err(e) = stale.handle.close() {
                debug!("Closing superseded handle failed: {}", e);
            }
        }

        self.generation = self.generation.next();
        let generation = self.generation;
        self.apply(LinkEvent::ConnectRequested);
        info!(
            "Connecting to {} (attempt {}, retry {})",
            url.host_str().unwrap_or("?"),
            generation,
            self.retry
        );

        let sink = EventSink::new(generation, self.transport_tx.clone());
        match self.transport.open(&url, sink) {
            Ok(handle) => self.active = Some(Active { generation, handle }),
            Err(e) => {
                warn!("Transport refused to open: {}", e);
                self.on_lost(None);
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let current = self.active.as_ref().map(|a| a.generation);
        if current != Some(event.generation) {
            debug!("Ignoring event from stale attempt {}", event.generation);
            return;
        }

        match event.kind {
            TransportEventKind::Opened => self.on_opened(event.generation),
            TransportEventKind::Message(payload) => self.deliver(payload),
            TransportEventKind::Errored(reason) => {
                warn!("Transport error: {}", reason);
                if let Some(active) = &self.active {
                    if let Err(e) = active.handle.close() {
                        debug!("Close after error failed: {}", e);
                    }
                }
                self.on_lost(None);
            }
            TransportEventKind::Closed { code } => self.on_lost(Some(code)),
        }
    }

    fn on_opened(&mut self, generation: Generation) {
        self.retry = 0;
        self.timers.clear();
        self.apply(LinkEvent::Opened);

        if !self.config.heartbeat_interval.is_zero() {
            self.timers
                .start_heartbeat(self.config.heartbeat_interval, generation);
        }

        info!("Connected (attempt {})", generation);
        self.emit(ConnectionEvent::Connected { generation });
    }

    fn deliver(&self, payload: Payload) {
        let Some(target) = &self.target else {
            return;
        };
        let callback = target.on_message.clone();
        if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
            error!("Message callback panicked; message dropped");
        }
    }

    /// Transport closed or errored while this handle was current
    fn on_lost(&mut self, code: Option<u16>) {
        self.active = None;
        self.timers.clear();
        self.apply(LinkEvent::Lost);

        match code {
            Some(code) => warn!("Connection closed (code {})", code),
            None => warn!("Connection lost"),
        }
        self.emit(ConnectionEvent::Disconnected { code });

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.timers.clear();

        if self.credentials.token().is_none() {
            info!("No credential present; not reconnecting");
            return;
        }

        match reconnect::plan(&self.config.backoff, self.retry) {
            ReconnectPlan::Retry { attempt, delay } => {
                info!("Reconnecting in {:?} (attempt {})", delay, attempt);
                self.timers.schedule_reconnect(delay);
                self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });
            }
            ReconnectPlan::Exhausted { attempts } => {
                error!("Giving up after {} reconnect attempts", attempts);
                self.emit(ConnectionEvent::RetriesExhausted { attempts });
            }
        }
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ReconnectDue { token } => {
                if !self.timers.take_reconnect(token) {
                    return;
                }
                if self.handle_is_live() {
                    return;
                }
                self.retry += 1;
                self.attempt();
            }
            TimerEvent::HeartbeatTick { generation } => {
                if !self.timers.heartbeat_matches(generation) {
                    return;
                }
                let Some(active) = self.active.as_ref().filter(|a| a.generation == generation)
                else {
                    return;
                };
                if heartbeat::probe(&active.handle, &self.config.probe_payload) == Probe::Skipped {
                    debug!("Heartbeat skipped: handle not writable");
                }
            }
        }
    }

    fn on_disconnect(&mut self) {
        self.timers.clear();

        if let Some(active) = self.active.take() {
            if let Err(e) = active.handle.close() {
                debug!("Close during teardown failed: {}", e);
            }
        }
        self.retry = 0;
        self.target = None;

        if let Transition::Changed { .. } = self.apply(LinkEvent::DisconnectRequested) {
            info!("Disconnected by request");
            self.emit(ConnectionEvent::Disconnected { code: None });
        }
    }

    fn apply(&mut self, event: LinkEvent) -> Transition {
        let transition = self.fsm.process(event);
        match &transition {
            Transition::Changed { from, to } => {
                debug!("State: {} -> {}", from, to);
                self.status_tx.send_replace(*to);
            }
            Transition::Unchanged(_) => {}
            Transition::Invalid { from, event } => {
                warn!("Ignoring {:?} in state {}", event, from);
            }
        }
        transition
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;
    use crate::transport::mock::MockTransport;
    use crate::transport::ReadyState;
    use bytes::Bytes;
    use std::sync::Mutex;

    const BASE: &str = "https://svc.example:8001";

    fn setup() -> (ConnectionManager, MockTransport, TokenStore) {
        let transport = MockTransport::new();
        let store = TokenStore::with_token("secret token");
        let manager =
            ConnectionManager::new(ConnectionConfig::default(), transport.clone(), store.clone());
        (manager, transport, store)
    }

    fn ignore(_: Payload) {}

    /// Let the driver process everything queued so far
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn drain(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn scheduled(events: &[ConnectionEvent]) -> Vec<(u32, Duration)> {
        events
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::ReconnectScheduled { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_builds_target_and_opens() {
        let (manager, transport, _store) = setup();
        assert_eq!(manager.status(), ConnectionState::Disconnected);

        manager.connect(BASE, ignore);
        settle().await;

        assert_eq!(transport.opened(), 1);
        let url = transport.last().url();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws");
        assert_eq!(url.query(), Some("token=secret%20token"));
        assert!(manager.is_connecting());
        assert_eq!(manager.status().as_str(), "connecting");

        transport.last().open();
        settle().await;

        assert!(manager.is_connected());
        assert!(!manager.is_connecting());
        assert_eq!(manager.status().as_str(), "connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_every_interval() {
        let (manager, transport, _store) = setup();
        manager.connect(BASE, ignore);
        settle().await;
        let socket = transport.last();
        socket.open();
        settle().await;

        advance(19_990).await;
        assert!(socket.sent().is_empty());

        advance(20).await;
        assert_eq!(socket.sent(), vec![Payload::from("ping")]);

        advance(20_000).await;
        assert_eq!(socket.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_forwarded_verbatim() {
        let (manager, transport, _store) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.connect(BASE, move |payload| sink.lock().unwrap().push(payload));
        settle().await;

        let socket = transport.last();
        socket.open();
        socket.deliver(Payload::from("{\"type\":\"notice\"}"));
        socket.deliver(Payload::Binary(Bytes::from_static(&[1, 2, 3])));
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Payload::from("{\"type\":\"notice\"}"),
                Payload::Binary(Bytes::from_static(&[1, 2, 3])),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_connect_opens_one_handle() {
        let (manager, transport, _store) = setup();
        manager.connect(BASE, ignore);
        manager.connect(BASE, ignore);
        settle().await;
        assert_eq!(transport.opened(), 1);

        transport.last().open();
        settle().await;
        manager.connect(BASE, ignore);
        settle().await;
        assert_eq!(transport.opened(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_credential_suppresses_connect() {
        let (manager, transport, store) = setup();
        store.clear();

        manager.connect(BASE, ignore);
        settle().await;

        assert_eq!(transport.opened(), 0);
        assert_eq!(manager.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_schedules_reconnect_in_window() {
        let (manager, transport, _store) = setup();
        let mut events = manager.subscribe();
        manager.connect(BASE, ignore);
        settle().await;
        transport.last().open();
        settle().await;

        transport.last().drop_with(1006);
        settle().await;
        assert_eq!(manager.status(), ConnectionState::Disconnected);

        let seen = drain(&mut events);
        assert!(seen.contains(&ConnectionEvent::Disconnected { code: Some(1006) }));
        let plans = scheduled(&seen);
        assert_eq!(plans.len(), 1);
        let (attempt, delay) = plans[0];
        assert_eq!(attempt, 1);
        assert!(delay >= Duration::from_millis(800) && delay < Duration::from_millis(1200));

        advance(790).await;
        assert_eq!(transport.opened(), 1);

        advance(420).await;
        assert_eq!(transport.opened(), 2);
        assert!(manager.is_connecting());
        assert!(transport.socket(1).generation() > transport.socket(0).generation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_retry_count() {
        let (manager, transport, _store) = setup();
        let mut events = manager.subscribe();
        manager.connect(BASE, ignore);
        settle().await;

        // Handshake fails, first reconnect
        transport.last().drop_with(1006);
        advance(1_300).await;
        assert_eq!(transport.opened(), 2);

        // Second failure backs off further
        transport.last().drop_with(1006);
        settle().await;
        let plans = scheduled(&drain(&mut events));
        assert_eq!(plans.last().map(|p| p.0), Some(2));
        let delay = plans.last().unwrap().1;
        assert!(delay >= Duration::from_millis(1600) && delay < Duration::from_millis(2000));

        advance(2_100).await;
        assert_eq!(transport.opened(), 3);
        transport.last().open();
        settle().await;
        assert!(manager.is_connected());

        transport.last().drop_with(1011);
        settle().await;
        let plans = scheduled(&drain(&mut events));
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].0, 1);
        assert!(plans[0].1 < Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_during_backoff_keeps_retry_count() {
        let (manager, transport, _store) = setup();
        let mut events = manager.subscribe();
        manager.connect(BASE, ignore);
        settle().await;
        transport.last().open();
        settle().await;

        transport.last().drop_with(1006);
        settle().await;
        assert_eq!(scheduled(&drain(&mut events))[0].0, 1);

        // Connect while the reconnect timer is pending replaces it
        manager.connect(BASE, ignore);
        settle().await;
        assert_eq!(transport.opened(), 2);
        transport.last().drop_with(1006);
        settle().await;
        let plans = scheduled(&drain(&mut events));
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].0, 2);
        assert!(plans[0].1 >= Duration::from_millis(1600));

        // The cancelled timer never fires a second attempt
        advance(1_500).await;
        assert_eq!(transport.opened(), 2);

        // Repeated connects still run the budget down
        let mut exhausted = false;
        for _ in 0..30 {
            manager.connect(BASE, ignore);
            settle().await;
            transport.last().drop_with(1006);
            settle().await;
            let seen = drain(&mut events);
            assert!(scheduled(&seen).iter().all(|(attempt, _)| *attempt <= 10));
            if seen.contains(&ConnectionEvent::RetriesExhausted { attempts: 10 }) {
                exhausted = true;
                break;
            }
        }
        assert!(exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_after_max() {
        let (manager, transport, _store) = setup();
        let mut events = manager.subscribe();
        manager.connect(BASE, ignore);
        settle().await;

        for _ in 0..=10 {
            transport.last().drop_with(1006);
            settle().await;
            advance(13_000).await;
        }

        assert_eq!(transport.opened(), 11);
        let seen = drain(&mut events);
        assert_eq!(scheduled(&seen).len(), 10);
        for (_, delay) in scheduled(&seen) {
            assert!(delay < Duration::from_millis(12_400));
        }
        assert_eq!(
            seen.last(),
            Some(&ConnectionEvent::RetriesExhausted { attempts: 10 })
        );

        advance(60_000).await;
        assert_eq!(transport.opened(), 11);
        assert_eq!(manager.status(), ConnectionState::Disconnected);

        // An explicit connect starts a fresh budget
        manager.connect(BASE, ignore);
        settle().await;
        assert_eq!(transport.opened(), 12);
        transport.last().drop_with(1006);
        settle().await;
        let plans = scheduled(&drain(&mut events));
        assert_eq!(plans.first().map(|p| p.0), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (manager, transport, _store) = setup();
        manager.connect(BASE, ignore);
        settle().await;
        transport.last().open();
        settle().await;

        transport.last().drop_with(1006);
        settle().await;
        manager.disconnect();
        settle().await;

        advance(30_000).await;
        assert_eq!(transport.opened(), 1);
        assert_eq!(manager.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_handle_and_stops_heartbeat() {
        let (manager, transport, _store) = setup();
        let mut events = manager.subscribe();
        manager.connect(BASE, ignore);
        settle().await;
        let socket = transport.last();
        socket.open();
        settle().await;

        manager.disconnect();
        settle().await;

        assert_eq!(socket.closes(), 1);
        assert_eq!(socket.state(), ReadyState::Closed);
        assert_eq!(manager.status(), ConnectionState::Disconnected);

        advance(60_000).await;
        assert!(socket.sent().is_empty());
        assert_eq!(transport.opened(), 1);

        let seen = drain(&mut events);
        assert!(seen.contains(&ConnectionEvent::Disconnected { code: None }));
        assert!(scheduled(&seen).is_empty());

        // Idempotent
        manager.disconnect();
        settle().await;
        assert_eq!(socket.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting_discards_late_open() {
        let (manager, transport, _store) = setup();
        manager.connect(BASE, ignore);
        settle().await;
        let socket = transport.last();

        manager.disconnect();
        settle().await;
        socket.open();
        settle().await;

        assert_eq!(manager.status(), ConnectionState::Disconnected);
        advance(60_000).await;
        assert!(socket.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_from_superseded_handle_is_ignored() {
        let (manager, transport, _store) = setup();
        manager.connect(BASE, ignore);
        settle().await;

        let old = transport.last();
        old.go_stale();
        manager.connect(BASE, ignore);
        settle().await;
        assert_eq!(transport.opened(), 2);

        old.late_close(1006);
        settle().await;
        assert!(manager.is_connecting());

        advance(15_000).await;
        assert_eq!(transport.opened(), 2);

        transport.last().open();
        settle().await;
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_credential_aborts_pending_reconnect() {
        let (manager, transport, store) = setup();
        manager.connect(BASE, ignore);
        settle().await;
        transport.last().open();
        settle().await;

        transport.last().drop_with(1006);
        settle().await;
        store.clear();

        advance(1_300).await;
        assert_eq!(transport.opened(), 1);
        assert_eq!(manager.status(), ConnectionState::Disconnected);

        advance(60_000).await;
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_credential_does_not_schedule() {
        let (manager, transport, store) = setup();
        let mut events = manager.subscribe();
        manager.connect(BASE, ignore);
        settle().await;
        transport.last().open();
        settle().await;

        store.clear();
        transport.last().drop_with(1001);
        settle().await;

        assert!(scheduled(&drain(&mut events)).is_empty());
        advance(15_000).await;
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_address_is_reported_and_not_retried() {
        let (manager, transport, _store) = setup();
        let mut events = manager.subscribe();

        manager.connect("not a url", ignore);
        settle().await;

        assert_eq!(transport.opened(), 0);
        assert_eq!(manager.status(), ConnectionState::Disconnected);
        let seen = drain(&mut events);
        assert!(matches!(
            seen.as_slice(),
            [ConnectionEvent::AddressRejected { .. }]
        ));

        advance(15_000).await;
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_closes_handle_and_reconnects_once() {
        let (manager, transport, _store) = setup();
        let mut events = manager.subscribe();
        manager.connect(BASE, ignore);
        settle().await;
        let socket = transport.last();
        socket.open();
        settle().await;

        socket.error("connection reset");
        settle().await;

        assert_eq!(socket.closes(), 1);
        assert_eq!(manager.status(), ConnectionState::Disconnected);
        assert_eq!(scheduled(&drain(&mut events)).len(), 1);

        advance(1_300).await;
        assert_eq!(transport.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_is_swallowed() {
        let (manager, transport, _store) = setup();
        manager.connect(BASE, ignore);
        settle().await;
        let socket = transport.last();
        socket.open();
        socket.fail_sends();
        settle().await;

        advance(45_000).await;
        assert!(manager.is_connected());
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_panic_keeps_driver_alive() {
        let (manager, transport, _store) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.connect(BASE, move |payload: Payload| {
            if payload.as_text() == Some("boom") {
                panic!("callback failure");
            }
            sink.lock().unwrap().push(payload);
        });
        settle().await;

        let socket = transport.last();
        socket.open();
        socket.deliver(Payload::from("boom"));
        socket.deliver(Payload::from("ok"));
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![Payload::from("ok")]);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_manager_tears_down() {
        let (manager, transport, _store) = setup();
        manager.connect(BASE, ignore);
        settle().await;
        let socket = transport.last();
        socket.open();
        settle().await;

        drop(manager);
        settle().await;

        assert_eq!(socket.closes(), 1);
        advance(60_000).await;
        assert!(socket.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_status_reports_latest() {
        let (manager, transport, _store) = setup();
        let mut status = manager.watch_status();
        manager.connect(BASE, ignore);
        settle().await;
        transport.last().open();
        settle().await;

        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), ConnectionState::Connected);
    }
}
