//! Timer slots owned by the connection driver
//!
//! At most one reconnect timer and one heartbeat exist at a time. Filling a
//! slot drops (and so aborts) whatever occupied it.

use super::heartbeat::Heartbeat;
use super::reconnect::ReconnectTimer;
use std::time::Duration;
use tether_shared::Generation;
use tokio::sync::mpsc;

/// Timer firings delivered back to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    ReconnectDue { token: u64 },
    HeartbeatTick { generation: Generation },
}

pub(crate) struct Timers {
    tx: mpsc::UnboundedSender<TimerEvent>,
    reconnect: Option<ReconnectTimer>,
    heartbeat: Option<Heartbeat>,
    next_token: u64,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self {
            tx,
            reconnect: None,
            heartbeat: None,
            next_token: 0,
        }
    }

    /// Cancel both timers
    pub fn clear(&mut self) {
        self.clear_reconnect();
        self.clear_heartbeat();
    }

    pub fn clear_reconnect(&mut self) {
        self.reconnect = None;
    }

    pub fn clear_heartbeat(&mut self) {
        self.heartbeat = None;
    }

    pub fn start_heartbeat(&mut self, period: Duration, generation: Generation) {
        self.heartbeat = None;
        self.heartbeat = Some(Heartbeat::start(period, generation, self.tx.clone()));
    }

    pub fn schedule_reconnect(&mut self, delay: Duration) {
        self.reconnect = None;
        self.next_token += 1;
        self.reconnect = Some(ReconnectTimer::schedule(
            delay,
            self.next_token,
            self.tx.clone(),
        ));
    }

    /// Consume the pending reconnect if `token` belongs to it
    pub fn take_reconnect(&mut self, token: u64) -> bool {
        match &self.reconnect {
            Some(timer) if timer.token() == token => {
                self.reconnect = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a heartbeat tick for `generation` is still wanted
    pub fn heartbeat_matches(&self, generation: Generation) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|hb| hb.generation() == generation)
    }

    /// Whether a reconnect is waiting to fire
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    #[cfg(test)]
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_some()
    }
}
