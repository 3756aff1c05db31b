//! Liveness driver
//!
//! A fixed-period ticker owned by the connection driver. Each tick is tagged
//! with the generation of the connection it was started for; the driver sends
//! the probe only if that connection is still the live one.

use super::timers::TimerEvent;
use crate::transport::{Payload, ReadyState, TransportHandle};
use std::time::Duration;
use tether_shared::Generation;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Running heartbeat ticker; aborted when dropped
pub(crate) struct Heartbeat {
    generation: Generation,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Start ticking every `period`, first tick one period from now
    pub fn start(
        period: Duration,
        generation: Generation,
        timer_tx: mpsc::UnboundedSender<TimerEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if timer_tx
                    .send(TimerEvent::HeartbeatTick { generation })
                    .is_err()
                {
                    break;
                }
            }
        });

        Self { generation, task }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    Sent,
    /// Handle not writable at this instant
    Skipped,
    /// Send failed; the transport's own close/error will follow
    Failed,
}

/// Send one probe through `handle` if it is open
pub(crate) fn probe<H: TransportHandle>(handle: &H, payload: &str) -> Probe {
    if handle.ready_state() != ReadyState::Open {
        return Probe::Skipped;
    }
    match handle.send(Payload::Text(payload.to_string())) {
        Ok(()) => Probe::Sent,
        Err(e) => {
            debug!("Heartbeat probe failed: {}", e);
            Probe::Failed
        }
    }
}
