//! Backoff scheduler
//!
//! Decides whether another reconnect attempt is allowed and arms the
//! single-shot timer for it.

use super::timers::TimerEvent;
use std::time::Duration;
use tether_shared::BackoffPolicy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What to do after an abnormal close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectPlan {
    /// Try again after `delay`; this will be attempt number `attempt`
    Retry { attempt: u32, delay: Duration },
    /// Retry budget spent
    Exhausted { attempts: u32 },
}

/// Plan the next attempt given the consecutive failure count
pub(crate) fn plan(policy: &BackoffPolicy, retry: u32) -> ReconnectPlan {
    match policy.next_delay(retry) {
        Some(delay) => ReconnectPlan::Retry {
            attempt: retry + 1,
            delay,
        },
        None => ReconnectPlan::Exhausted { attempts: retry },
    }
}

/// Pending single-shot reconnect; aborted when dropped
pub(crate) struct ReconnectTimer {
    token: u64,
    task: JoinHandle<()>,
}

impl ReconnectTimer {
    pub fn schedule(
        delay: Duration,
        token: u64,
        timer_tx: mpsc::UnboundedSender<TimerEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(TimerEvent::ReconnectDue { token });
        });
        Self { token, task }
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
