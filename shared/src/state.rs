//! Connection State Machine
//!
//! Defines the valid lifecycle transitions of a single logical connection.

/// Externally visible connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Lowercase status name as shown to collaborators
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A new handle is being opened
    ConnectRequested,
    /// Transport reported the handle open
    Opened,
    /// Transport closed or errored
    Lost,
    /// Attempt abandoned before a handle existed (no credential, bad address)
    AttemptAborted,
    /// Explicit teardown
    DisconnectRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// State changed
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Valid event, but the state stays where it was
    Unchanged(ConnectionState),
    /// Event is not allowed from the current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current: ConnectionState,
}

impl LinkStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current
    }

    /// Process an event and return the transition result
    pub fn process(&mut self, event: LinkEvent) -> Transition {
        let Some(next) = self.next_state(event) else {
            return Transition::Invalid {
                from: self.current,
                event,
            };
        };

        let from = self.current;
        self.current = next;
        if from == next {
            Transition::Unchanged(next)
        } else {
            Transition::Changed { from, to: next }
        }
    }

    fn next_state(&self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self.current, event) {
            // A stale handle may be replaced from any state
            (_, ConnectRequested) => Some(Connecting),

            (Connecting, Opened) => Some(Connected),

            (Connecting | Connected, Lost) => Some(Disconnected),

            (_, AttemptAborted) => Some(Disconnected),
            (_, DisconnectRequested) => Some(Disconnected),

            _ => None,
        }
    }
}
