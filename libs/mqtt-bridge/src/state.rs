use std::sync::Arc;

use tokio::sync::watch;

/// Inbound connection lifecycle.
///
/// `Disconnected → Connected → {Lost | Closing → Closed}`. `Lost` and
/// `Closed` are terminal: once reached, no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Closing,
    /// Connection dropped while in use. The process must exit non-zero.
    Lost,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Lost | ConnectionState::Closed)
    }

    /// CONNACK received.
    pub fn on_connected(self) -> Self {
        match self {
            ConnectionState::Disconnected => ConnectionState::Connected,
            other => other,
        }
    }

    /// The transport reported an error.
    pub fn on_error(self) -> Self {
        match self {
            ConnectionState::Connected => ConnectionState::Lost,
            ConnectionState::Closing => ConnectionState::Closed,
            other => other,
        }
    }

    /// Local disconnect requested. `None` unless connected.
    pub fn on_close_requested(self) -> Option<Self> {
        match self {
            ConnectionState::Connected => Some(ConnectionState::Closing),
            _ => None,
        }
    }

    /// DISCONNECT went out on the wire.
    pub fn on_closed(self) -> Self {
        match self {
            ConnectionState::Connected | ConnectionState::Closing => ConnectionState::Closed,
            other => other,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Lost => "lost",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ═══════════════════════════════════════════════════════════════
//  ConnectionMonitor
// ═══════════════════════════════════════════════════════════════

/// Shared, observable connection state.
///
/// The event loop drives transitions; the supervisor watches for a
/// terminal state.
#[derive(Clone)]
pub struct ConnectionMonitor {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply `f` to the current state and publish the result. Returns the
    /// new state. Terminal states are left untouched.
    pub(crate) fn transition(&self, f: impl FnOnce(ConnectionState) -> ConnectionState) -> ConnectionState {
        let mut next = ConnectionState::Disconnected;
        self.tx.send_if_modified(|state| {
            let prev = *state;
            next = if prev.is_terminal() { prev } else { f(prev) };
            *state = next;
            next != prev
        });
        next
    }

    /// Atomically move `Connected → Closing`. `false` if the connection
    /// was in any other state.
    pub(crate) fn begin_close(&self) -> bool {
        self.tx.send_if_modified(|state| match state.on_close_requested() {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        })
    }

    /// Resolve once the state is terminal.
    pub async fn wait_terminal(&self) -> ConnectionState {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            // Unreachable while `self` holds the sender.
            Err(_) => self.state(),
        }
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionMonitor").field(&self.state()).finish()
    }
}
