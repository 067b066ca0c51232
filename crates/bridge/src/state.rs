//! Bridge lifecycle states and the shutdown signal.

use tokio::sync::watch;

/// States of the bridge daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Handshaking with the upstream server.
    Initializing,
    /// Serving IPC requests.
    Ready,
    /// An auth failure is being resolved by a token refresh.
    RefreshingAuth,
    /// `shutdown` received; finishing outstanding work.
    Draining,
    /// Tearing down.
    Stopping,
    /// The server rejected our session id. Terminal.
    Expired,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::RefreshingAuth => "refreshing-auth",
            Self::Draining => "draining",
            Self::Stopping => "stopping",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Shared state cell with change notification.
#[derive(Clone)]
pub struct StateCell {
    tx: watch::Sender<BridgeState>,
}

impl StateCell {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BridgeState::Initializing);
        Self { tx }
    }

    #[must_use]
    pub fn get(&self) -> BridgeState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: BridgeState) {
        if *self.tx.borrow() != state {
            tracing::info!(state = %state, "bridge state change");
            let _ = self.tx.send(state);
        }
    }

    /// A receiver for waiting on state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_match_wire_values() {
        assert_eq!(BridgeState::RefreshingAuth.to_string(), "refreshing-auth");
        assert_eq!(BridgeState::Expired.to_string(), "expired");
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        cell.set(BridgeState::Ready);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), BridgeState::Ready);
    }
}
