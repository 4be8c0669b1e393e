//! Relay half of the channel: tracks attached listeners

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

use super::ConnectionState;
use crate::status::{StatusCell, Transition};

/// Listener attachment count and the derived connection state
///
/// `Connected` while at least one listener is attached, else `Disconnected`.
#[derive(Debug)]
pub struct ChannelPresence {
    clients: AtomicUsize,
    status: StatusCell<ConnectionState>,
}

impl Default for ChannelPresence {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelPresence {
    /// No listeners attached
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: AtomicUsize::new(0),
            status: StatusCell::new("channel", ConnectionState::Disconnected),
        }
    }

    /// A listener attached; returns the new count
    pub fn attach(&self) -> usize {
        let count = self.clients.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.set(ConnectionState::Connected);
        count
    }

    /// A listener detached; returns the new count
    pub fn detach(&self) -> usize {
        let previous = self
            .clients
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        let count = previous.saturating_sub(1);
        if count == 0 {
            self.status.set(ConnectionState::Disconnected);
        }
        count
    }

    /// Attached listener count
    #[must_use]
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Current state with its transition time
    #[must_use]
    pub fn state(&self) -> Transition<ConnectionState> {
        self.status.snapshot()
    }

    /// Subscribe to state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Transition<ConnectionState>> {
        self.status.subscribe()
    }
}
