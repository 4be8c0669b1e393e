//! Observable connection status with timestamped transitions

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// A state value and the moment it was entered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition<S> {
    /// Current state
    pub state: S,
    /// When the state was entered
    pub since: DateTime<Utc>,
}

impl<S> Transition<S> {
    fn now(state: S) -> Self {
        Self {
            state,
            since: Utc::now(),
        }
    }
}

/// Single-writer status cell
///
/// Observers subscribe to a watch channel and see every distinct transition.
/// Setting the current state again is a no-op and does not notify.
#[derive(Debug)]
pub struct StatusCell<S> {
    name: &'static str,
    tx: watch::Sender<Transition<S>>,
}

impl<S> StatusCell<S>
where
    S: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    /// Create a cell holding `initial`
    #[must_use]
    pub fn new(name: &'static str, initial: S) -> Self {
        let (tx, _rx) = watch::channel(Transition::now(initial));
        Self { name, tx }
    }

    /// Move to `state`, returning true if it differed from the current one
    pub fn set(&self, state: S) -> bool {
        let mut previous = None;
        let changed = self.tx.send_if_modified(|current| {
            if current.state == state {
                return false;
            }
            previous = Some(std::mem::replace(current, Transition::now(state.clone())));
            true
        });

        if let Some(previous) = previous {
            tracing::debug!(
                status = self.name,
                from = ?previous.state,
                to = ?state,
                "status transition"
            );
        }

        changed
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> S {
        self.tx.borrow().state.clone()
    }

    /// Current state with its transition time
    #[must_use]
    pub fn snapshot(&self) -> Transition<S> {
        self.tx.borrow().clone()
    }

    /// Subscribe to transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Transition<S>> {
        self.tx.subscribe()
    }
}
