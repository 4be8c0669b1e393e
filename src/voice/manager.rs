//! Voice connection lifecycle
//!
//! Holds at most one live connection. Each connection gets a supervisor
//! task that follows its state transitions and applies the recovery policy:
//!
//! - `Disconnected(SessionInvalidated)`: give the transport
//!   [`SESSION_RECOVERY_TIMEOUT`] to re-enter `Connecting`, else destroy.
//! - `Disconnected(Other)`: rejoin after `attempt × REJOIN_BACKOFF_STEP`,
//!   up to [`MAX_REJOIN_ATTEMPTS`] times, then destroy.
//! - `Destroyed`: release the held reference so the next join starts clean.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{DisconnectReason, VoiceConnection, VoiceGateway, VoiceState};
use crate::playback::{AudioResource, AudioSink};
use crate::status::{StatusCell, Transition};
use crate::{Error, Result};

/// How long a join waits for `Ready`
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an invalidated session gets to start reconnecting
pub const SESSION_RECOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rejoin attempts before giving up on a connection
pub const MAX_REJOIN_ATTEMPTS: u32 = 5;

/// Backoff unit; attempt `n` waits `n` units
pub const REJOIN_BACKOFF_STEP: Duration = Duration::from_secs(1);

struct Held {
    id: u64,
    connection: Arc<dyn VoiceConnection>,
    supervisor: JoinHandle<()>,
}

struct Inner {
    gateway: Arc<dyn VoiceGateway>,
    held: Mutex<Option<Held>>,
    status: StatusCell<VoiceState>,
    next_id: AtomicU64,
    join_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Held>> {
        self.held.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Publish a state for connection `id`, if it is still the held one
    fn publish(&self, id: u64, state: VoiceState) {
        let held = self.lock();
        if held.as_ref().is_some_and(|h| h.id == id) {
            self.status.set(state);
        }
    }

    /// Drop the held reference if it still belongs to connection `id`
    fn release(&self, id: u64) {
        let mut held = self.lock();
        if held.as_ref().is_some_and(|h| h.id == id) {
            *held = None;
            self.status.set(VoiceState::Destroyed);
            tracing::info!(connection = id, "voice connection released");
        }
    }

    /// Destroy and drop whatever is held
    fn destroy_held(&self) {
        let taken = self.lock().take();
        if let Some(held) = taken {
            held.supervisor.abort();
            held.connection.destroy();
            tracing::info!(
                connection = held.id,
                destination = held.connection.destination(),
                "voice connection destroyed"
            );
        }
        self.status.set(VoiceState::Destroyed);
    }
}

/// Owns the single voice connection and its recovery policy
#[derive(Clone)]
pub struct VoiceConnectionManager {
    inner: Arc<Inner>,
}

impl VoiceConnectionManager {
    /// Create a manager that opens connections through `gateway`
    #[must_use]
    pub fn new(gateway: Arc<dyn VoiceGateway>) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                held: Mutex::new(None),
                status: StatusCell::new("voice", VoiceState::Destroyed),
                next_id: AtomicU64::new(1),
                join_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Join `destination` and wait for the connection to become ready
    ///
    /// An existing, non-destroyed connection to the same destination is
    /// reused. Anything else held is destroyed before a new connection is
    /// opened.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses the connection or it does not
    /// reach `Ready` within [`JOIN_TIMEOUT`]
    pub async fn join(&self, destination: &str) -> Result<()> {
        let _guard = self.inner.join_lock.lock().await;

        let reusable = self
            .inner
            .lock()
            .as_ref()
            .filter(|h| {
                h.connection.destination() == destination
                    && h.connection.state() != VoiceState::Destroyed
            })
            .map(|h| (h.id, Arc::clone(&h.connection)));

        let (id, connection) = if let Some(existing) = reusable {
            tracing::debug!(destination, "reusing voice connection");
            existing
        } else {
            self.inner.destroy_held();

            let connection = self.inner.gateway.connect(destination).await?;
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let supervisor = tokio::spawn(supervise(
                Arc::downgrade(&self.inner),
                id,
                Arc::clone(&connection),
            ));

            *self.inner.lock() = Some(Held {
                id,
                connection: Arc::clone(&connection),
                supervisor,
            });
            self.inner.status.set(connection.state());
            tracing::info!(connection = id, destination, "voice connection created");

            (id, connection)
        };

        let mut states = connection.subscribe();
        let ready = tokio::time::timeout(
            JOIN_TIMEOUT,
            states.wait_for(|s| matches!(s, VoiceState::Ready | VoiceState::Destroyed)),
        )
        .await
        .map(|settled| settled.is_ok_and(|s| *s == VoiceState::Ready));

        match ready {
            Ok(true) => {
                self.inner.publish(id, connection.state());
                tracing::info!(connection = id, destination, "voice connection ready");
                Ok(())
            }
            Ok(false) => {
                self.inner.release(id);
                Err(Error::Voice(format!(
                    "connection to {destination} was destroyed while joining"
                )))
            }
            Err(_) => {
                tracing::warn!(connection = id, destination, "voice connection not ready in time");
                self.inner.destroy_held();
                Err(Error::JoinTimeout {
                    destination: destination.to_string(),
                    timeout_ms: u64::try_from(JOIN_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Destroy the held connection, if any
    pub fn leave(&self) {
        self.inner.destroy_held();
    }

    /// Whether a connection is held and ready for audio
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.status.get() == VoiceState::Ready
    }

    /// Destination of the held connection
    #[must_use]
    pub fn destination(&self) -> Option<String> {
        self.inner
            .lock()
            .as_ref()
            .map(|h| h.connection.destination().to_string())
    }

    /// Whether any connection is held
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Current manager-level state (`Destroyed` when nothing is held)
    #[must_use]
    pub fn status(&self) -> Transition<VoiceState> {
        self.inner.status.snapshot()
    }

    /// Subscribe to manager-level state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Transition<VoiceState>> {
        self.inner.status.subscribe()
    }

    fn ready_connection(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.inner
            .lock()
            .as_ref()
            .filter(|h| h.connection.state() == VoiceState::Ready)
            .map(|h| Arc::clone(&h.connection))
    }
}

#[async_trait]
impl AudioSink for VoiceConnectionManager {
    async fn play(&self, resource: AudioResource) -> Result<()> {
        let connection = self
            .ready_connection()
            .ok_or_else(|| Error::Voice("no ready voice connection".to_string()))?;
        connection.play(resource).await
    }
}

/// Follow one connection's transitions and apply the recovery policy
async fn supervise(
    manager: std::sync::Weak<Inner>,
    id: u64,
    connection: Arc<dyn VoiceConnection>,
) {
    let mut states = connection.subscribe();
    let mut rejoin_attempts = 0u32;

    loop {
        let state = *states.borrow_and_update();
        let Some(inner) = manager.upgrade() else {
            return;
        };
        inner.publish(id, state);
        drop(inner);

        match state {
            VoiceState::Ready => rejoin_attempts = 0,
            VoiceState::Disconnected(DisconnectReason::SessionInvalidated) => {
                tracing::warn!(connection = id, "voice session invalidated, waiting for reconnect");
                let recovered = tokio::time::timeout(
                    SESSION_RECOVERY_TIMEOUT,
                    states.wait_for(|s| {
                        matches!(
                            s,
                            VoiceState::Signalling | VoiceState::Connecting | VoiceState::Ready
                        )
                    }),
                )
                .await;

                if !matches!(recovered, Ok(Ok(_))) {
                    tracing::warn!(connection = id, "voice session did not recover, destroying");
                    connection.destroy();
                }
                continue;
            }
            VoiceState::Disconnected(DisconnectReason::Other { close_code }) => {
                if rejoin_attempts < MAX_REJOIN_ATTEMPTS {
                    rejoin_attempts += 1;
                    let delay = REJOIN_BACKOFF_STEP * rejoin_attempts;
                    tracing::info!(
                        connection = id,
                        attempt = rejoin_attempts,
                        close_code,
                        delay_ms = delay.as_millis(),
                        "voice disconnected, rejoining"
                    );
                    tokio::time::sleep(delay).await;

                    // Only rejoin if nothing else happened while we waited
                    if matches!(*states.borrow(), VoiceState::Disconnected(_)) {
                        connection.rejoin();
                    }
                } else {
                    tracing::error!(
                        connection = id,
                        attempts = rejoin_attempts,
                        "voice rejoin attempts exhausted, destroying"
                    );
                    connection.destroy();
                }
            }
            VoiceState::Destroyed => {
                if let Some(inner) = manager.upgrade() {
                    inner.release(id);
                }
                return;
            }
            VoiceState::Signalling | VoiceState::Connecting => {}
        }

        if states.changed().await.is_err() {
            // Connection dropped its sender without reporting Destroyed
            if let Some(inner) = manager.upgrade() {
                inner.release(id);
            }
            return;
        }
    }
}
