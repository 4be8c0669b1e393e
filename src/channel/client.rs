//! Listener half of the channel (WebSocket initiator)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use super::{ConnectionState, RECONNECT_DELAY, ReconnectPolicy};
use crate::protocol::HitMessage;
use crate::status::{StatusCell, Transition};

/// Bound on a single connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Shared {
    url: String,
    status: StatusCell<ConnectionState>,
    /// Present only while connected; dropped on disconnect so nothing is carried over
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    stop: watch::Sender<bool>,
}

impl Shared {
    fn outbound(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Reconnecting WebSocket client carrying hit frames to the relay
#[derive(Clone)]
pub struct ChannelClient {
    shared: Arc<Shared>,
}

impl ChannelClient {
    /// Start connecting to `url` in the background
    #[must_use]
    pub fn connect(url: impl Into<String>) -> Self {
        Self::connect_with_delay(url, RECONNECT_DELAY)
    }

    /// Start connecting with a custom reconnect delay
    #[must_use]
    pub fn connect_with_delay(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            url: url.into(),
            status: StatusCell::new("channel", ConnectionState::Disconnected),
            outbound: Mutex::new(None),
            stop,
        });

        tokio::spawn(run(Arc::clone(&shared), reconnect_delay));

        Self { shared }
    }

    /// Send a hit if connected
    ///
    /// Returns false (and logs) when not connected; the hit is not kept.
    pub fn send(&self, hit: &HitMessage) -> bool {
        let frame = match hit.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode hit");
                return false;
            }
        };

        if self.shared.status.get() != ConnectionState::Connected {
            tracing::info!(keyword = %hit.keyword, "channel not connected, hit dropped");
            return false;
        }

        let sent = self
            .shared
            .outbound()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok());

        if sent {
            tracing::debug!(keyword = %hit.keyword, "hit sent");
        } else {
            tracing::info!(keyword = %hit.keyword, "channel closing, hit dropped");
        }
        sent
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.status.get()
    }

    /// Whether frames can be sent
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to connection state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Transition<ConnectionState>> {
        self.shared.status.subscribe()
    }

    /// Close the connection and stop reconnecting
    pub fn close(&self) {
        self.shared.stop.send_replace(true);
    }
}

async fn run(shared: Arc<Shared>, reconnect_delay: Duration) {
    let mut policy = ReconnectPolicy::new(reconnect_delay);
    let mut stop = shared.stop.subscribe();

    loop {
        if *stop.borrow() {
            break;
        }

        shared.status.set(ConnectionState::Connecting);
        tracing::debug!(url = %shared.url, "connecting to relay");

        let attempt = tokio::select! {
            attempt = tokio::time::timeout(
                CONNECT_TIMEOUT,
                tokio_tungstenite::connect_async(shared.url.as_str()),
            ) => attempt,
            _ = stop.changed() => break,
        };

        match attempt {
            Ok(Ok((socket, _response))) => {
                tracing::info!(url = %shared.url, "connected to relay");
                serve_connection(&shared, socket, &mut stop).await;
                tracing::info!(url = %shared.url, "disconnected from relay");
            }
            Ok(Err(e)) => tracing::warn!(url = %shared.url, error = %e, "relay connection failed"),
            Err(_) => tracing::warn!(url = %shared.url, "relay connection timed out"),
        }

        shared.outbound().take();
        shared.status.set(ConnectionState::Disconnected);

        if *stop.borrow() {
            policy.stop();
        }

        let Some(delay) = policy.on_closed() else {
            break;
        };

        tracing::debug!(delay_ms = delay.as_millis(), "reconnect scheduled");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = stop.changed() => policy.stop(),
        }

        if !policy.on_timer_fired() {
            break;
        }
    }

    shared.outbound().take();
    shared.status.set(ConnectionState::Disconnected);
    tracing::debug!(url = %shared.url, "channel client stopped");
}

async fn serve_connection<S>(
    shared: &Shared,
    socket: tokio_tungstenite::WebSocketStream<S>,
    stop: &mut watch::Receiver<bool>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *shared.outbound() = Some(tx);
    shared.status.set(ConnectionState::Connected);

    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "send to relay failed");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Text(text))) => {
                    // The relay defines no data messages for listeners
                    tracing::debug!(len = text.len(), "ignoring message from relay");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "relay connection error");
                    break;
                }
            },
            _ = stop.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    shared.outbound().take();
}
