//! Resilient duplex channel between listener and relay
//!
//! Both halves share [`ConnectionState`]. The listener side initiates and
//! reconnects after [`RECONNECT_DELAY`] whenever the connection drops while
//! it still wants to be connected; the relay side accepts and reports
//! `Connected` while at least one listener is attached.
//!
//! Delivery is at-most-once: sending while not connected is a logged no-op
//! and nothing is buffered across reconnects.

mod client;
mod server;

use std::time::Duration;

use serde::Serialize;

pub use client::{CONNECT_TIMEOUT, ChannelClient};
pub use server::ChannelPresence;

/// Delay before a reconnect attempt
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Externally visible state of a channel half
///
/// A terminal failure is reported as `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Frames can be exchanged
    Connected,
}

/// Decides whether and when to reconnect
///
/// At most one reconnect is pending at a time, and none is scheduled once
/// the owner no longer wants a connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    should_connect: bool,
    reconnect_pending: bool,
}

impl ReconnectPolicy {
    /// Create a policy that wants a connection
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            should_connect: true,
            reconnect_pending: false,
        }
    }

    /// The connection closed or errored; returns the delay if a reconnect should be scheduled
    pub const fn on_closed(&mut self) -> Option<Duration> {
        if !self.should_connect || self.reconnect_pending {
            return None;
        }
        self.reconnect_pending = true;
        Some(self.delay)
    }

    /// The reconnect timer fired; returns whether to attempt a connection
    pub const fn on_timer_fired(&mut self) -> bool {
        self.reconnect_pending = false;
        self.should_connect
    }

    /// The owner no longer wants a connection
    pub const fn stop(&mut self) {
        self.should_connect = false;
    }

    /// Whether a reconnect is scheduled
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Whether the owner wants a connection
    #[must_use]
    pub const fn should_connect(&self) -> bool {
        self.should_connect
    }
}
