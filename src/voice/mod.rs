//! Voice destination handling
//!
//! A voice destination is wherever cues are rendered. The platform side is
//! consumed through two traits: [`VoiceGateway`] opens connections and
//! [`VoiceConnection`] reports state transitions and accepts audio. The
//! [`VoiceConnectionManager`] owns the reconnection policy.

mod manager;
mod speaker;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio::sync::watch;

use crate::Result;
use crate::playback::AudioResource;

pub use manager::{
    JOIN_TIMEOUT, MAX_REJOIN_ATTEMPTS, REJOIN_BACKOFF_STEP, SESSION_RECOVERY_TIMEOUT,
    VoiceConnectionManager,
};
pub use speaker::{SpeakerConnection, SpeakerGateway, output_devices};

/// Close code sent when the voice session was invalidated server-side
pub const SESSION_INVALIDATED_CLOSE_CODE: u16 = 4014;

/// Why a voice connection dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The session was invalidated (close code 4014); the transport may recover on its own
    SessionInvalidated,
    /// Any other loss of connection
    Other {
        /// Transport close code, if one was received
        close_code: Option<u16>,
    },
}

impl DisconnectReason {
    /// Classify a transport close code
    #[must_use]
    pub const fn from_close_code(code: u16) -> Self {
        if code == SESSION_INVALIDATED_CLOSE_CODE {
            Self::SessionInvalidated
        } else {
            Self::Other {
                close_code: Some(code),
            }
        }
    }
}

/// Lifecycle of a voice connection
///
/// Serializes as its [`name`](Self::name); the disconnect reason is
/// reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Negotiating with the platform
    Signalling,
    /// Establishing the media transport
    Connecting,
    /// Able to play audio
    Ready,
    /// Lost; may recover through a rejoin
    Disconnected(DisconnectReason),
    /// Terminal; a fresh join is required
    Destroyed,
}

impl VoiceState {
    /// Short name for logs and status output
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Signalling => "signalling",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Disconnected(_) => "disconnected",
            Self::Destroyed => "destroyed",
        }
    }

    /// Why the connection dropped, while disconnected
    #[must_use]
    pub const fn reason(&self) -> Option<DisconnectReason> {
        match self {
            Self::Disconnected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl Serialize for VoiceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// A live connection to one voice destination
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Destination this connection targets
    fn destination(&self) -> &str;

    /// Subscribe to state transitions
    fn subscribe(&self) -> watch::Receiver<VoiceState>;

    /// Current state
    fn state(&self) -> VoiceState {
        *self.subscribe().borrow()
    }

    /// Ask the connection to re-enter `Connecting`
    ///
    /// Returns false if the connection is destroyed.
    fn rejoin(&self) -> bool;

    /// Tear the connection down for good
    fn destroy(&self);

    /// Render a resource, returning when it has finished
    async fn play(&self, resource: AudioResource) -> Result<()>;
}

/// Opens connections to voice destinations
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Open a new connection to `destination`
    ///
    /// The connection starts in `Signalling` and reports its own progress.
    async fn connect(&self, destination: &str) -> Result<Arc<dyn VoiceConnection>>;
}
