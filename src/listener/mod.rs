//! Listening side: recognition session supervision
//!
//! A [`RecognitionEngine`] produces transcript events. The pure
//! [`Supervisor`] decides what to do with each one (restart, back off,
//! rebuild, emit a hit) and the runtime in [`session`] carries those
//! decisions out with real timers and a real engine instance.

pub mod lines;
pub mod session;
pub mod supervisor;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use lines::LineEngineFactory;
pub use session::{SessionHandle, spawn_session};
pub use supervisor::{Display, Effect, Input, SessionState, Supervisor, TimerKind, TimerToken};

/// One recognition result
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    /// Recognized text
    pub text: String,
    /// Engine confidence in `[0, 1]`
    pub confidence: f32,
    /// Whether the text is final or an interim guess
    pub is_final: bool,
}

impl TranscriptEvent {
    /// A final result
    #[must_use]
    pub fn final_result(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: true,
        }
    }

    /// An interim result
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: 0.0,
            is_final: false,
        }
    }
}

/// Recognition failures reported while listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Nothing was heard; expected during silence
    NoSpeech,
    /// The engine lost its backend
    Network,
    /// Anything else
    Other(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSpeech => write!(f, "no-speech"),
            Self::Network => write!(f, "network"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Events an engine reports
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Listening began
    Started,
    /// A transcript is available
    Result(TranscriptEvent),
    /// Recognition failed; usually followed by `Ended`
    Error(EngineError),
    /// Listening stopped
    Ended,
}

/// Why `start` failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// The engine believes it is still listening
    AlreadyRunning,
    /// Anything else
    Other(String),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already running"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Where an engine reports its events
///
/// Each engine instance gets its own id so events from a discarded
/// instance can be told apart and ignored.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    id: u64,
    tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
}

impl EngineEvents {
    pub(crate) const fn new(id: u64, tx: mpsc::UnboundedSender<(u64, EngineEvent)>) -> Self {
        Self { id, tx }
    }

    /// Report an event; returns false once the session is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send((self.id, event)).is_ok()
    }
}

/// A continuous speech recognizer
#[async_trait]
pub trait RecognitionEngine: Send {
    /// Begin listening
    ///
    /// # Errors
    ///
    /// Returns [`StartError::AlreadyRunning`] if the engine is already
    /// listening, or [`StartError::Other`] for anything else
    async fn start(&mut self) -> std::result::Result<(), StartError>;

    /// Stop listening; no further events are expected
    async fn stop(&mut self);
}

/// Builds engine instances; the session discards and rebuilds them freely
pub trait EngineFactory: Send + Sync {
    /// Build a fresh engine reporting to `events`
    fn build(&self, events: EngineEvents) -> Box<dyn RecognitionEngine>;
}
