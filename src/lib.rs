//! Chime relay - spoken keywords to audio cues
//!
//! A listening client turns transcripts into keyword hits and sends them
//! over a resilient WebSocket channel. The relay validates each hit,
//! applies its own cooldown, picks a sound and plays it into a voice
//! destination, one cue at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────── listener ────────────────┐
//! │ RecognitionEngine -> Supervisor -> match │
//! │            -> cooldown -> ChannelClient  │
//! └────────────────────┬─────────────────────┘
//!                      │ {"type":"hit",...}
//! ┌────────────────────▼─────────────────────┐
//! │ /ws -> HitRelay -> PlaybackQueue         │
//! │        -> VoiceConnectionManager         │
//! └──────────────────── relay ───────────────┘
//! ```

pub mod api;
pub mod channel;
pub mod config;
pub mod cooldown;
pub mod daemon;
pub mod error;
pub mod listener;
pub mod matcher;
pub mod playback;
pub mod protocol;
pub mod relay;
pub mod status;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use matcher::{Trigger, match_keyword};
pub use protocol::HitMessage;
pub use relay::{HitRelay, Verdict};
