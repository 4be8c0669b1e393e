//! Hit relay: inbound frames to queued playbacks
//!
//! Every frame from every attached listener funnels through one task, so
//! the cooldown gate and routing decisions are serialized without locks.
//! Rejections are logged and never reported back to the listener.

use std::path::PathBuf;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::SoundMapping;
use crate::cooldown::CooldownGate;
use crate::playback::{PlaybackHandle, PlaybackItem, clamp_volume};
use crate::protocol::{HitMessage, Inbound, parse_frame};
use crate::status::Transition;
use crate::voice::VoiceState;

/// What happened to an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Accepted and handed to the playback queue
    Queued(PlaybackItem),
    /// A message type the relay does not handle
    Ignored,
    /// Malformed frame or invalid hit
    Rejected,
    /// Arrived inside the cooldown window
    CoolingDown,
    /// Accepted, but the voice destination was not ready
    NotReady,
}

/// Validates hits, applies the relay-side cooldown and routes to sounds
pub struct HitRelay {
    sounds: Vec<SoundMapping>,
    cooldown: CooldownGate,
    voice: watch::Receiver<Transition<VoiceState>>,
    playback: PlaybackHandle,
}

impl HitRelay {
    /// Create a relay
    ///
    /// `sounds` must be non-empty; the first mapping is the fallback.
    #[must_use]
    pub fn new(
        sounds: Vec<SoundMapping>,
        cooldown: std::time::Duration,
        voice: watch::Receiver<Transition<VoiceState>>,
        playback: PlaybackHandle,
    ) -> Self {
        Self {
            sounds,
            cooldown: CooldownGate::new(cooldown),
            voice,
            playback,
        }
    }

    /// Handle one raw text frame received at `now`
    pub fn handle_frame(&mut self, frame: &str, now: Instant) -> Verdict {
        match parse_frame(frame) {
            Ok(Inbound::Hit(hit)) => self.handle_hit(&hit, now),
            Ok(Inbound::Ignored { kind }) => {
                tracing::debug!(kind = %kind, "ignoring message");
                Verdict::Ignored
            }
            Err(e) => {
                tracing::warn!(error = %e, "rejected frame");
                Verdict::Rejected
            }
        }
    }

    /// Handle a parsed hit received at `now`
    pub fn handle_hit(&mut self, hit: &HitMessage, now: Instant) -> Verdict {
        if !self.cooldown.try_acquire(now) {
            tracing::debug!(
                keyword = %hit.keyword,
                remaining_ms = self.cooldown.remaining(now).as_millis(),
                "hit inside cooldown, dropped"
            );
            return Verdict::CoolingDown;
        }

        let Some((file, default_volume)) = self.resolve(&hit.keyword) else {
            tracing::error!("no sounds configured, dropping hit");
            return Verdict::Rejected;
        };
        let volume = clamp_volume(hit.volume.unwrap_or(default_volume));

        let voice = self.voice.borrow().state;
        if voice != VoiceState::Ready {
            tracing::info!(
                keyword = %hit.keyword,
                voice = voice.name(),
                "voice not ready, hit dropped"
            );
            return Verdict::NotReady;
        }

        let item = PlaybackItem::new(file, volume);
        tracing::info!(
            keyword = %hit.keyword,
            file = %item.file.display(),
            volume = item.volume,
            "hit accepted"
        );
        self.playback.enqueue(item.clone());
        Verdict::Queued(item)
    }

    /// Sound for `keyword`: first case-insensitive exact match, else the first mapping
    fn resolve(&self, keyword: &str) -> Option<(PathBuf, f64)> {
        let keyword = keyword.trim();
        let mapping = if keyword.is_empty() {
            None
        } else {
            self.sounds.iter().find(|m| m.has_keyword(keyword))
        };

        mapping
            .or_else(|| {
                tracing::debug!(keyword, "no mapping for keyword, using fallback");
                self.sounds.first()
            })
            .map(|m| (m.file.clone(), m.volume))
    }

    /// Consume frames until every sender is dropped
    pub async fn run(mut self, mut inbox: mpsc::Receiver<String>) {
        tracing::debug!(sounds = self.sounds.len(), "hit relay started");
        while let Some(frame) = inbox.recv().await {
            self.handle_frame(&frame, Instant::now());
        }
        tracing::debug!("hit relay stopped");
    }

    /// Run in a background task
    #[must_use]
    pub fn spawn(self, inbox: mpsc::Receiver<String>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(inbox))
    }
}
