//! Recognition session state machine
//!
//! `Idle -> Starting -> Listening -> (Ended | Errored) -> Idle`
//!
//! [`Supervisor::step`] is a pure transition: it takes one [`Input`] and the
//! current time and returns the [`Effect`]s to carry out. Timers are
//! requested as effects with a [`TimerToken`]; every reschedule or teardown
//! bumps the generation for that timer kind, so a stale firing is ignored.

use std::time::Duration;

use tokio::time::Instant;

use super::{EngineError, EngineEvent, StartError, TranscriptEvent};
use crate::cooldown::CooldownGate;
use crate::matcher::{Trigger, match_keyword};

/// Final results below this confidence are not matched
pub const MIN_CONFIDENCE: f32 = 0.3;

/// Delay before restarting after the engine ends
pub const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Delay before the single retry of an "already running" start
pub const START_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Delay before restarting after a periodic rebuild
pub const RESET_RESTART_DELAY: Duration = Duration::from_millis(500);

/// How often the engine is rebuilt while running
pub const RESET_INTERVAL: Duration = Duration::from_secs(120);

/// How long a final transcript stays on display
pub const DISPLAY_REVERT_DELAY: Duration = Duration::from_secs(3);

/// Consecutive errors before the engine instance is discarded
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not running
    Idle,
    /// Start requested, waiting for the engine
    Starting,
    /// Engine is listening
    Listening,
    /// Engine ended cleanly
    Ended,
    /// Engine reported an error
    Errored,
}

/// Timers the session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Restart after the engine ended or was discarded for errors
    Restart,
    /// Retry after an "already running" start failure
    StartRetry,
    /// Periodic rebuild
    Reset,
    /// Restart after a periodic rebuild
    ResetRestart,
    /// Put the placeholder back on display
    DisplayRevert,
}

impl TimerKind {
    const ALL: [Self; 5] = [
        Self::Restart,
        Self::StartRetry,
        Self::Reset,
        Self::ResetRestart,
        Self::DisplayRevert,
    ];

    const fn index(self) -> usize {
        match self {
            Self::Restart => 0,
            Self::StartRetry => 1,
            Self::Reset => 2,
            Self::ResetRestart => 3,
            Self::DisplayRevert => 4,
        }
    }
}

/// Identifies one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    /// Which timer
    pub kind: TimerKind,
    /// Generation at scheduling time
    pub generation: u64,
}

/// What the transcript area shows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Display {
    /// Nothing heard recently
    #[default]
    Placeholder,
    /// Latest transcript
    Transcript(String),
}

/// Supervisor inputs
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Owner wants the session running
    Start,
    /// Owner tears the session down
    Stop,
    /// The current engine reported something
    Engine(EngineEvent),
    /// The engine refused to start
    StartFailed(StartError),
    /// A scheduled timer fired
    Timer(TimerToken),
}

/// A matched keyword ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Configured keyword
    pub keyword: String,
    /// Transcript it was found in
    pub text: String,
    /// Trigger volume
    pub volume: f64,
}

/// Work for the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start the engine, building one first if none is held
    StartEngine,
    /// Stop and drop the engine instance
    DiscardEngine,
    /// Fire `token` after `after`
    Schedule {
        /// Timer to deliver back as [`Input::Timer`]
        token: TimerToken,
        /// Delay
        after: Duration,
    },
    /// Update the transcript display
    Display(Display),
    /// Forward a hit
    Hit(Hit),
}

/// Pure recognition session state machine
#[derive(Debug)]
pub struct Supervisor {
    triggers: Vec<Trigger>,
    cooldown: CooldownGate,
    state: SessionState,
    running: bool,
    consecutive_errors: u32,
    start_retry_available: bool,
    generations: [u64; 5],
}

impl Supervisor {
    /// Create an idle supervisor matching against `triggers`
    #[must_use]
    pub fn new(triggers: Vec<Trigger>, cooldown: Duration) -> Self {
        Self {
            triggers,
            cooldown: CooldownGate::new(cooldown),
            state: SessionState::Idle,
            running: false,
            consecutive_errors: 0,
            start_retry_available: true,
            generations: [0; 5],
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the owner wants the session running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Consecutive non-trivial errors since the last successful start
    #[must_use]
    pub const fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Apply one input
    pub fn step(&mut self, input: Input, now: Instant) -> Vec<Effect> {
        match input {
            Input::Start => self.on_start(),
            Input::Stop => self.on_stop(),
            Input::Engine(event) => self.on_engine(event, now),
            Input::StartFailed(error) => self.on_start_failed(&error),
            Input::Timer(token) => self.on_timer(token),
        }
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.running {
            return Vec::new();
        }

        tracing::info!(triggers = self.triggers.len(), "recognition session starting");
        self.running = true;
        self.state = SessionState::Starting;

        vec![
            Effect::StartEngine,
            self.schedule(TimerKind::Reset, RESET_INTERVAL),
        ]
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        if self.running {
            tracing::info!("recognition session stopped");
        }
        self.running = false;
        self.state = SessionState::Idle;
        self.consecutive_errors = 0;
        self.start_retry_available = true;
        for kind in TimerKind::ALL {
            self.cancel(kind);
        }

        vec![Effect::DiscardEngine, Effect::Display(Display::Placeholder)]
    }

    fn on_engine(&mut self, event: EngineEvent, now: Instant) -> Vec<Effect> {
        if !self.running {
            return Vec::new();
        }

        match event {
            EngineEvent::Started => {
                self.state = SessionState::Listening;
                self.consecutive_errors = 0;
                self.start_retry_available = true;
                tracing::debug!("recognition listening");
                Vec::new()
            }
            EngineEvent::Result(transcript) => self.on_transcript(transcript, now),
            EngineEvent::Error(EngineError::NoSpeech) => {
                tracing::debug!("no speech detected");
                Vec::new()
            }
            EngineEvent::Error(error) => self.on_error(&error),
            EngineEvent::Ended => {
                self.state = SessionState::Ended;
                tracing::debug!("recognition ended, restarting");
                vec![self.schedule(TimerKind::Restart, RESTART_DELAY)]
            }
        }
    }

    fn on_transcript(&mut self, transcript: TranscriptEvent, now: Instant) -> Vec<Effect> {
        let text = transcript.text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let mut effects = vec![Effect::Display(Display::Transcript(text.to_string()))];
        if !transcript.is_final {
            return effects;
        }

        effects.push(self.schedule(TimerKind::DisplayRevert, DISPLAY_REVERT_DELAY));

        if transcript.confidence < MIN_CONFIDENCE {
            tracing::debug!(
                confidence = transcript.confidence,
                "low confidence transcript ignored"
            );
            return effects;
        }

        let Some(trigger) = match_keyword(text, &self.triggers) else {
            return effects;
        };

        if !self.cooldown.try_acquire(now) {
            tracing::debug!(keyword = %trigger.keyword, "keyword inside cooldown");
            return effects;
        }

        tracing::info!(keyword = %trigger.keyword, text, "keyword detected");
        effects.push(Effect::Hit(Hit {
            keyword: trigger.keyword.clone(),
            text: text.to_string(),
            volume: trigger.volume,
        }));
        effects
    }

    fn on_error(&mut self, error: &EngineError) -> Vec<Effect> {
        self.state = SessionState::Errored;
        self.consecutive_errors += 1;
        tracing::warn!(
            error = %error,
            consecutive = self.consecutive_errors,
            "recognition error"
        );

        if self.consecutive_errors < MAX_CONSECUTIVE_ERRORS {
            return Vec::new();
        }

        tracing::warn!("too many recognition errors, rebuilding engine");
        self.consecutive_errors = 0;
        vec![
            Effect::DiscardEngine,
            self.schedule(TimerKind::Restart, RESTART_DELAY),
        ]
    }

    fn on_start_failed(&mut self, error: &StartError) -> Vec<Effect> {
        if !self.running {
            return Vec::new();
        }

        self.state = SessionState::Errored;
        match error {
            StartError::AlreadyRunning if self.start_retry_available => {
                tracing::debug!("engine already running, rebuilding and retrying");
                self.start_retry_available = false;
                vec![
                    Effect::DiscardEngine,
                    self.schedule(TimerKind::StartRetry, START_RETRY_DELAY),
                ]
            }
            _ => {
                tracing::warn!(error = %error, "recognition failed to start");
                Vec::new()
            }
        }
    }

    fn on_timer(&mut self, token: TimerToken) -> Vec<Effect> {
        if self.generations[token.kind.index()] != token.generation {
            return Vec::new();
        }

        match token.kind {
            TimerKind::DisplayRevert => vec![Effect::Display(Display::Placeholder)],
            _ if !self.running => Vec::new(),
            TimerKind::Restart | TimerKind::StartRetry | TimerKind::ResetRestart => {
                self.state = SessionState::Starting;
                vec![Effect::StartEngine]
            }
            TimerKind::Reset => {
                tracing::debug!("periodic engine rebuild");
                self.state = SessionState::Idle;
                // A restart already in flight would race the rebuild
                self.cancel(TimerKind::Restart);
                vec![
                    Effect::DiscardEngine,
                    self.schedule(TimerKind::ResetRestart, RESET_RESTART_DELAY),
                    self.schedule(TimerKind::Reset, RESET_INTERVAL),
                ]
            }
        }
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) -> Effect {
        self.cancel(kind);
        Effect::Schedule {
            token: TimerToken {
                kind,
                generation: self.generations[kind.index()],
            },
            after,
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.generations[kind.index()] += 1;
    }
}
