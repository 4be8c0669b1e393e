//! Runtime for a recognition session
//!
//! Owns the engine instance and realizes the supervisor's effects with
//! tokio timers. Commands, timer firings and engine events are handled one
//! at a time by a single task.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::supervisor::{Display, Effect, Hit, Input, SessionState, Supervisor, TimerToken};
use super::{EngineEvent, EngineEvents, EngineFactory, RecognitionEngine};
use crate::protocol::HitMessage;

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
}

/// Control and observation handle for a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    display: watch::Receiver<Display>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Begin (or resume) listening
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// Tear down: discard the engine and cancel every pending timer
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Transcript display
    #[must_use]
    pub fn display(&self) -> watch::Receiver<Display> {
        self.display.clone()
    }

    /// Session state
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

/// Spawn a session task
///
/// Hits are delivered on the returned receiver, stamped with the wall-clock
/// detection time. The session starts idle; call [`SessionHandle::start`].
/// It runs until every handle is dropped.
#[must_use]
pub fn spawn_session(
    factory: Arc<dyn EngineFactory>,
    supervisor: Supervisor,
) -> (SessionHandle, mpsc::UnboundedReceiver<HitMessage>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (hit_tx, hit_rx) = mpsc::unbounded_channel();
    let (display_tx, display_rx) = watch::channel(Display::Placeholder);
    let (state_tx, state_rx) = watch::channel(supervisor.state());
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let session = Session {
        factory,
        supervisor,
        engine: None,
        engine_id: 0,
        hits: hit_tx,
        display: display_tx,
        state: state_tx,
        timer_tx,
        event_tx,
    };

    let task = tokio::spawn(session.run(command_rx, timer_rx, event_rx));

    let handle = SessionHandle {
        commands: command_tx,
        display: display_rx,
        state: state_rx,
    };
    (handle, hit_rx, task)
}

struct Session {
    factory: Arc<dyn EngineFactory>,
    supervisor: Supervisor,
    engine: Option<Box<dyn RecognitionEngine>>,
    /// Id of the held engine; events tagged with any other id are stale
    engine_id: u64,
    hits: mpsc::UnboundedSender<HitMessage>,
    display: watch::Sender<Display>,
    state: watch::Sender<SessionState>,
    timer_tx: mpsc::UnboundedSender<TimerToken>,
    event_tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
}

impl Session {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut timers: mpsc::UnboundedReceiver<TimerToken>,
        mut events: mpsc::UnboundedReceiver<(u64, EngineEvent)>,
    ) {
        loop {
            let input = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start) => Input::Start,
                    Some(Command::Stop) => Input::Stop,
                    None => break,
                },
                Some(token) = timers.recv() => Input::Timer(token),
                Some((id, event)) = events.recv() => {
                    if self.engine.is_none() || id != self.engine_id {
                        tracing::trace!(engine = id, ?event, "stale engine event dropped");
                        continue;
                    }
                    Input::Engine(event)
                }
            };

            self.apply(input).await;
        }

        self.apply(Input::Stop).await;
        tracing::debug!("recognition session task finished");
    }

    /// Feed an input and carry out the effects, including follow-up inputs
    async fn apply(&mut self, input: Input) {
        let mut pending = VecDeque::from([input]);

        while let Some(input) = pending.pop_front() {
            let effects = self.supervisor.step(input, Instant::now());
            for effect in effects {
                if let Some(follow_up) = self.perform(effect).await {
                    pending.push_back(follow_up);
                }
            }
            self.state.send_replace(self.supervisor.state());
        }
    }

    async fn perform(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::StartEngine => {
                let engine = self.engine.get_or_insert_with(|| {
                    self.engine_id += 1;
                    tracing::debug!(engine = self.engine_id, "building recognition engine");
                    self.factory
                        .build(EngineEvents::new(self.engine_id, self.event_tx.clone()))
                });
                engine.start().await.err().map(Input::StartFailed)
            }
            Effect::DiscardEngine => {
                if let Some(mut engine) = self.engine.take() {
                    tracing::debug!(engine = self.engine_id, "discarding recognition engine");
                    engine.stop().await;
                }
                None
            }
            Effect::Schedule { token, after } => {
                let tx = self.timer_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(token);
                });
                None
            }
            Effect::Display(display) => {
                self.display.send_replace(display);
                None
            }
            Effect::Hit(hit) => {
                self.forward(hit);
                None
            }
        }
    }

    fn forward(&self, hit: Hit) {
        let message = HitMessage {
            keyword: hit.keyword,
            text: Some(hit.text),
            ts: chrono::Utc::now().timestamp_millis(),
            volume: Some(hit.volume),
        };
        if self.hits.send(message).is_err() {
            tracing::debug!("hit receiver gone");
        }
    }
}
