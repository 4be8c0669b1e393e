//! Recognition engine fed by transcript lines
//!
//! Each input line is one recognition result:
//!
//! ```text
//! ring the bell          final, confidence 1.0
//! 0.42|ring the bell     final, confidence 0.42
//! ~ring the              interim
//! ```
//!
//! Useful behind an external recognizer that prints transcripts, and for
//! driving a session by hand from a terminal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use super::{EngineEvent, EngineEvents, EngineFactory, RecognitionEngine, StartError, TranscriptEvent};

/// Parse one transcript line; blank lines yield nothing
#[must_use]
pub fn parse_line(line: &str) -> Option<TranscriptEvent> {
    let line = line.trim();
    let (is_final, line) = line
        .strip_prefix('~')
        .map_or((true, line), |rest| (false, rest.trim_start()));

    let (confidence, text) = match line.split_once('|') {
        Some((prefix, rest)) => match prefix.trim().parse::<f32>() {
            Ok(c) if c.is_finite() => (c.clamp(0.0, 1.0), rest.trim()),
            _ => (1.0, line),
        },
        None => (1.0, line),
    };

    if text.is_empty() {
        return None;
    }

    Some(TranscriptEvent {
        text: text.to_string(),
        confidence: if is_final { confidence } else { 0.0 },
        is_final,
    })
}

struct Source<R> {
    lines: Mutex<Lines<R>>,
    exhausted: AtomicBool,
    closed: Notify,
}

/// Builds [`LineEngine`]s sharing one line source
pub struct LineEngineFactory<R> {
    input: Arc<Source<R>>,
}

impl<R> LineEngineFactory<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Read transcript lines from `reader`
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            input: Arc::new(Source {
                lines: Mutex::new(reader.lines()),
                exhausted: AtomicBool::new(false),
                closed: Notify::new(),
            }),
        }
    }

    /// Resolves once the source has reached end of input
    pub async fn closed(&self) {
        let notified = self.input.closed.notified();
        if self.input.exhausted.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl<R> EngineFactory for LineEngineFactory<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn build(&self, events: EngineEvents) -> Box<dyn RecognitionEngine> {
        Box::new(LineEngine {
            input: Arc::clone(&self.input),
            events,
            reader: None,
        })
    }
}

/// One engine instance reading from the shared source
pub struct LineEngine<R> {
    input: Arc<Source<R>>,
    events: EngineEvents,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl<R> RecognitionEngine for LineEngine<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn start(&mut self) -> Result<(), StartError> {
        if self.input.exhausted.load(Ordering::SeqCst) {
            return Err(StartError::Other("transcript input closed".to_string()));
        }
        if self.reader.as_ref().is_some_and(|r| !r.is_finished()) {
            return Err(StartError::AlreadyRunning);
        }

        let input = Arc::clone(&self.input);
        let events = self.events.clone();
        self.reader = Some(tokio::spawn(async move {
            events.emit(EngineEvent::Started);
            read_lines(&input, &events).await;
            events.emit(EngineEvent::Ended);
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl<R> Drop for LineEngine<R> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_lines<R>(input: &Source<R>, events: &EngineEvents)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines.lock().await;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(transcript) = parse_line(&line) {
                    if !events.emit(EngineEvent::Result(transcript)) {
                        return;
                    }
                }
            }
            Ok(None) => {
                tracing::info!("transcript input closed");
                input.exhausted.store(true, Ordering::SeqCst);
                input.closed.notify_waiters();
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcript input error");
                events.emit(EngineEvent::Error(super::EngineError::Other(e.to_string())));
                return;
            }
        }
    }
}
