//! Single-flight playback queue
//!
//! Items are played strictly one after another through a single
//! [`AudioSink`]. The queue runs as one task that owns the FIFO; every
//! mutation arrives as a message, so no locking is needed.
//!
//! Whenever the sink is idle the queue tries to start the head item. A
//! finished or failed playback triggers the same attempt again, so one bad
//! item never stalls the items behind it.

pub mod decode;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::Result;

pub use decode::{AudioResource, OUTPUT_SAMPLE_RATE};

/// Loudest allowed volume
pub const MAX_VOLUME: f64 = 2.0;

/// Clamp a volume into `[0, MAX_VOLUME]`; NaN becomes silence
#[must_use]
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, MAX_VOLUME)
    }
}

/// A sound waiting to be played
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackItem {
    /// Sound file
    pub file: PathBuf,
    /// Volume in `[0, 2]`
    pub volume: f64,
}

impl PlaybackItem {
    /// Create an item, clamping the volume
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, volume: f64) -> Self {
        Self {
            file: file.into(),
            volume: clamp_volume(volume),
        }
    }
}

/// The single audio output the queue feeds
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play a resource to completion
    ///
    /// Returns once the output is idle again.
    async fn play(&self, resource: AudioResource) -> Result<()>;
}

enum Command {
    Enqueue(PlaybackItem),
    Finished {
        file: PathBuf,
        result: Result<()>,
    },
    Len(oneshot::Sender<usize>),
    Clear,
}

/// Handle for submitting items to a running [`PlaybackQueue`]
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl PlaybackHandle {
    /// Submit an item; missing or unreadable sources are dropped by the queue
    pub fn enqueue(&self, item: PlaybackItem) {
        if self.tx.send(Command::Enqueue(item)).is_err() {
            tracing::warn!("playback queue stopped, dropping item");
        }
    }

    /// Number of items waiting (excluding the one playing)
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Len(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Whether nothing is waiting
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every waiting item; the current playback continues
    pub fn clear(&self) {
        let _ = self.tx.send(Command::Clear);
    }
}

/// FIFO of playback items feeding a single sink
pub struct PlaybackQueue<S> {
    sink: Arc<S>,
    items: VecDeque<PlaybackItem>,
    playing: Option<PathBuf>,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl<S: AudioSink + 'static> PlaybackQueue<S> {
    /// Create a queue feeding `sink`
    #[must_use]
    pub fn new(sink: Arc<S>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sink,
            items: VecDeque::new(),
            playing: None,
            tx,
            rx,
        }
    }

    /// Handle for submitting items
    #[must_use]
    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run the queue in a background task
    #[must_use]
    pub fn spawn(self) -> (PlaybackHandle, tokio::task::JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Process commands for the life of the task
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Enqueue(item) => self.enqueue(item).await,
                Command::Finished { file, result } => {
                    match result {
                        Ok(()) => tracing::debug!(file = %file.display(), "playback finished"),
                        Err(e) => {
                            tracing::warn!(file = %file.display(), error = %e, "playback failed");
                        }
                    }
                    self.playing = None;
                    self.start_if_idle();
                }
                Command::Len(reply) => {
                    let _ = reply.send(self.items.len());
                }
                Command::Clear => {
                    let dropped = self.items.len();
                    self.items.clear();
                    tracing::info!(dropped, "playback queue cleared");
                }
            }
        }
    }

    async fn enqueue(&mut self, item: PlaybackItem) {
        if let Err(reason) = check_source(&item.file).await {
            tracing::warn!(
                file = %item.file.display(),
                reason = %reason,
                "sound source unavailable, dropping"
            );
            return;
        }

        tracing::debug!(
            file = %item.file.display(),
            volume = item.volume,
            waiting = self.items.len(),
            "queued playback"
        );
        self.items.push_back(item);
        self.start_if_idle();
    }

    /// Start the head item if the sink is idle
    fn start_if_idle(&mut self) {
        if self.playing.is_some() {
            return;
        }

        let Some(item) = self.items.pop_front() else {
            return;
        };

        self.playing = Some(item.file.clone());

        let sink = Arc::clone(&self.sink);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let file = item.file.clone();
            // A panicking sink still counts as finished
            let result = tokio::spawn(async move { play_item(sink.as_ref(), item).await })
                .await
                .unwrap_or_else(|e| Err(crate::Error::Audio(format!("playback task failed: {e}"))));
            let _ = tx.send(Command::Finished { file, result });
        });
    }
}

async fn play_item<S: AudioSink + ?Sized>(sink: &S, item: PlaybackItem) -> Result<()> {
    let PlaybackItem { file, volume } = item;

    let resource = tokio::task::spawn_blocking(move || AudioResource::load(&file, volume))
        .await
        .map_err(|e| crate::Error::Audio(format!("decode task failed: {e}")))??;

    tracing::info!(
        file = %resource.source.display(),
        volume = resource.volume,
        duration_ms = resource.duration().as_millis(),
        "playing"
    );

    sink.play(resource).await
}

async fn check_source(path: &Path) -> std::result::Result<(), String> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| e.to_string())?;
    if !metadata.is_file() {
        return Err("not a file".to_string());
    }
    tokio::fs::File::open(path)
        .await
        .map(drop)
        .map_err(|e| e.to_string())
}
