//! The relay daemon: wires configuration into the running pipeline
//!
//! ```text
//! /ws -> HitRelay -> PlaybackQueue -> VoiceConnectionManager -> voice destination
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::api::{ApiServerBuilder, ApiState};
use crate::channel::ChannelPresence;
use crate::playback::PlaybackQueue;
use crate::relay::HitRelay;
use crate::voice::{SpeakerGateway, VoiceConnectionManager, VoiceGateway};
use crate::{Config, Result};

/// Frames buffered between the WebSocket handlers and the relay task
const RELAY_INBOX_CAPACITY: usize = 64;

/// The chime relay daemon
pub struct Daemon {
    config: Config,
    voice: VoiceConnectionManager,
}

impl Daemon {
    /// Create a daemon rendering to local audio output devices
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_gateway(config, Arc::new(SpeakerGateway))
    }

    /// Create a daemon rendering through `gateway`
    #[must_use]
    pub fn with_gateway(config: Config, gateway: Arc<dyn VoiceGateway>) -> Self {
        Self {
            config,
            voice: VoiceConnectionManager::new(gateway),
        }
    }

    /// The daemon's voice connection manager
    #[must_use]
    pub const fn voice(&self) -> &VoiceConnectionManager {
        &self.voice
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind {addr}: {e}")))?;

        self.serve(listener, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
        })
        .await
    }

    /// Serve on `listener` until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Self { config, voice } = self;

        tracing::info!(
            sounds = config.sounds.len(),
            cooldown_ms = config.cooldown_ms(),
            destination = ?config.voice.destination,
            "chime relay starting"
        );

        let (playback, queue_task) = PlaybackQueue::new(Arc::new(voice.clone())).spawn();

        let (relay_inbox, inbox) = mpsc::channel(RELAY_INBOX_CAPACITY);
        let relay_task = HitRelay::new(
            config.sounds.clone(),
            config.cooldown,
            voice.subscribe(),
            playback,
        )
        .spawn(inbox);

        if let Some(destination) = config.voice.destination.clone() {
            let voice = voice.clone();
            tokio::spawn(async move {
                if let Err(e) = voice.join(&destination).await {
                    tracing::error!(destination = %destination, error = %e, "voice join failed");
                }
            });
        } else {
            tracing::info!("no voice destination configured, hits are dropped until POST /api/voice/join");
        }

        let state = ApiState {
            relay_inbox,
            presence: Arc::new(ChannelPresence::new()),
            voice: voice.clone(),
            triggers: Arc::new(config.triggers()),
            cooldown_ms: config.cooldown_ms(),
        };

        let server = ApiServerBuilder::new(state)
            .static_dir(config.server.static_dir.clone())
            .build();

        let result = tokio::select! {
            result = server.serve(listener) => result,
            () = shutdown => Ok(()),
        };

        voice.leave();
        relay_task.abort();
        queue_task.abort();
        tracing::info!("chime relay stopped");

        result
    }
}
