//! HTTP API server for the chime relay
//!
//! Listeners attach over `GET /ws`. `GET /health` reports channel and voice
//! status, `GET /api/triggers` serves the trigger table to listening clients,
//! and `POST /api/voice/join` / `POST /api/voice/leave` move the relay
//! between voice destinations at runtime.

pub mod health;
pub mod triggers;
pub mod voice;
pub mod websocket;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::channel::ChannelPresence;
use crate::matcher::Trigger;
use crate::voice::VoiceConnectionManager;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Inbound frames for the hit relay
    pub relay_inbox: mpsc::Sender<String>,
    /// Attached listeners
    pub presence: Arc<ChannelPresence>,
    /// Voice destination
    pub voice: VoiceConnectionManager,
    /// Triggers served to listeners
    pub triggers: Arc<Vec<Trigger>>,
    /// Cooldown listeners should apply locally
    pub cooldown_ms: u64,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    state: ApiState,
    static_dir: Option<PathBuf>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub const fn new(state: ApiState) -> Self {
        Self {
            state,
            static_dir: None,
        }
    }

    /// Serve static files (the listening UI) from `dir`
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(self.state),
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .merge(websocket::router(self.state.clone()))
            .merge(health::router(self.state.clone()))
            .nest(
                "/api",
                triggers::router(self.state.clone()).merge(voice::router(self.state.clone())),
            );

        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "relay listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Channel(format!("API server error: {e}")))?;

        Ok(())
    }
}
