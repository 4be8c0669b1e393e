//! Health check endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::channel::ConnectionState;
use crate::status::Transition;
use crate::voice::{DisconnectReason, VoiceConnectionManager, VoiceState};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub channel: ChannelStatus,
    pub voice: VoiceStatus,
}

/// Listener side of the channel
#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    #[serde(flatten)]
    pub transition: Transition<ConnectionState>,
    pub clients: usize,
}

/// Voice destination
#[derive(Debug, Serialize)]
pub struct VoiceStatus {
    #[serde(flatten)]
    pub transition: Transition<VoiceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DisconnectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl VoiceStatus {
    /// Snapshot the manager's state
    #[must_use]
    pub fn of(voice: &VoiceConnectionManager) -> Self {
        let transition = voice.status();
        Self {
            reason: transition.state.reason(),
            transition,
            destination: voice.destination(),
        }
    }
}

/// Liveness check with channel and voice status
///
/// Always 200 while the process is serving; degraded voice is reported, not failed.
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        channel: ChannelStatus {
            transition: state.presence.state(),
            clients: state.presence.clients(),
        },
        voice: VoiceStatus::of(&state.voice),
    })
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}
