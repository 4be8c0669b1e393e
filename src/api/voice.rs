//! Voice destination control
//!
//! A destroyed connection stays gone until someone joins again, whether it
//! ran out of rejoins or never became ready. These endpoints are how.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use super::health::VoiceStatus;
use crate::Error;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/voice/join", post(join))
        .route("/voice/leave", post(leave))
        .with_state(state)
}

/// Join request
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Destination to play cues into
    pub destination: String,
}

/// Join `destination`, replacing whatever is held
async fn join(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<VoiceStatus>, VoiceError> {
    let destination = request.destination.trim();
    if destination.is_empty() {
        return Err(VoiceError::BadRequest("Empty destination"));
    }

    tracing::info!(destination, "voice join requested");
    state.voice.join(destination).await.map_err(|e| {
        tracing::warn!(destination, error = %e, "voice join failed");
        match e {
            Error::JoinTimeout { .. } => VoiceError::NotReady(e.to_string()),
            other => VoiceError::JoinFailed(other.to_string()),
        }
    })?;

    Ok(Json(VoiceStatus::of(&state.voice)))
}

/// Leave the current destination
async fn leave(State(state): State<Arc<ApiState>>) -> Json<VoiceStatus> {
    tracing::info!("voice leave requested");
    state.voice.leave();
    Json(VoiceStatus::of(&state.voice))
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    BadRequest(&'static str),
    NotReady(String),
    JoinFailed(String),
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
            Self::NotReady(msg) => (StatusCode::GATEWAY_TIMEOUT, "not_ready", msg),
            Self::JoinFailed(msg) => (StatusCode::BAD_GATEWAY, "join_failed", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
