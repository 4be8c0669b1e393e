//! Trigger table for listening clients

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::matcher::{Trigger, display_triggers};
use crate::{Error, Result};

/// `GET /api/triggers` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggersResponse {
    /// One entry per keyword, in configuration order
    pub triggers: Vec<Trigger>,
    /// Cooldown the listener should apply before sending
    pub cooldown_ms: u64,
}

impl TriggersResponse {
    /// Triggers ready for matching (deserialization drops the normalized form)
    #[must_use]
    pub fn into_triggers(self) -> Vec<Trigger> {
        self.triggers.into_iter().map(Trigger::renormalized).collect()
    }
}

async fn list_triggers(State(state): State<Arc<ApiState>>) -> Json<TriggersResponse> {
    Json(TriggersResponse {
        triggers: display_triggers(&state.triggers),
        cooldown_ms: state.cooldown_ms,
    })
}

/// Fetch the trigger table from the relay serving `relay_ws_url`
///
/// # Errors
///
/// Returns error if the URL is unusable or the request fails
pub async fn fetch(relay_ws_url: &str) -> Result<TriggersResponse> {
    let url = triggers_url(relay_ws_url)?;
    tracing::debug!(url = %url, "fetching triggers");

    let response = reqwest::get(&url)
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(response)
}

/// `ws://host:port/ws` -> `http://host:port/api/triggers`
///
/// # Errors
///
/// Returns error if the URL has no scheme or an unsupported one
pub fn triggers_url(relay_ws_url: &str) -> Result<String> {
    let (scheme, rest) = relay_ws_url
        .split_once("://")
        .ok_or_else(|| Error::Config(format!("relay URL has no scheme: {relay_ws_url}")))?;

    let scheme = match scheme {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => {
            return Err(Error::Config(format!(
                "unsupported relay URL scheme: {other}"
            )));
        }
    };

    let authority = rest.split('/').next().unwrap_or(rest);
    Ok(format!("{scheme}://{authority}/api/triggers"))
}

/// Build triggers router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/triggers", get(list_triggers))
        .with_state(state)
}
