//! Wire protocol between listener and relay
//!
//! A single message type crosses the channel, as one JSON text frame:
//!
//! ```json
//! {"type":"hit","keyword":"bell","text":"ring the bell","ts":1700000000000,"volume":1.0}
//! ```
//!
//! Frames with an unknown `type` are ignored. A `hit` without a `keyword`
//! is rejected.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A keyword hit sent from the listener to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitMessage {
    /// Matched keyword
    pub keyword: String,

    /// Transcript the keyword was found in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Detection time, epoch milliseconds
    #[serde(default)]
    pub ts: i64,

    /// Requested volume in `[0, 2]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Message envelope, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Keyword hit
    Hit(HitMessage),
}

/// Outcome of parsing an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed hit
    Hit(HitMessage),
    /// A structurally valid message of a type this relay does not handle
    Ignored {
        /// The unrecognized `type` value
        kind: String,
    },
}

impl HitMessage {
    /// Serialize as a single-line `hit` frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(&WireMessage::Hit(self.clone()))?)
    }
}

/// Parse one inbound text frame
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the frame is not a JSON object, has no
/// `type`, or is a `hit` with a missing or mistyped field.
pub fn parse_frame(frame: &str) -> Result<Inbound> {
    let value: serde_json::Value = serde_json::from_str(frame)
        .map_err(|e| Error::Protocol(format!("invalid JSON: {e}")))?;

    let serde_json::Value::Object(fields) = &value else {
        return Err(Error::Protocol("frame is not an object".to_string()));
    };

    let kind = fields
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Protocol("missing type".to_string()))?;

    if kind != "hit" {
        return Ok(Inbound::Ignored {
            kind: kind.to_string(),
        });
    }

    if !fields.get("keyword").is_some_and(serde_json::Value::is_string) {
        return Err(Error::Protocol("hit without keyword".to_string()));
    }

    match serde_json::from_value::<WireMessage>(value) {
        Ok(WireMessage::Hit(hit)) => Ok(Inbound::Hit(hit)),
        Err(e) => Err(Error::Protocol(format!("invalid hit: {e}"))),
    }
}
