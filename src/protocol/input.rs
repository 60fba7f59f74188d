//! JSON input envelopes
//!
//! Every message is an object with a `type` discriminator. Viewer to server:
//! `touch`, `swipe`, `key`, `navigation`, `ping`, `report`. Server to viewer:
//! `connected`, `pong`, `error`, `screen_info`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::WireError;
use crate::input::{InputCommand, KeyPhase, NavigationTarget, TouchAction, DEFAULT_SWIPE_MS};
use crate::quality::PerformanceReport;

const CLIENT_TYPES: &[&str] = &["touch", "swipe", "key", "navigation", "ping", "report"];

/// Message sent by a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Touch {
        action: TouchAction,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u32>,
    },
    Swipe {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u32>,
    },
    Key {
        code: u32,
        #[serde(default)]
        phase: KeyPhase,
    },
    Navigation {
        target: NavigationTarget,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    Report(PerformanceReport),
}

impl ClientMessage {
    /// The input command carried by this message, if any
    pub fn into_input_command(self) -> Option<InputCommand> {
        match self {
            ClientMessage::Touch {
                action,
                x,
                y,
                duration_ms,
            } => Some(InputCommand::touch(action, x, y, duration_ms)),
            ClientMessage::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
                duration_ms,
            } => Some(InputCommand::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
                duration_ms: duration_ms.unwrap_or(DEFAULT_SWIPE_MS),
            }),
            ClientMessage::Key { code, phase } => Some(InputCommand::Key { code, phase }),
            ClientMessage::Navigation { target } => Some(InputCommand::Navigation { target }),
            ClientMessage::Ping { .. } | ClientMessage::Report(_) => None,
        }
    }
}

/// Decoded viewer message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ClientMessage),
    /// Well-formed envelope with a `type` this server does not handle
    Unrecognized(String),
}

/// Decode one viewer text message
///
/// Malformed JSON, a missing `type`, or missing fields for a known type are
/// errors for this message only.
pub fn decode_client_message(text: &str) -> Result<Inbound, WireError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| WireError::InvalidJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(WireError::MissingType)?
        .to_string();

    if !CLIENT_TYPES.contains(&kind.as_str()) {
        return Ok(Inbound::Unrecognized(kind));
    }

    serde_json::from_value(value)
        .map(Inbound::Message)
        .map_err(|e| WireError::InvalidMessage {
            kind,
            reason: e.to_string(),
        })
}

/// Message sent to a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: Uuid,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    Error {
        message: String,
    },
    ScreenInfo {
        width: u32,
        height: u32,
        scale_factor: f32,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
