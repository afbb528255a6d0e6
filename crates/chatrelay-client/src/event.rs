//! Events reported by a messaging client

use serde::{Deserialize, Serialize};

/// Something the messaging session reported.
///
/// Clients push these into an mpsc channel; the gateway's event pump is the
/// only consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A fresh pairing string that a human must scan to authorize the session
    PairingCode { code: String },
    /// The session is authenticated and live
    Opened,
    /// The session ended; the supervisor decides whether to restart it
    Closed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// An inbound chat message
    Message { from: String, body: String },
}

impl ClientEvent {
    pub fn pairing_code(code: impl Into<String>) -> Self {
        Self::PairingCode { code: code.into() }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: Some(reason.into()),
        }
    }

    pub fn message(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Message {
            from: from.into(),
            body: body.into(),
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingCode { .. } => "pairing_code",
            Self::Opened => "opened",
            Self::Closed { .. } => "closed",
            Self::Message { .. } => "message",
        }
    }
}
