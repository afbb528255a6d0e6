//! Gateway wire protocol — JSON shapes sent to real-time subscribers and REST callers

use serde::{Deserialize, Serialize};

/// Connectivity lifecycle of the messaging session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Waiting for a human to scan the pairing code
    #[serde(rename = "qr")]
    AwaitingScan,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::AwaitingScan => "qr",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `session` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub state: SessionState,
    #[serde(rename = "qrBase64", default, skip_serializing_if = "Option::is_none")]
    pub qr_base64: Option<String>,
}

/// Payload of a `message.in` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPayload {
    pub from: String,
    pub body: String,
    /// Receipt time, milliseconds since the Unix epoch
    pub ts: i64,
}

/// Gateway → subscriber broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    #[serde(rename = "session")]
    Session(SessionPayload),
    #[serde(rename = "message.in")]
    MessageIn(InboundPayload),
}

impl Envelope {
    pub fn session(state: SessionState, qr_base64: Option<String>) -> Self {
        Self::Session(SessionPayload { state, qr_base64 })
    }

    /// The `type` discriminator, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::MessageIn(_) => "message.in",
        }
    }
}

// ── REST bodies ──

/// `POST /send` body. Missing fields deserialize as empty and fail validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub text: String,
}

/// `GET /qr` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QrResponse {
    Pending { image: String },
    Empty { status: String },
}

impl QrResponse {
    pub fn empty() -> Self {
        Self::Empty {
            status: "no-qr".to_string(),
        }
    }
}

/// `POST /send` success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub ok: bool,
}

/// Error body shared by all REST failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_envelope_with_code() {
        let env = Envelope::session(SessionState::AwaitingScan, Some("data:x".to_string()));
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"type":"session","payload":{"state":"qr","qrBase64":"data:x"}})
        );
    }

    #[test]
    fn test_session_envelope_omits_missing_code() {
        let env = Envelope::session(SessionState::Connected, None);
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"type":"session","payload":{"state":"connected"}})
        );
    }

    #[test]
    fn test_message_envelope() {
        let env = Envelope::MessageIn(InboundPayload {
            from: "5511@s.whatsapp.net".to_string(),
            body: "oi".to_string(),
            ts: 1_700_000_000_000,
        });
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"type":"message.in","payload":{"from":"5511@s.whatsapp.net","body":"oi","ts":1_700_000_000_000i64}})
        );
        assert_eq!(env.kind(), "message.in");
    }

    #[test]
    fn test_qr_response_shapes() {
        assert_eq!(serde_json::to_value(QrResponse::empty()).unwrap(), json!({"status":"no-qr"}));
        let pending = QrResponse::Pending {
            image: "data:image/svg+xml;base64,AA==".to_string(),
        };
        assert_eq!(
            serde_json::to_value(pending).unwrap(),
            json!({"image":"data:image/svg+xml;base64,AA=="})
        );
    }

    #[test]
    fn test_send_request_missing_fields() {
        let req: SendRequest = serde_json::from_str(r#"{"to":"123"}"#).unwrap();
        assert_eq!(req.to, "123");
        assert!(req.text.is_empty());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::AwaitingScan.to_string(), "qr");
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }
}
