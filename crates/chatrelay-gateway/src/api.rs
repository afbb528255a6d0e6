//! Gateway API — the REST operations, independent of the HTTP layer

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatrelay_client::address::normalize_recipient;
use chatrelay_client::{MessagingClient, SendError};
use thiserror::Error;
use tracing::{info, warn};

use crate::protocol::{ErrorBody, QrResponse, SendRequest};
use crate::session::SessionRelay;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    InvalidRequest(String),
    /// The cause is logged but never shown to the caller
    #[error("send failed: {0}")]
    SendFailed(#[from] SendError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::SendFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let error = match self {
            Self::Unauthorized => "unauthorized".to_string(),
            Self::InvalidRequest(message) => message.clone(),
            Self::SendFailed(_) => "send_failed".to_string(),
        };
        ErrorBody { error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// The pending pairing code, or an explicit "no code" answer
pub fn current_code(relay: &SessionRelay) -> QrResponse {
    match relay.current_code() {
        Some(image) => QrResponse::Pending { image },
        None => QrResponse::empty(),
    }
}

/// Validate, normalize and deliver an outbound text message.
///
/// Returns the address the message was sent to.
pub async fn send_message(
    client: &dyn MessagingClient,
    request: SendRequest,
) -> Result<String, ApiError> {
    let to = request.to.trim();
    if to.is_empty() || request.text.is_empty() {
        return Err(ApiError::InvalidRequest(
            "to and text are required".to_string(),
        ));
    }
    let Some(address) = normalize_recipient(to) else {
        return Err(ApiError::InvalidRequest(
            "to must be a phone number or address".to_string(),
        ));
    };

    match client.send_text(&address, &request.text).await {
        Ok(()) => {
            info!("Sent message to {}", address);
            Ok(address)
        }
        Err(e) => {
            warn!("Send to {} failed ({}): {}", address, e.kind(), e);
            Err(ApiError::SendFailed(e))
        }
    }
}
