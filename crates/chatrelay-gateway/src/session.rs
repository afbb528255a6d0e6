//! Session relay — tracks the messaging session's status and pending pairing code

use chatrelay_client::ClientEvent;
use chatrelay_client::address::normalize_user;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::protocol::{Envelope, InboundPayload, SessionState};
use crate::qr;

/// Point-in-time view of the session.
///
/// `code` is `Some` exactly when `state` is [`SessionState::AwaitingScan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub code: Option<String>,
    pub changed_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// The `session` envelope describing this snapshot
    pub fn envelope(&self) -> Envelope {
        Envelope::session(self.state, self.code.clone())
    }
}

/// Owns the session status; the event pump is its only writer
pub struct SessionRelay {
    state: watch::Sender<SessionSnapshot>,
}

impl SessionRelay {
    /// Create a relay in the `Disconnected` state
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self { state }
    }

    /// Copy of the current status and code
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Pending pairing code, if the session is awaiting a scan
    pub fn current_code(&self) -> Option<String> {
        self.state.borrow().code.clone()
    }

    /// Envelope replayed to a subscriber when it joins
    pub fn greeting(&self) -> Envelope {
        self.state.borrow().envelope()
    }

    /// Apply a client event, returning the envelope to broadcast.
    ///
    /// `None` when the event leaves status and code as they were.
    pub fn apply(&self, event: ClientEvent) -> Option<Envelope> {
        match event {
            ClientEvent::PairingCode { code } => {
                let rendered = match qr::render_data_uri(&code) {
                    Ok(uri) => uri,
                    Err(e) => {
                        warn!("Could not render pairing code ({}); relaying it as text", e);
                        qr::text_data_uri(&code)
                    }
                };
                self.transition(SessionState::AwaitingScan, Some(rendered))
            }
            ClientEvent::Opened => self.transition(SessionState::Connected, None),
            ClientEvent::Closed { reason } => {
                if let Some(reason) = reason {
                    debug!("Session closed: {}", reason);
                }
                self.transition(SessionState::Disconnected, None)
            }
            ClientEvent::Message { from, body } => Some(Envelope::MessageIn(InboundPayload {
                from: normalize_user(&from),
                body,
                ts: Utc::now().timestamp_millis(),
            })),
        }
    }

    fn transition(&self, state: SessionState, code: Option<String>) -> Option<Envelope> {
        let mut envelope = None;
        self.state.send_if_modified(|current| {
            if current.state == state && current.code == code {
                debug!("Session already {}", state);
                return false;
            }
            if current.state != state {
                info!("Session state {} -> {}", current.state, state);
            } else {
                debug!("Session state {} refreshed", state);
            }
            *current = SessionSnapshot {
                state,
                code,
                changed_at: Some(Utc::now()),
            };
            envelope = Some(current.envelope());
            true
        });
        envelope
    }
}

impl Default for SessionRelay {
    fn default() -> Self {
        Self::new()
    }
}
