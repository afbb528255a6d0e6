//! The messaging client trait the gateway depends on

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::ClientEvent;

/// Why an outbound send did not go through.
///
/// The gateway reports all of these as one generic failure on the wire; the
/// variant is kept for logs and as the error source.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("messaging session is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by the messaging service: {0}")]
    Rejected(String),
    #[error("no acknowledgement within {0:?}")]
    Timeout(std::time::Duration),
}

impl SendError {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Transport(_) => "transport",
            Self::Rejected(_) => "rejected",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Trait that messaging session implementations provide
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Run one session until it closes, reporting events on `events`.
    ///
    /// Implementations emit [`ClientEvent::Closed`] before returning.
    /// Returns `Ok(())` if the session reached the open state at least once,
    /// `Err` if it never got that far.
    async fn run(&self, events: mpsc::Sender<ClientEvent>) -> anyhow::Result<()>;

    /// Send a text message to an already-normalized recipient address
    async fn send_text(&self, to: &str, text: &str) -> Result<(), SendError>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}
