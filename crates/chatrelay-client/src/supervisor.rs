//! Session supervisor — restarts the messaging session when it closes

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::MessagingClient;
use crate::event::ClientEvent;

/// How the supervisor spaces out restarts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first restart, and after any session that had opened
    pub initial_delay: Duration,
    /// Upper bound for the backoff
    pub max_delay: Duration,
    /// Growth factor per consecutive failure (values below 1.0 act as 1.0)
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Always wait the same delay, never give up
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before the next restart after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Whether `failures` consecutive failures exhaust the policy
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// Drives a [`MessagingClient`] session, restarting it per the policy
pub struct Supervisor {
    client: Arc<dyn MessagingClient>,
    policy: ReconnectPolicy,
    events: mpsc::Sender<ClientEvent>,
}

impl Supervisor {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        policy: ReconnectPolicy,
        events: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            client,
            policy,
            events,
        }
    }

    /// Run sessions until cancelled or the retry budget is spent
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let name = self.client.name().to_string();
        let mut failures: u32 = 0;

        loop {
            info!("Starting messaging session '{}'", name);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Supervisor for '{}' cancelled", name);
                    return Ok(());
                }
                outcome = self.client.run(self.events.clone()) => outcome,
            };

            match outcome {
                Ok(()) => {
                    info!("Messaging session '{}' closed", name);
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(
                        "Messaging session '{}' failed (attempt {}): {:#}",
                        name, failures, e
                    );
                    if self.policy.exhausted(failures) {
                        error!(
                            "Giving up on messaging session '{}' after {} consecutive failures",
                            name, failures
                        );
                        return Err(anyhow!(
                            "messaging session '{}' failed {} times in a row",
                            name,
                            failures
                        ));
                    }
                }
            }

            let delay = self.policy.delay_for(failures);
            info!("Reconnecting '{}' in {:?}", name, delay);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Start the supervisor in the background, returning a handle
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(self.run(cancel))
    }
}
