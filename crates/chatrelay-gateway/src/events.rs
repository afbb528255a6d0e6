//! Event pump — client events in, broadcast envelopes out

use std::sync::Arc;

use chatrelay_client::ClientEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::SubscriberRegistry;
use crate::session::SessionRelay;

/// Applies client events to the relay and fans the results out
pub struct EventPump {
    relay: Arc<SessionRelay>,
    subscribers: Arc<SubscriberRegistry>,
}

impl EventPump {
    pub fn new(relay: Arc<SessionRelay>, subscribers: Arc<SubscriberRegistry>) -> Self {
        Self { relay, subscribers }
    }

    /// Handle one event, returning how many subscribers received the result.
    ///
    /// The relay is updated under the registry lock, so a subscriber joining
    /// concurrently is greeted with either the old state plus this broadcast
    /// or the new state.
    pub fn handle(&self, event: ClientEvent) -> usize {
        let kind = event.kind();
        let delivered = self.subscribers.broadcast_with(|| self.relay.apply(event));
        debug!("Relayed '{}' event to {} subscribers", kind, delivered);
        delivered
    }

    /// Drain `events` until cancelled or every sender is gone
    pub async fn run(self, mut events: mpsc::Receiver<ClientEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle(event);
                    }
                    None => break,
                },
            }
        }
        info!("Event pump stopped");
    }

    /// Start the pump in the background, returning a handle
    pub fn spawn(
        self,
        events: mpsc::Receiver<ClientEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }
}
