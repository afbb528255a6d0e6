//! Subscriber registry — the live set of real-time connections and fan-out to them

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tracing::{debug, error};

use crate::protocol::Envelope;

pub type SubscriberId = u64;

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("subscriber is closed")]
    Closed,
    #[error("subscriber buffer is full")]
    Full,
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Anything that can take a serialized envelope.
///
/// `send` must not block; a slow subscriber should fail rather than stall
/// the broadcast.
pub trait Subscriber: Send + Sync {
    fn send(&self, frame: Arc<str>) -> Result<(), SubscriberError>;
}

/// Live subscribers, held by weak reference.
///
/// Each connection owns its subscriber; once it is dropped the registry
/// forgets it on the next broadcast.
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, Weak<dyn Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Weak<dyn Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `greeting` to the subscriber, then add it to the live set.
    ///
    /// A subscriber that cannot take its greeting is not registered.
    pub fn register(
        &self,
        subscriber: &Arc<dyn Subscriber>,
        greeting: &Envelope,
    ) -> Result<SubscriberId, SubscriberError> {
        self.register_with(subscriber, || greeting.clone())
    }

    /// Like [`register`](Self::register), but the greeting is produced while
    /// the registry is locked.
    ///
    /// Paired with [`broadcast_with`](Self::broadcast_with), a joining
    /// subscriber either sees a state change in its greeting or receives the
    /// broadcast for it, never neither.
    pub fn register_with<F>(
        &self,
        subscriber: &Arc<dyn Subscriber>,
        greeting: F,
    ) -> Result<SubscriberId, SubscriberError>
    where
        F: FnOnce() -> Envelope,
    {
        let mut subscribers = self.lock();
        let frame: Arc<str> = serde_json::to_string(&greeting())?.into();
        subscriber.send(frame)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers.insert(id, Arc::downgrade(subscriber));
        debug!("Registered subscriber {} ({} live)", id, subscribers.len());
        Ok(id)
    }

    /// Remove a subscriber; returns whether it was still registered
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!("Unregistered subscriber {} ({} live)", id, subscribers.len());
        }
        removed
    }

    /// Send an envelope to every live subscriber.
    ///
    /// Subscribers that fail or have gone away are dropped. Returns how many
    /// subscribers took the envelope.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let mut subscribers = self.lock();
        fan_out(&mut subscribers, envelope)
    }

    /// Produce an envelope while the registry is locked, then broadcast it.
    ///
    /// `produce` returning `None` broadcasts nothing.
    pub fn broadcast_with<F>(&self, produce: F) -> usize
    where
        F: FnOnce() -> Option<Envelope>,
    {
        let mut subscribers = self.lock();
        match produce() {
            Some(envelope) => fan_out(&mut subscribers, &envelope),
            None => 0,
        }
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fan_out(
    subscribers: &mut HashMap<SubscriberId, Weak<dyn Subscriber>>,
    envelope: &Envelope,
) -> usize {
    let frame: Arc<str> = match serde_json::to_string(envelope) {
        Ok(json) => json.into(),
        Err(e) => {
            error!("Failed to serialize {} envelope: {}", envelope.kind(), e);
            return 0;
        }
    };

    let mut delivered = 0;
    subscribers.retain(|id, weak| {
        let Some(subscriber) = weak.upgrade() else {
            debug!("Subscriber {} went away, dropping", id);
            return false;
        };
        match subscriber.send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                debug!("Dropping subscriber {}: {}", id, e);
                false
            }
        }
    });
    debug!(
        "Broadcast {} envelope to {}/{} subscribers",
        envelope.kind(),
        delivered,
        subscribers.len()
    );
    delivered
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
