//! Hierarchical, path-addressed publish/subscribe event bus.
//!
//! Uses one [`tokio::sync::broadcast`] channel per subscribed path so that
//! every subscriber receives every matching message without any single
//! subscriber blocking the others.  A path's channel is removed when its last
//! [`Subscription`] is dropped, so the table only holds live paths.
//!
//! # Prefix matching
//!
//! Publishing to `command/move/42` delivers the event to subscribers of
//!
//! | Subscribed path | Receives it? |
//! |---|---|
//! | `/` (root) | yes |
//! | `command` | yes |
//! | `command/move` | yes |
//! | `command/move/42` | yes |
//! | `command/grip` | no |
//! | `command/move/42/feedback` | no |
//!
//! Delivery to one subscriber preserves the publish order of each publisher;
//! there is no ordering guarantee across publishers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use armature_types::{Event, EventPath, EventPayload};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

type Channels = HashMap<EventPath, broadcast::Sender<Event>>;

/// Shared event bus.  Clone it cheaply – all clones share the same channel
/// table.
#[derive(Clone, Debug)]
pub struct EventBus {
    channels: Arc<RwLock<Channels>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus.  `capacity` is applied to every path channel
    /// independently and is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Wrap `payload` in a fresh [`Event`] and publish it to `path`.
    ///
    /// Returns the number of receivers that were handed the event.  Zero
    /// receivers is a normal condition, not an error.
    pub fn publish(&self, path: EventPath, payload: EventPayload) -> usize {
        self.publish_event(Event::new(path, payload))
    }

    /// Publish an already-built event to its own path and every ancestor.
    pub fn publish_event(&self, event: Event) -> usize {
        let mut delivered = 0;
        {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            for prefix in event.path.prefixes() {
                if let Some(sender) = channels.get(&prefix)
                    && let Ok(n) = sender.send(event.clone())
                {
                    delivered += n;
                }
            }
        }
        trace!(path = %event.path, delivered, "event published");
        delivered
    }

    /// Subscribe to `path` and everything below it.
    pub fn subscribe(&self, path: impl Into<EventPath>) -> Subscription {
        let path = path.into();
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let receiver = channels
            .entry(path.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            path,
            receiver,
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Number of live subscriptions registered exactly at `path`.
    pub fn subscriber_count(&self, path: &EventPath) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    /// Number of paths that currently have at least one subscription.
    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A receiver for every event published at or below one path.
///
/// Obtained via [`EventBus::subscribe`].
pub struct Subscription {
    path: EventPath,
    receiver: broadcast::Receiver<Event>,
    /// Weak so that a subscription alone never keeps the bus's senders open.
    channels: Weak<RwLock<Channels>>,
}

impl Subscription {
    /// Wait for the next matching event.
    ///
    /// Returns `None` when the bus is gone and no further events will arrive.
    /// A subscriber that fell behind logs the number of skipped events and
    /// continues with the oldest event still buffered.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(path = %self.path, lagged_by = n, "subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(path = %self.path, lagged_by = n, "subscription lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// The path this subscription is bound to.
    pub fn path(&self) -> &EventPath {
        &self.path
    }

    /// Turn the subscription into a stream that ends when the bus is gone.
    pub fn into_stream(self) -> BoxStream<'static, Event> {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
        .boxed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = channels.write().unwrap_or_else(PoisonError::into_inner);
        // `self.receiver` is still alive here, so 1 means it is the last one.
        if channels
            .get(&self.path)
            .is_some_and(|sender| sender.receiver_count() <= 1)
        {
            channels.remove(&self.path);
            trace!(path = %self.path, "channel removed");
        }
    }
}
