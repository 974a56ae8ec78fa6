//! Cursor-based event bus.
//!
//! Events live in an append-only log with bus-monotonic ids. Each
//! subscriber declares a cursor (last acknowledged event id); a
//! subscription replays everything after the cursor and then follows
//! the live tail. Delivery is at-least-once: until a subscriber acks,
//! reconnecting replays from the cursor again. Ordering is the log
//! order, which makes delivery FIFO per `correlation_id`; there is no
//! cross-correlation guarantee.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use mailsift_core::{Event, EventTopic};

/// Errors surfaced by the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Ack for a subscriber that never subscribed.
    #[error("unknown subscriber: {0}")]
    UnknownSubscriber(String),
}

/// Tunables for the bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Per-subscriber delivery buffer. A subscriber that falls further
    /// behind than this is disconnected and must resubscribe from its
    /// cursor.
    pub delivery_buffer: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            delivery_buffer: 256,
        }
    }
}

struct ActiveSubscription {
    subscriber: String,
    topics: HashSet<EventTopic>,
    sender: mpsc::Sender<Event>,
}

/// The event bus: append-only log plus per-subscriber cursors.
pub struct EventBus {
    config: EventBusConfig,
    log: RwLock<Vec<Event>>,
    /// Highest id handed out by [`publish`](Self::publish) for events
    /// arriving unstamped.
    sequence: AtomicU64,
    /// Durable-ish cursor per subscriber name; survives resubscription.
    cursors: DashMap<String, u64>,
    active: RwLock<Vec<ActiveSubscription>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            log: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            cursors: DashMap::new(),
            active: RwLock::new(Vec::new()),
        }
    }

    /// Append an event and fan it out to matching live subscriptions.
    ///
    /// Events arriving with `event_id == 0` are stamped from the bus
    /// sequence; pre-stamped events (ids assigned by the store's
    /// transactional commit) keep their id, and the sequence is advanced
    /// past them.
    pub fn publish(&self, mut event: Event) -> Event {
        if event.event_id == 0 {
            event.event_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        } else {
            self.sequence.fetch_max(event.event_id, Ordering::SeqCst);
        }

        // Append and fan out under the same write guard so live
        // subscribers observe log order.
        let mut log = self.log.write();
        log.push(event.clone());
        let mut active = self.active.write();
        active.retain(|subscription| {
            if !subscription.topics.contains(&event.topic) {
                return true;
            }
            match subscription.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %subscription.subscriber,
                        "subscriber lagging, disconnecting; resume from cursor"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        drop(active);
        drop(log);

        debug!(event_id = event.event_id, topic = %event.topic, "event published");
        event
    }

    /// Subscribe from a cursor: replay everything after `cursor` on the
    /// requested topics, then follow the live tail.
    ///
    /// The returned stream ends when the subscriber lags beyond the
    /// delivery buffer; resubscribing with the stored cursor resumes
    /// without loss.
    pub fn subscribe(
        &self,
        subscriber: impl Into<String>,
        topics: &[EventTopic],
        cursor: Option<u64>,
    ) -> ReceiverStream<Event> {
        let subscriber = subscriber.into();
        let topics: HashSet<EventTopic> = topics.iter().copied().collect();
        let cursor = cursor.unwrap_or_else(|| {
            self.cursors
                .get(&subscriber)
                .map(|c| *c)
                .unwrap_or_default()
        });
        self.cursors.entry(subscriber.clone()).or_insert(cursor);

        let (sender, receiver) = mpsc::channel(self.config.delivery_buffer);

        // Register under the log lock so no published event can fall
        // between the replay snapshot and live delivery.
        let log = self.log.read();
        let backlog: Vec<Event> = log
            .iter()
            .filter(|e| e.event_id > cursor && topics.contains(&e.topic))
            .cloned()
            .collect();
        let mut active = self.active.write();

        // Drop any previous connection for this subscriber; the new
        // stream owns delivery now.
        active.retain(|s| s.subscriber != subscriber);
        for event in backlog {
            // The buffer may be smaller than the backlog; a fresh
            // subscriber that cannot hold it will resume from its
            // cursor on the next subscribe call.
            if sender.try_send(event).is_err() {
                break;
            }
        }
        active.push(ActiveSubscription {
            subscriber,
            topics,
            sender,
        });
        drop(active);
        drop(log);

        ReceiverStream::new(receiver)
    }

    /// Acknowledge delivery up to `event_id`, advancing the cursor.
    /// Cursors only move forward.
    pub fn ack(&self, subscriber: &str, event_id: u64) -> Result<(), BusError> {
        let Some(mut cursor) = self.cursors.get_mut(subscriber) else {
            return Err(BusError::UnknownSubscriber(subscriber.to_owned()));
        };
        if event_id > *cursor {
            *cursor = event_id;
        }
        Ok(())
    }

    /// The stored cursor for a subscriber, if it ever subscribed.
    #[must_use]
    pub fn cursor(&self, subscriber: &str) -> Option<u64> {
        self.cursors.get(subscriber).map(|c| *c)
    }

    /// Number of events in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.len())
            .field("subscribers", &self.cursors.len())
            .finish_non_exhaustive()
    }
}
