// SPDX-License-Identifier: MIT OR Apache-2.0
//! Broadcast-based event bus for decoupled [`RunEvent`] distribution to
//! live consumers (the daemon's websocket progress stream, §6.2).
//!
//! This is separate from [`cam_events::EventPublisher`], which durably
//! publishes to the AMQP exchange for at-least-once delivery; the bus here
//! is in-process, best-effort, and exists only for the lifetime of a run.

use crate::RunEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
const DEFAULT_CAPACITY: usize = 256;

/// Shared statistics counters for an [`EventBus`].
#[derive(Debug, Default)]
struct StatsInner {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Broadcast-based event bus for distributing [`RunEvent`]s to multiple
/// subscribers with built-in statistics tracking.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
    stats: Arc<StatsInner>,
}

impl EventBus {
    /// Create a new event bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            stats: Arc::new(StatsInner::default()),
        }
    }

    /// Create a new [`EventSubscription`] that receives future events.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Create a subscription that only yields events matching `filter`, for
    /// example a single `run_id`'s events.
    #[must_use]
    pub fn subscribe_filtered(
        &self,
        filter: Box<dyn Fn(&RunEvent) -> bool + Send + Sync>,
    ) -> FilteredSubscription {
        FilteredSubscription::new(self.subscribe(), filter)
    }

    /// Publish an event to all current subscribers.
    ///
    /// If no subscribers are listening the event is silently dropped and
    /// counted in [`EventBusStats::dropped_events`].
    pub fn publish(&self, event: RunEvent) {
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Return a snapshot of the current bus statistics.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            active_subscribers: self.tx.receiver_count(),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle for receiving events from an [`EventBus`].
pub struct EventSubscription {
    rx: broadcast::Receiver<RunEvent>,
    stats: Arc<StatsInner>,
}

impl EventSubscription {
    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` when the bus is closed or the subscriber lagged.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.stats.dropped_events.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is available, the channel is closed,
    /// or the subscriber lagged.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                self.stats.dropped_events.fetch_add(n, Ordering::Relaxed);
                self.rx.try_recv().ok()
            }
            Err(_) => None,
        }
    }
}

/// Wraps an [`EventSubscription`] with a predicate filter so that only
/// matching events are yielded, e.g. events for a single `run_id`.
pub struct FilteredSubscription {
    inner: EventSubscription,
    filter: Box<dyn Fn(&RunEvent) -> bool + Send + Sync>,
}

impl FilteredSubscription {
    /// Create a filtered subscription that only yields events where
    /// `filter` returns `true`.
    pub fn new(sub: EventSubscription, filter: Box<dyn Fn(&RunEvent) -> bool + Send + Sync>) -> Self {
        Self { inner: sub, filter }
    }

    /// Receive the next matching event, waiting asynchronously.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.inner.recv().await {
                Some(ev) if (self.filter)(&ev) => return Some(ev),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// Try to receive the next matching event without blocking.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.inner.try_recv() {
                Some(ev) if (self.filter)(&ev) => return Some(ev),
                Some(_) => continue,
                None => return None,
            }
        }
    }
}

/// Snapshot of event bus statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total number of events published to the bus.
    pub total_published: u64,
    /// Number of subscribers currently listening.
    pub active_subscribers: usize,
    /// Events lost because no subscribers were listening or a subscriber lagged.
    pub dropped_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunEventKind;
    use chrono::Utc;

    fn event(run_id: &str, kind: RunEventKind) -> RunEvent {
        RunEvent { run_id: run_id.to_string(), ts: Utc::now(), kind }
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(event("run_1", RunEventKind::RunStarted));
        let ev = sub.recv().await.unwrap();
        assert_eq!(ev.run_id, "run_1");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_counts_dropped() {
        let bus = EventBus::new();
        bus.publish(event("run_1", RunEventKind::RunStarted));
        assert_eq!(bus.stats().dropped_events, 1);
    }

    #[tokio::test]
    async fn filtered_subscription_only_yields_matching_run() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_filtered(Box::new(|ev: &RunEvent| ev.run_id == "run_2"));
        bus.publish(event("run_1", RunEventKind::RunStarted));
        bus.publish(event("run_2", RunEventKind::RunStarted));
        let ev = sub.recv().await.unwrap();
        assert_eq!(ev.run_id, "run_2");
    }

    #[tokio::test]
    async fn subscriber_count_tracks_active_subscriptions() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let _sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
