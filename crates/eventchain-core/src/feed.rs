//! Live feed of newly appended events.
//!
//! The feed keeps one bounded tokio channel per subscriber. `publish` sends
//! into every channel without awaiting, so a slow subscriber never stalls
//! the appender or its peers. The channel kind follows the configured
//! [`OverrunPolicy`]:
//!
//! - [`OverrunPolicy::DropOldest`] uses a single-receiver
//!   [`broadcast`] channel. A full buffer overwrites its oldest event and
//!   the receiver observes the gap as [`broadcast::error::RecvError::Lagged`].
//!   `broadcast` rounds capacities up to the next power of two.
//! - [`OverrunPolicy::Disconnect`] uses an [`mpsc`] channel filled with
//!   `try_send`. A full buffer drops the sender, which ends the subscription
//!   after its buffered events drain.
//!
//! New subscribers see only events published after they subscribed.
//! Channels whose receiver is gone are pruned on the next publish.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use eventchain_types::Event;
use futures::Stream;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};

/// Largest per-subscriber buffer the feed will allocate.
pub const MAX_BUFFER_CAPACITY: usize = 1 << 16;

/// What happens when a subscriber's buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    /// Discard the oldest buffered event to make room.
    #[default]
    DropOldest,
    /// Close the subscription. Already buffered events are still delivered.
    Disconnect,
}

/// A subscriber fell behind and was disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("subscriber {subscriber} overran its buffer of {capacity} events")]
pub struct SubscriberOverrun {
    /// The disconnected subscriber.
    pub subscriber: u64,
    /// Its buffer capacity.
    pub capacity: usize,
}

#[derive(Debug)]
enum Outbox {
    Lagging(broadcast::Sender<Arc<Event>>),
    Bounded(mpsc::Sender<Arc<Event>>),
}

#[derive(Debug)]
struct Outlet {
    id: u64,
    outbox: Outbox,
    overrun: Arc<AtomicBool>,
}

impl Outlet {
    fn is_connected(&self) -> bool {
        match &self.outbox {
            Outbox::Lagging(tx) => tx.receiver_count() > 0,
            Outbox::Bounded(tx) => !tx.is_closed(),
        }
    }
}

#[derive(Debug)]
struct Registry {
    outlets: Mutex<Vec<Outlet>>,
    capacity: usize,
    policy: OverrunPolicy,
    next_id: AtomicU64,
}

impl Registry {
    fn outlets(&self) -> MutexGuard<'_, Vec<Outlet>> {
        match self.outlets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Fan-out publisher for appended events.
///
/// Cloning yields another handle to the same registry. Dropping the last
/// handle ends every subscription once its buffer drains.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    registry: Arc<Registry>,
}

impl LiveFeed {
    /// Create a feed whose subscribers buffer up to `capacity` events each.
    ///
    /// `capacity` is clamped to `1..=MAX_BUFFER_CAPACITY`.
    pub fn new(capacity: usize, policy: OverrunPolicy) -> Self {
        Self {
            registry: Arc::new(Registry {
                outlets: Mutex::new(Vec::new()),
                capacity: capacity.clamp(1, MAX_BUFFER_CAPACITY),
                policy,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a subscription receiving every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let capacity = self.registry.capacity;
        let overrun = Arc::new(AtomicBool::new(false));

        let (outbox, inbox) = match self.registry.policy {
            OverrunPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (Outbox::Lagging(tx), Inbox::Lagging(rx))
            }
            OverrunPolicy::Disconnect => {
                let (tx, rx) = mpsc::channel(capacity);
                (Outbox::Bounded(tx), Inbox::Bounded(rx))
            }
        };

        self.registry.outlets().push(Outlet {
            id,
            outbox,
            overrun: Arc::clone(&overrun),
        });
        tracing::debug!(subscriber = id, "Subscriber connected");

        Subscription {
            id,
            inbox,
            overrun,
            capacity,
            dropped: 0,
        }
    }

    /// Deliver `event` to every active subscriber. Never blocks on a
    /// subscriber.
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: &Event) -> usize {
        let event = Arc::new(event.clone());
        let capacity = self.registry.capacity;
        let mut delivered: usize = 0;

        self.registry.outlets().retain(|outlet| {
            let sent = match &outlet.outbox {
                Outbox::Lagging(tx) => tx.send(Arc::clone(&event)).is_ok(),
                Outbox::Bounded(tx) => match tx.try_send(Arc::clone(&event)) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        outlet.overrun.store(true, Ordering::Release);
                        tracing::warn!(
                            subscriber = outlet.id,
                            capacity,
                            "Subscriber buffer full, disconnecting"
                        );
                        return false;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                },
            };
            if sent {
                delivered = delivered.saturating_add(1);
            } else {
                tracing::debug!(subscriber = outlet.id, "Subscriber disconnected");
            }
            sent
        });

        delivered
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut outlets = self.registry.outlets();
        outlets.retain(Outlet::is_connected);
        outlets.len()
    }
}

#[derive(Debug)]
enum Inbox {
    Lagging(broadcast::Receiver<Arc<Event>>),
    Bounded(mpsc::Receiver<Arc<Event>>),
}

/// A live view of appended events.
///
/// Dropping the subscription disconnects it; the publisher is unaffected.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    inbox: Inbox,
    overrun: Arc<AtomicBool>,
    capacity: usize,
    dropped: u64,
}

impl Subscription {
    /// Subscriber identifier, unique within its feed.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is closed (overrun under
    /// [`OverrunPolicy::Disconnect`], or the feed was dropped) and its
    /// buffer has drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        match &mut self.inbox {
            Inbox::Lagging(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        self.dropped = self.dropped.saturating_add(skipped);
                        tracing::warn!(
                            subscriber = self.id,
                            skipped,
                            "Subscriber lagged, oldest events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Inbox::Bounded(rx) => rx.recv().await,
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        match &mut self.inbox {
            Inbox::Lagging(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        self.dropped = self.dropped.saturating_add(skipped);
                    }
                    Err(
                        broadcast::error::TryRecvError::Empty
                        | broadcast::error::TryRecvError::Closed,
                    ) => return None,
                }
            },
            Inbox::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Number of events discarded under [`OverrunPolicy::DropOldest`] that
    /// this subscription has skipped past so far.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// The overrun that disconnected this subscription, if any.
    pub fn overrun(&self) -> Option<SubscriberOverrun> {
        self.overrun
            .load(Ordering::Acquire)
            .then_some(SubscriberOverrun {
                subscriber: self.id,
                capacity: self.capacity,
            })
    }

    /// Turn the subscription into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Event>> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use eventchain_types::{EventId, LinkedEvent};
    use futures::StreamExt;

    use super::*;

    fn event(n: u64) -> Event {
        LinkedEvent {
            event_type: "tick".to_owned(),
            timestamp: Utc::now(),
            source_app_id: "test".to_owned(),
            data: serde_json::json!({ "n": n }),
            hash: format!("h{n}"),
            previous_hash: format!("h{}", n.saturating_sub(1)),
        }
        .into_event(EventId::new())
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let feed = LiveFeed::new(16, OverrunPolicy::DropOldest);
        let mut a = feed.subscribe();
        let mut b = feed.subscribe();

        for n in 1..=3 {
            assert_eq!(feed.publish(&event(n)), 2);
        }

        for sub in [&mut a, &mut b] {
            for n in 1..=3 {
                let received = sub.recv().await.unwrap();
                assert_eq!(received.hash, format!("h{n}"));
            }
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backlog() {
        let feed = LiveFeed::new(16, OverrunPolicy::DropOldest);
        feed.publish(&event(1));
        let mut sub = feed.subscribe();
        assert!(sub.try_recv().is_none());
        feed.publish(&event(2));
        assert_eq!(sub.recv().await.unwrap().hash, "h2");
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let feed = LiveFeed::new(2, OverrunPolicy::DropOldest);
        let mut sub = feed.subscribe();
        for n in 1..=5 {
            assert_eq!(feed.publish(&event(n)), 1);
        }
        assert_eq!(sub.try_recv().unwrap().hash, "h4");
        assert_eq!(sub.dropped(), 3);
        assert_eq!(sub.try_recv().unwrap().hash, "h5");
        assert!(sub.try_recv().is_none());
        assert!(sub.overrun().is_none());
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn lag_is_counted_on_async_receive() {
        let feed = LiveFeed::new(4, OverrunPolicy::DropOldest);
        let mut sub = feed.subscribe();
        for n in 1..=6 {
            feed.publish(&event(n));
        }
        assert_eq!(sub.recv().await.unwrap().hash, "h3");
        assert_eq!(sub.dropped(), 2);
    }

    #[tokio::test]
    async fn disconnect_policy_closes_only_the_slow_subscriber() {
        let feed = LiveFeed::new(2, OverrunPolicy::Disconnect);
        let mut slow = feed.subscribe();
        let mut fast = feed.subscribe();

        for n in 1..=3 {
            feed.publish(&event(n));
            if n < 3 {
                assert_eq!(fast.recv().await.unwrap().hash, format!("h{n}"));
            }
        }
        assert_eq!(fast.recv().await.unwrap().hash, "h3");

        let overrun = slow.overrun().unwrap();
        assert_eq!(overrun.capacity, 2);
        assert_eq!(overrun.subscriber, slow.id());
        assert_eq!(slow.recv().await.unwrap().hash, "h1");
        assert_eq!(slow.recv().await.unwrap().hash, "h2");
        assert!(slow.recv().await.is_none());
        assert_eq!(feed.subscriber_count(), 1);
        assert!(fast.overrun().is_none());
    }

    #[test]
    fn dropping_a_subscription_unregisters_it() {
        for policy in [OverrunPolicy::DropOldest, OverrunPolicy::Disconnect] {
            let feed = LiveFeed::new(4, policy);
            let sub = feed.subscribe();
            assert_eq!(feed.subscriber_count(), 1);
            drop(sub);
            assert_eq!(feed.subscriber_count(), 0);
            assert_eq!(feed.publish(&event(1)), 0);
        }
    }

    #[tokio::test]
    async fn dropping_the_feed_ends_streams() {
        for policy in [OverrunPolicy::DropOldest, OverrunPolicy::Disconnect] {
            let feed = LiveFeed::new(4, policy);
            let sub = feed.subscribe();
            feed.publish(&event(1));
            drop(feed);

            let received: Vec<_> = sub.into_stream().collect().await;
            assert_eq!(received.len(), 1);
        }
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let feed = LiveFeed::new(0, OverrunPolicy::Disconnect);
        let mut sub = feed.subscribe();
        assert_eq!(feed.publish(&event(1)), 1);
        assert_eq!(feed.publish(&event(2)), 0);
        assert_eq!(sub.try_recv().unwrap().hash, "h1");
        assert_eq!(sub.overrun().unwrap().capacity, 1);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let feed = LiveFeed::new(4, OverrunPolicy::DropOldest);
        let mut sub = feed.subscribe();
        let publisher = feed.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish(&event(7));
        });
        assert_eq!(sub.recv().await.unwrap().hash, "h7");
        handle.await.unwrap();
    }
}
