//! Notification fan-out.
//!
//! Cycles hand finished predictions to a bounded queue and return at once;
//! a dedicated delivery task drains the queue and pushes each prediction
//! to every registered subscriber concurrently. Each push is bounded by a
//! timeout. A subscriber that is closed, or too slow to accept within the
//! timeout, is removed from the registry without affecting the others.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::types::Prediction;

pub type SubscriberId = u64;

/// Delivery settings.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierParams {
    /// Longest a single subscriber may take to accept one message.
    pub delivery_timeout: Duration,
    /// Predictions waiting for delivery before new ones are dropped.
    pub queue_capacity: usize,
    /// Messages buffered per subscriber.
    pub subscriber_buffer: usize,
}

impl Default for NotifierParams {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(2),
            queue_capacity: 256,
            subscriber_buffer: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber side
// ---------------------------------------------------------------------------

/// A live subscriber channel. Dropping it deregisters the subscriber on
/// the next delivery.
pub struct Subscription {
    pub id: SubscriberId,
    rx: mpsc::Receiver<Arc<Prediction>>,
}

impl Subscription {
    /// Next delivered prediction, or `None` once deregistered.
    pub async fn recv(&mut self) -> Option<Arc<Prediction>> {
        self.rx.recv().await
    }
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Arc<Prediction>>>>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front of the fan-out: publish, subscribe, unsubscribe.
#[derive(Clone)]
pub struct NotifierHandle {
    queue: mpsc::Sender<Arc<Prediction>>,
    registry: Arc<Registry>,
    subscriber_buffer: usize,
}

impl NotifierHandle {
    /// Start the delivery task and return its handle. The task exits when
    /// every handle has been dropped.
    pub fn spawn(params: NotifierParams) -> Self {
        let (queue, rx) = mpsc::channel(params.queue_capacity.max(1));
        let registry = Arc::new(Registry::default());

        tokio::spawn(deliver_loop(rx, registry.clone(), params.delivery_timeout));

        Self {
            queue,
            registry,
            subscriber_buffer: params.subscriber_buffer.max(1),
        }
    }

    /// Hand a prediction over for delivery without waiting on subscribers.
    /// Returns `false` if the delivery queue is full or closed.
    pub fn publish(&self, prediction: Prediction) -> bool {
        match self.queue.try_send(Arc::new(prediction)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(p)) => {
                warn!(stream = %p.game_type, period = %p.period, "Notification queue full, dropping prediction");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Notification delivery task has stopped");
                false
            }
        }
    }

    pub async fn subscribe(&self) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let count = {
            let mut subs = self.registry.subscribers.lock().await;
            subs.insert(id, tx);
            subs.len()
        };
        info!(subscriber = id, subscribers = count, "Subscriber registered");
        Subscription { id, rx }
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let removed = self.registry.subscribers.lock().await.remove(&id).is_some();
        if removed {
            info!(subscriber = id, "Subscriber deregistered");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().await.len()
    }
}

// ---------------------------------------------------------------------------
// Delivery task
// ---------------------------------------------------------------------------

async fn deliver_loop(
    mut rx: mpsc::Receiver<Arc<Prediction>>,
    registry: Arc<Registry>,
    delivery_timeout: Duration,
) {
    while let Some(prediction) = rx.recv().await {
        let targets: Vec<(SubscriberId, mpsc::Sender<Arc<Prediction>>)> = registry
            .subscribers
            .lock()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if targets.is_empty() {
            debug!(stream = %prediction.game_type, "No subscribers for prediction");
            continue;
        }

        let attempts = targets.into_iter().map(|(id, tx)| {
            let message = prediction.clone();
            async move {
                match tokio::time::timeout(delivery_timeout, tx.send(message)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(_)) => Some((id, "closed")),
                    Err(_) => Some((id, "timed out")),
                }
            }
        });
        let failed: Vec<(SubscriberId, &str)> =
            join_all(attempts).await.into_iter().flatten().collect();

        if !failed.is_empty() {
            let mut subs = registry.subscribers.lock().await;
            for (id, why) in &failed {
                subs.remove(id);
                warn!(subscriber = id, reason = why, "Delivery failed, subscriber removed");
            }
        }

        debug!(
            stream = %prediction.game_type,
            period = %prediction.period,
            failed = failed.len(),
            "Prediction delivered"
        );
    }
    debug!("Notification delivery task stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, StreamId};

    fn prediction(period: &str) -> Prediction {
        Prediction::new(StreamId::new("1min"), period.into(), Color::Red, 0.9, 0.8, "m".into())
    }

    fn params() -> NotifierParams {
        NotifierParams {
            delivery_timeout: Duration::from_millis(50),
            queue_capacity: 16,
            subscriber_buffer: 4,
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let notifier = NotifierHandle::spawn(params());
        let mut a = notifier.subscribe().await;
        let mut b = notifier.subscribe().await;
        assert_ne!(a.id, b.id);

        assert!(notifier.publish(prediction("100")));
        assert_eq!(a.recv().await.unwrap().period, "100");
        assert_eq!(b.recv().await.unwrap().period, "100");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let notifier = NotifierHandle::spawn(params());
        assert!(notifier.publish(prediction("1")));
        assert_eq!(notifier.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_subscriber_removed_others_unaffected() {
        let notifier = NotifierHandle::spawn(params());
        let mut live = notifier.subscribe().await;
        let gone = notifier.subscribe().await;
        drop(gone);

        notifier.publish(prediction("1"));
        assert_eq!(live.recv().await.unwrap().period, "1");

        // Deliveries are sequential: once the second arrives the first
        // round's removals are done.
        notifier.publish(prediction("2"));
        assert_eq!(live.recv().await.unwrap().period, "2");
        assert_eq!(notifier.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_removed() {
        let notifier = NotifierHandle::spawn(NotifierParams {
            subscriber_buffer: 1,
            ..params()
        });
        let mut fast = notifier.subscribe().await;
        let _stalled = notifier.subscribe().await;

        for i in 0..3 {
            notifier.publish(prediction(&i.to_string()));
            assert_eq!(fast.recv().await.unwrap().period, i.to_string());
        }
        notifier.publish(prediction("last"));
        assert_eq!(fast.recv().await.unwrap().period, "last");
        assert_eq!(notifier.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let notifier = NotifierHandle::spawn(params());
        let sub = notifier.subscribe().await;
        assert_eq!(notifier.subscriber_count().await, 1);
        notifier.unsubscribe(sub.id).await;
        assert_eq!(notifier.subscriber_count().await, 0);
        notifier.unsubscribe(sub.id).await;
    }

    #[tokio::test]
    async fn test_message_serialises_flat() {
        let notifier = NotifierHandle::spawn(params());
        let mut sub = notifier.subscribe().await;
        notifier.publish(prediction("42"));

        let msg = sub.recv().await.unwrap();
        let json = serde_json::to_value(&*msg).unwrap();
        assert_eq!(json["period"], "42");
        assert_eq!(json["color"], "RED");
        assert_eq!(json["game_type"], "1min");
    }
}
