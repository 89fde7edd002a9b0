use crate::queue::subscription::{self, Subscription};
use crate::queue::{Delivery, WorkItem};
use crate::store::{KeyValueStore, Keyspace, StoreError};
use crate::time::Clock;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue store failure: {0}")]
    Store(#[from] StoreError),
    #[error("Publish rejected: {0}")]
    PublishRejected(#[source] StoreError),
    #[error("Subscription task failed: {0}")]
    SubscriptionTaskFailed(#[from] tokio::task::JoinError),
}

/// Consumer receives deliveries from a subscription one at a time, in fetch order. It is
/// responsible for acking or rejecting each one.
#[async_trait::async_trait]
pub trait Consumer<S: KeyValueStore>: Send + Sync + 'static {
    async fn consume(&self, delivery: Delivery<S>);
}

/// TaskQueue is a reliable queue laid out over store lists:
///
/// ```text
///   publish -> [ready] --fetch--> [unacked::<tag>] --ack--> (gone)
///                 ^                      |
///                 |                      +--reject--> [rejected]
///                 +------- recovery ---------------------+
/// ```
///
/// A payload is never only in process memory: between fetch and ack it's on the fetching
/// consumer's unacked list, so a crashed consumer loses nothing that recovery can't return.
#[derive(Clone)]
pub struct TaskQueue<S: KeyValueStore, C: Clock> {
    logger: slog::Logger,
    store: S,
    clock: C,
    keyspace: Keyspace,
    name: String,
    ready_key: String,
    rejected_key: String,
    consumers_key: String,
    consumer_heartbeat_ttl: Duration,
}

impl<S: KeyValueStore, C: Clock> TaskQueue<S, C> {
    pub fn open(
        logger: slog::Logger,
        store: S,
        clock: C,
        keyspace: &Keyspace,
        name: &str,
        consumer_heartbeat_ttl: Duration,
    ) -> Self {
        TaskQueue {
            logger: logger.new(slog::o!("Queue" => name.to_string())),
            store,
            clock,
            keyspace: keyspace.clone(),
            name: name.to_string(),
            ready_key: keyspace.queue_ready(name),
            rejected_key: keyspace.queue_rejected(name),
            consumers_key: keyspace.queue_consumers(name),
            consumer_heartbeat_ttl,
        }
    }

    pub async fn publish(&self, item: &WorkItem) -> Result<(), QueueError> {
        self.store
            .list_push(&self.ready_key, item.as_bytes())
            .await
            .map(|_| ())
            .map_err(QueueError::PublishRejected)
    }

    pub async fn ready_count(&self) -> Result<u64, QueueError> {
        Ok(self.store.list_len(&self.ready_key).await?)
    }

    pub async fn rejected_count(&self) -> Result<u64, QueueError> {
        Ok(self.store.list_len(&self.rejected_key).await?)
    }

    /// Register a new consumer tag and start fetching into a buffer of at most `prefetch_limit`
    /// deliveries. The subscription runs until `Subscription::stop_consuming`.
    pub async fn start_consuming<K: Consumer<S>>(
        &self,
        prefetch_limit: usize,
        poll_interval: Duration,
        consumer: K,
    ) -> Result<Subscription<S>, QueueError> {
        let tag = uuid::Uuid::new_v4().to_string();
        let alive_key = self.keyspace.queue_consumer_alive(&self.name, &tag);

        // Liveness first: recovery must never see the tag registered without it.
        self.store
            .set_with_expiry(&alive_key, &tag, self.consumer_heartbeat_ttl)
            .await?;
        self.store.list_push(&self.consumers_key, tag.as_bytes()).await?;

        slog::info!(self.logger, "Started consumer {}", tag);

        let fetcher = subscription::Fetcher {
            logger: self.logger.new(slog::o!("Consumer" => tag.clone())),
            store: self.store.clone(),
            clock: self.clock.clone(),
            ready_key: self.ready_key.clone(),
            unacked_key: self.keyspace.queue_unacked(&self.name, &tag),
            rejected_key: self.rejected_key.clone(),
            alive_key,
            alive_ttl: self.consumer_heartbeat_ttl,
            poll_interval,
        };

        Ok(Subscription::start(tag, fetcher, prefetch_limit, consumer))
    }

    /// Move every rejected payload back to ready. Returns how many moved.
    pub async fn return_all_rejected(&self) -> Result<u64, QueueError> {
        let returned = self.drain_into_ready(&self.rejected_key).await?;
        if returned > 0 {
            slog::info!(self.logger, "Returned {} rejected deliveries", returned);
        }
        Ok(returned)
    }

    /// Find consumers whose liveness record expired, move their unacked payloads back to ready and
    /// forget them. Returns how many payloads moved.
    pub async fn return_dead_unacked(&self) -> Result<u64, QueueError> {
        let mut returned = 0;

        for tag in self.store.list_range(&self.consumers_key).await? {
            let tag = String::from_utf8_lossy(&tag).into_owned();
            let alive_key = self.keyspace.queue_consumer_alive(&self.name, &tag);
            if self.store.get(&alive_key).await?.is_some() {
                continue;
            }

            let unacked_key = self.keyspace.queue_unacked(&self.name, &tag);
            let moved = self.drain_into_ready(&unacked_key).await?;
            self.store.list_remove(&self.consumers_key, tag.as_bytes()).await?;

            slog::info!(
                self.logger,
                "Cleaned up dead consumer {}, returned {} unacked deliveries",
                tag,
                moved
            );
            returned += moved;
        }

        Ok(returned)
    }

    async fn drain_into_ready(&self, source: &str) -> Result<u64, QueueError> {
        let mut moved = 0;
        while self.store.list_pop_push(source, &self.ready_key).await?.is_some() {
            moved += 1;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::time::{self, MockClock, RealClock};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, Semaphore};

    /// Holds on to deliveries so the test decides when (and whether) to ack.
    struct Collector<S: KeyValueStore> {
        tx: mpsc::UnboundedSender<Delivery<S>>,
    }

    #[async_trait::async_trait]
    impl<S: KeyValueStore> Consumer<S> for Collector<S> {
        async fn consume(&self, delivery: Delivery<S>) {
            let _ = self.tx.send(delivery);
        }
    }

    /// Blocks inside `consume` until the gate opens, so the prefetch buffer fills up behind it.
    struct Gated {
        consumed: Arc<Mutex<Vec<WorkItem>>>,
        gate: Arc<Semaphore>,
    }

    #[async_trait::async_trait]
    impl<S: KeyValueStore> Consumer<S> for Gated {
        async fn consume(&self, delivery: Delivery<S>) {
            self.consumed.lock().await.push(delivery.payload().clone());
            let _ = self.gate.acquire().await;
        }
    }

    fn queue<C: Clock>(store: &InMemoryStore<C>, clock: C) -> TaskQueue<InMemoryStore<C>, C> {
        TaskQueue::open(
            slog::Logger::root(slog::Discard, slog::o!()),
            store.clone(),
            clock,
            &Keyspace::default(),
            "sub1",
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn published_items_are_delivered_in_order_and_acked() {
        let store = InMemoryStore::new();
        let queue = queue(&store, RealClock);
        for payload in ["AB3x9", "k2P0q", "zz9Yw"] {
            queue.publish(&WorkItem::from(payload)).await.unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = queue
            .start_consuming(10, Duration::from_millis(5), Collector { tx })
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let delivery = rx.recv().await.unwrap();
            seen.push(delivery.payload().to_string());
            assert!(delivery.ack().await.unwrap());
        }
        assert_eq!(seen, vec!["AB3x9", "k2P0q", "zz9Yw"]);

        let unacked_key = Keyspace::default().queue_unacked("sub1", subscription.tag());
        assert_eq!(store.list_len(&unacked_key).await.unwrap(), 0);
        assert_eq!(queue.ready_count().await.unwrap(), 0);

        assert!(subscription.stop_consuming().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_consuming_returns_buffered_deliveries_exactly_once() {
        let store = InMemoryStore::new();
        let queue = queue(&store, RealClock);
        for i in 0..20 {
            queue.publish(&WorkItem::from(format!("item{:02}", i))).await.unwrap();
        }

        let consumed = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Semaphore::new(0));
        let subscription = queue
            .start_consuming(
                5,
                Duration::from_millis(5),
                Gated {
                    consumed: consumed.clone(),
                    gate: gate.clone(),
                },
            )
            .await
            .unwrap();

        // Consumer holds one, the buffer holds the prefetch limit.
        let unacked_key = Keyspace::default().queue_unacked("sub1", subscription.tag());
        while store.list_len(&unacked_key).await.unwrap() < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.list_len(&unacked_key).await.unwrap(), 6);

        // Stop while the consumer is mid-delivery, then let it finish.
        let stop = tokio::spawn(subscription.stop_consuming());
        tokio::time::sleep(Duration::from_millis(30)).await;
        gate.add_permits(1);

        let drained = stop.await.unwrap().unwrap();
        let drained: Vec<String> = drained.iter().map(|d| d.payload().to_string()).collect();
        assert_eq!(drained, vec!["item01", "item02", "item03", "item04", "item05"]);
        assert_eq!(*consumed.lock().await, vec![WorkItem::from("item00")]);

        // Everything else stayed on the ready list.
        assert_eq!(queue.ready_count().await.unwrap(), 14);
    }

    #[tokio::test]
    async fn rejected_deliveries_are_returned_to_ready() {
        let store = InMemoryStore::new();
        let queue = queue(&store, RealClock);
        queue.publish(&WorkItem::from("AB3x9")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = queue
            .start_consuming(1, Duration::from_millis(5), Collector { tx })
            .await
            .unwrap();
        let delivery = rx.recv().await.unwrap();
        assert!(delivery.reject().await.unwrap());
        subscription.stop_consuming().await.unwrap();

        assert_eq!(queue.rejected_count().await.unwrap(), 1);
        assert_eq!(queue.return_all_rejected().await.unwrap(), 1);
        assert_eq!(queue.rejected_count().await.unwrap(), 0);
        assert_eq!(queue.ready_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unacked_deliveries_of_dead_consumer_are_returned() {
        let (clock, mut controller) = time::mocked_clock();
        let store = InMemoryStore::with_clock(clock.clone());
        let queue: TaskQueue<InMemoryStore<MockClock>, MockClock> = queue(&store, clock);
        queue.publish(&WorkItem::from("AB3x9")).await.unwrap();
        queue.publish(&WorkItem::from("k2P0q")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = queue
            .start_consuming(10, Duration::from_millis(5), Collector { tx })
            .await
            .unwrap();
        let _held_1 = rx.recv().await.unwrap();
        let _held_2 = rx.recv().await.unwrap();
        subscription.stop_consuming().await.unwrap();

        // Consumer still looks alive.
        assert_eq!(queue.return_dead_unacked().await.unwrap(), 0);
        assert_eq!(queue.ready_count().await.unwrap(), 0);

        controller.advance(Duration::from_secs(11));
        assert_eq!(queue.return_dead_unacked().await.unwrap(), 2);
        assert_eq!(queue.ready_count().await.unwrap(), 2);

        // The tag is forgotten, nothing is returned twice.
        assert_eq!(queue.return_dead_unacked().await.unwrap(), 0);
        assert!(store.list_range("queue::sub1::consumers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn late_ack_after_recovery_is_reported() {
        let (clock, mut controller) = time::mocked_clock();
        let store = InMemoryStore::with_clock(clock.clone());
        let queue = queue(&store, clock);
        queue.publish(&WorkItem::from("AB3x9")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = queue
            .start_consuming(1, Duration::from_millis(5), Collector { tx })
            .await
            .unwrap();
        let delivery = rx.recv().await.unwrap();
        subscription.stop_consuming().await.unwrap();

        controller.advance(Duration::from_secs(11));
        queue.return_dead_unacked().await.unwrap();

        assert!(!delivery.ack().await.unwrap());
        assert_eq!(queue.ready_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn publish_failure_is_rejected() {
        let store = InMemoryStore::new();
        let queue = queue(&store, RealClock);
        store.set_unavailable(true);

        let result = queue.publish(&WorkItem::from("AB3x9")).await;
        assert!(matches!(result, Err(QueueError::PublishRejected(_))));
    }
}
