use crate::classifier::ErrorClassifier;
use crate::queue::{Consumer, Delivery, QueueError, Subscription, TaskQueue, WorkItem};
use crate::role::error_reporter::{CoordinationError, ErrorReporter};
use crate::store::KeyValueStore;
use crate::time::{self, Clock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
pub(crate) struct PipelineSettings {
    pub(crate) prefetch_limit: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) recovery_interval: Duration,
}

/// ConsumerPipeline is everything a subscriber runs to process work: the queue subscription, the
/// handler classifying each delivered item, and the periodic recovery of rejected and orphaned
/// deliveries. It lives for exactly one subscriber session.
pub(crate) struct ConsumerPipeline<S: KeyValueStore> {
    logger: slog::Logger,
    subscription: Subscription<S>,
    handoff: HandoffConsumer,
    recovery_cancel: CancellationToken,
    recovery_task: JoinHandle<()>,
    handler_task: JoinHandle<()>,
}

impl<S: KeyValueStore> ConsumerPipeline<S> {
    pub(crate) async fn start<C: Clock>(
        logger: slog::Logger,
        queue: &TaskQueue<S, C>,
        clock: C,
        settings: PipelineSettings,
        classifier: ErrorClassifier<S>,
        errors: ErrorReporter,
    ) -> Result<Self, QueueError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handoff = HandoffConsumer {
            logger: logger.clone(),
            tx,
            errors: errors.clone(),
        };

        let subscription = queue
            .start_consuming(settings.prefetch_limit, settings.poll_interval, handoff.clone())
            .await?;

        let handler_task = tokio::spawn(handle_delivered(rx, classifier, errors.clone()));

        let recovery_cancel = CancellationToken::new();
        let recovery_task = tokio::spawn(run_recovery(
            queue.clone(),
            clock,
            settings.recovery_interval,
            recovery_cancel.clone(),
            errors,
        ));

        Ok(ConsumerPipeline {
            logger,
            subscription,
            handoff,
            recovery_cancel,
            recovery_task,
            handler_task,
        })
    }

    /// Stop the subscription and hand every delivery it had buffered to the handler, then wait
    /// for the handler to finish. Returns the buffered items.
    pub(crate) async fn stop(self) -> Result<Vec<WorkItem>, QueueError> {
        self.recovery_cancel.cancel();

        let mut drained = Vec::new();
        let stopped = match self.subscription.stop_consuming().await {
            Ok(deliveries) => {
                slog::info!(self.logger, "Draining {} buffered deliveries", deliveries.len());
                for delivery in deliveries {
                    drained.push(delivery.payload().clone());
                    self.handoff.hand_off(delivery).await;
                }
                Ok(())
            }
            // Whatever was buffered stays unacked until recovery returns it.
            Err(e) => Err(e),
        };

        // The handler ends once the last sender, ours, is gone and the channel is empty.
        drop(self.handoff);
        let handled = self.handler_task.await;
        let recovered = self.recovery_task.await;
        stopped?;
        handled?;
        recovered?;

        Ok(drained)
    }
}

#[derive(Clone)]
struct HandoffConsumer {
    logger: slog::Logger,
    tx: mpsc::UnboundedSender<WorkItem>,
    errors: ErrorReporter,
}

impl HandoffConsumer {
    /// Pass the payload to the handler and ack. Acked on handoff, not on handling: an item that is
    /// in the channel when the process dies is lost, one that is delivered twice is not.
    async fn hand_off<S: KeyValueStore>(&self, delivery: Delivery<S>) {
        if self.tx.send(delivery.payload().clone()).is_err() {
            // Handler is gone, leave the item for another consumer.
            if let Err(e) = delivery.reject().await {
                self.errors.report(CoordinationError::queue("reject delivery", e));
            }
            return;
        }

        match delivery.ack().await {
            Ok(true) => {}
            Ok(false) => slog::debug!(self.logger, "Delivery was already returned to the queue"),
            Err(e) => self.errors.report(CoordinationError::queue("ack delivery", e)),
        }
    }
}

#[async_trait::async_trait]
impl<S: KeyValueStore> Consumer<S> for HandoffConsumer {
    async fn consume(&self, delivery: Delivery<S>) {
        self.hand_off(delivery).await;
    }
}

async fn handle_delivered<S: KeyValueStore>(
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    classifier: ErrorClassifier<S>,
    errors: ErrorReporter,
) {
    while let Some(item) = rx.recv().await {
        if let Err(e) = classifier.classify(&item).await {
            errors.report(CoordinationError::store("record flagged item", e));
        }
    }
}

async fn run_recovery<S: KeyValueStore, C: Clock>(
    queue: TaskQueue<S, C>,
    mut clock: C,
    interval: Duration,
    cancel: CancellationToken,
    errors: ErrorReporter,
) {
    loop {
        if time::sleep_or_cancelled(&mut clock, interval, &cancel).await {
            return;
        }

        if let Err(e) = queue.return_all_rejected().await {
            errors.report(CoordinationError::queue("return rejected deliveries", e));
        }
        if let Err(e) = queue.return_dead_unacked().await {
            errors.report(CoordinationError::queue("return unacked deliveries", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassificationTable, ErrorLog};
    use crate::role::error_reporter;
    use crate::store::{InMemoryStore, Keyspace};
    use crate::time::{MockClock, RealClock};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            prefetch_limit: 10,
            poll_interval: Duration::from_millis(5),
            recovery_interval: Duration::from_secs(60),
        }
    }

    // Flags everything, so the error log is a record of every handled item.
    async fn start<C: Clock>(
        store: &InMemoryStore<C>,
        clock: C,
    ) -> (ConsumerPipeline<InMemoryStore<C>>, TaskQueue<InMemoryStore<C>, C>) {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let keyspace = Keyspace::default();
        let queue = TaskQueue::open(
            logger.clone(),
            store.clone(),
            clock.clone(),
            &keyspace,
            "sub1",
            Duration::from_secs(10),
        );
        let classifier = ErrorClassifier::new(
            logger.clone(),
            ClassificationTable::new(vec![true]),
            StdRng::seed_from_u64(1),
            ErrorLog::new(store.clone(), &keyspace, 10_000),
        );
        let (reporter, _stream) = error_reporter::error_channel(logger.clone());

        let pipeline = ConsumerPipeline::start(logger, &queue, clock, settings(), classifier, reporter)
            .await
            .unwrap();
        (pipeline, queue)
    }

    async fn handled<C: Clock>(store: &InMemoryStore<C>) -> Vec<WorkItem> {
        ErrorLog::new(store.clone(), &Keyspace::default(), 10_000)
            .drain()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn every_item_is_handled_once_across_stop() {
        let store = InMemoryStore::new();
        let (pipeline, queue) = start(&store, RealClock).await;
        for i in 0..200 {
            queue.publish(&WorkItem::from(format!("{:05}", i))).await.unwrap();
        }

        // Stop somewhere in the middle of the stream.
        tokio::time::sleep(Duration::from_millis(2)).await;
        pipeline.stop().await.unwrap();

        let handled = handled(&store).await;
        let unique: HashSet<_> = handled.iter().cloned().collect();
        assert_eq!(unique.len(), handled.len());
        assert_eq!(handled.len() as u64 + queue.ready_count().await.unwrap(), 200);

        // Nothing left stranded on an unacked list.
        for tag in store.list_range("queue::sub1::consumers").await.unwrap() {
            let unacked = format!("queue::sub1::unacked::{}", String::from_utf8_lossy(&tag));
            assert_eq!(store.list_len(&unacked).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn recovery_returns_rejected_items_for_handling() {
        let (clock, mut controller) = crate::time::mocked_clock();
        let store: InMemoryStore<MockClock> = InMemoryStore::with_clock(clock.clone());
        store.list_push("queue::sub1::rejected", b"AB3x9").await.unwrap();

        let (pipeline, _queue) = start(&store, clock).await;

        let mut handled_items = Vec::new();
        for _ in 0..1000 {
            controller.advance(Duration::from_secs(1));
            tokio::time::sleep(Duration::from_millis(1)).await;
            handled_items.extend(handled(&store).await);
            if !handled_items.is_empty() {
                break;
            }
        }
        assert_eq!(handled_items, vec![WorkItem::from("AB3x9")]);

        pipeline.stop().await.unwrap();
    }
}
