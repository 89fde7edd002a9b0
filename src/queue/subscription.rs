use crate::queue::task_queue::{Consumer, QueueError};
use crate::queue::{Delivery, WorkItem};
use crate::store::KeyValueStore;
use crate::time::{self, to_chrono, Clock};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Subscription is a running consumer: a fetch task filling a bounded buffer from the ready list
/// and a consume task handing the buffer to the `Consumer`. Dropping it without
/// `stop_consuming` cancels both tasks and leaves the buffered deliveries on the unacked list.
pub struct Subscription<S: KeyValueStore> {
    tag: String,
    cancel: CancellationToken,
    fetch_task: JoinHandle<()>,
    consume_task: JoinHandle<mpsc::Receiver<Delivery<S>>>,
    _stop_on_drop: DropGuard,
}

impl<S: KeyValueStore> Subscription<S> {
    pub(crate) fn start<C: Clock, K: Consumer<S>>(
        tag: String,
        fetcher: Fetcher<S, C>,
        prefetch_limit: usize,
        consumer: K,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(prefetch_limit);

        let fetch_task = tokio::spawn(fetcher.run(tx, cancel.clone()));
        let consume_task = tokio::spawn(run_consume(rx, consumer, cancel.clone()));

        Subscription {
            tag,
            _stop_on_drop: cancel.clone().drop_guard(),
            cancel,
            fetch_task,
            consume_task,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Stop fetching, wait for the delivery in progress to finish, and return whatever was
    /// buffered but not yet handed to the consumer. Those deliveries are still unacked.
    pub async fn stop_consuming(self) -> Result<Vec<Delivery<S>>, QueueError> {
        self.cancel.cancel();

        // Join both before reporting either failure, so neither task outlives this call.
        let fetched = self.fetch_task.await;
        let consumed = self.consume_task.await;
        fetched?;
        let mut rx = consumed?;

        rx.close();
        let mut drained = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            drained.push(delivery);
        }
        Ok(drained)
    }
}

async fn run_consume<S: KeyValueStore, K: Consumer<S>>(
    mut rx: mpsc::Receiver<Delivery<S>>,
    consumer: K,
    cancel: CancellationToken,
) -> mpsc::Receiver<Delivery<S>> {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => return rx,
            delivery = rx.recv() => match delivery {
                Some(delivery) => delivery,
                None => return rx,
            },
        };
        consumer.consume(delivery).await;
    }
}

pub(crate) struct Fetcher<S: KeyValueStore, C: Clock> {
    pub(crate) logger: slog::Logger,
    pub(crate) store: S,
    pub(crate) clock: C,
    pub(crate) ready_key: String,
    pub(crate) unacked_key: String,
    pub(crate) rejected_key: String,
    pub(crate) alive_key: String,
    pub(crate) alive_ttl: Duration,
    pub(crate) poll_interval: Duration,
}

impl<S: KeyValueStore, C: Clock> Fetcher<S, C> {
    async fn run(mut self, tx: mpsc::Sender<Delivery<S>>, cancel: CancellationToken) {
        let mut next_alive_refresh = self.next_alive_refresh();

        loop {
            // A buffer slot is reserved before the pop, so nothing popped is ever left without a
            // place to go. A full buffer must not stop the liveness refresh.
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                permit = tx.reserve() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                _ = self.clock.sleep_until(next_alive_refresh) => None,
            };

            if self.clock.now() >= next_alive_refresh {
                self.refresh_alive().await;
                next_alive_refresh = self.next_alive_refresh();
            }
            let permit = match permit {
                Some(permit) => permit,
                None => continue,
            };

            match self.store.list_pop_push(&self.ready_key, &self.unacked_key).await {
                Ok(Some(payload)) => {
                    permit.send(Delivery::new(
                        WorkItem::from(payload),
                        self.store.clone(),
                        self.unacked_key.clone(),
                        self.rejected_key.clone(),
                    ));
                    continue;
                }
                Ok(None) => {}
                Err(e) => slog::warn!(self.logger, "Failed to fetch delivery: {}", e),
            }

            drop(permit);
            if time::sleep_or_cancelled(&mut self.clock, self.poll_interval, &cancel).await {
                return;
            }
        }
    }

    async fn refresh_alive(&self) {
        if let Err(e) = self
            .store
            .set_with_expiry(&self.alive_key, "1", self.alive_ttl)
            .await
        {
            slog::warn!(self.logger, "Failed to refresh consumer liveness: {}", e);
        }
    }

    fn next_alive_refresh(&self) -> DateTime<Utc> {
        self.clock.now() + to_chrono(self.alive_ttl / 3)
    }
}
