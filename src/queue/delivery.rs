use crate::queue::task_queue::QueueError;
use crate::queue::WorkItem;
use crate::store::KeyValueStore;

/// Delivery is one payload a consumer has taken off the ready list. Until it is acked or rejected
/// the payload stays on the consumer's unacked list, where the recovery pass can find it if the
/// consumer dies.
pub struct Delivery<S: KeyValueStore> {
    payload: WorkItem,
    store: S,
    unacked_key: String,
    rejected_key: String,
}

impl<S: KeyValueStore> Delivery<S> {
    pub(crate) fn new(payload: WorkItem, store: S, unacked_key: String, rejected_key: String) -> Self {
        Delivery {
            payload,
            store,
            unacked_key,
            rejected_key,
        }
    }

    pub fn payload(&self) -> &WorkItem {
        &self.payload
    }

    /// Returns false if the delivery had already been returned to the queue by recovery.
    pub async fn ack(self) -> Result<bool, QueueError> {
        let removed = self
            .store
            .list_remove(&self.unacked_key, self.payload.as_bytes())
            .await?;
        Ok(removed > 0)
    }

    /// Move the payload to the rejected list, from which recovery returns it to ready. Returns
    /// false, and moves nothing, if recovery got to it first.
    pub async fn reject(self) -> Result<bool, QueueError> {
        let removed = self
            .store
            .list_remove(&self.unacked_key, self.payload.as_bytes())
            .await?;
        if removed == 0 {
            return Ok(false);
        }

        self.store.list_push(&self.rejected_key, self.payload.as_bytes()).await?;
        Ok(true)
    }
}

impl<S: KeyValueStore> std::fmt::Debug for Delivery<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &self.payload)
            .field("unacked_key", &self.unacked_key)
            .finish()
    }
}
