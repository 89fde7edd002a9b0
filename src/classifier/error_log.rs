use crate::queue::WorkItem;
use crate::store::{KeyValueStore, Keyspace, StoreError};

/// ErrorLog is the bounded list of flagged payloads shared by every node.
#[derive(Clone)]
pub(crate) struct ErrorLog<S: KeyValueStore> {
    store: S,
    key: String,
    capacity: usize,
}

impl<S: KeyValueStore> ErrorLog<S> {
    pub(crate) fn new(store: S, keyspace: &Keyspace, capacity: usize) -> Self {
        ErrorLog {
            store,
            key: keyspace.errors(),
            capacity,
        }
    }

    pub(crate) async fn record(&self, item: &WorkItem) -> Result<(), StoreError> {
        self.store
            .list_push_capped(&self.key, item.as_bytes(), self.capacity)
            .await
    }

    /// Read and clear the list in one step, oldest first.
    pub(crate) async fn drain(&self) -> Result<Vec<WorkItem>, StoreError> {
        let mut items: Vec<WorkItem> = self
            .store
            .list_take_all(&self.key)
            .await?
            .into_iter()
            .map(WorkItem::from)
            .collect();
        items.reverse();
        Ok(items)
    }
}
