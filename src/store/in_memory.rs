use crate::store::api::{KeyValueStore, NodeId, StoreError};
use crate::time::{to_chrono, Clock, RealClock};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// InMemoryStore models a single shared store in process memory. Each `connect()` hands out a
/// new connection with its own id, all connections see the same data. Every operation runs under
/// one mutex, which gives the same atomicity Redis gives single commands.
///
/// Expiry is evaluated lazily against the injected clock, so tests can drive TTLs with a
/// `MockClock`.
#[derive(Clone)]
pub struct InMemoryStore<C: Clock = RealClock> {
    shared: Arc<Mutex<Shared>>,
    clock: C,
    connection_id: NodeId,
}

#[derive(Default)]
struct Shared {
    values: HashMap<String, Value>,
    lists: HashMap<String, VecDeque<Bytes>>,
    last_connection_id: i64,
    unavailable: bool,
}

struct Value {
    data: String,
    expires_at: Option<DateTime<Utc>>,
}

impl InMemoryStore<RealClock> {
    pub fn new() -> Self {
        Self::with_clock(RealClock)
    }
}

impl Default for InMemoryStore<RealClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        let shared = Shared {
            last_connection_id: 1,
            ..Shared::default()
        };

        InMemoryStore {
            shared: Arc::new(Mutex::new(shared)),
            clock,
            connection_id: NodeId::new(1),
        }
    }

    /// Open another connection to the same store.
    pub fn connect(&self) -> Self {
        let mut shared = self.lock();
        shared.last_connection_id += 1;

        InMemoryStore {
            shared: self.shared.clone(),
            clock: self.clock.clone(),
            connection_id: NodeId::new(shared.last_connection_id),
        }
    }

    /// While unavailable, every operation on every connection fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panic while holding the lock can only come from a bug in this file; the data is plain
        // maps so it's still usable.
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(&self) -> Result<MutexGuard<'_, Shared>, StoreError> {
        let shared = self.lock();
        if shared.unavailable {
            return Err(StoreError::Unavailable);
        }
        Ok(shared)
    }
}

impl Shared {
    fn live_value(&mut self, key: &str, now: DateTime<Utc>) -> Option<&Value> {
        let expired = match self.values.get(key) {
            Some(Value {
                expires_at: Some(expires_at),
                ..
            }) => *expires_at <= now,
            _ => false,
        };
        if expired {
            self.values.remove(key);
        }

        self.values.get(key)
    }

    fn list_mut(&mut self, key: &str) -> &mut VecDeque<Bytes> {
        self.lists.entry(key.to_string()).or_insert_with(VecDeque::new)
    }

    // Redis deletes a list once it's empty.
    fn drop_if_empty(&mut self, key: &str) {
        if self.lists.get(key).map(|l| l.is_empty()).unwrap_or(false) {
            self.lists.remove(key);
        }
    }
}

#[async_trait::async_trait]
impl<C: Clock> KeyValueStore for InMemoryStore<C> {
    async fn connection_id(&self) -> Result<NodeId, StoreError> {
        drop(self.available()?);
        Ok(self.connection_id)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut shared = self.available()?;
        if shared.live_value(key, now).is_some() {
            return Ok(false);
        }

        shared.values.insert(
            key.to_string(),
            Value {
                data: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut shared = self.available()?;
        Ok(shared.live_value(key, now).map(|v| v.data.clone()))
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut shared = self.available()?;
        let existed = shared.live_value(key, now).is_some();
        shared.values.remove(key);
        let list_existed = shared.lists.remove(key).is_some();

        Ok((existed || list_existed) as u64)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut shared = self.available()?;
        let matches = shared.live_value(key, now).map(|v| v.data == expected).unwrap_or(false);
        if matches {
            shared.values.remove(key);
        }

        Ok(matches)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut shared = self.available()?;
        shared.values.insert(
            key.to_string(),
            Value {
                data: value.to_string(),
                expires_at: Some(now + to_chrono(ttl)),
            },
        );
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let mut shared = self.available()?;
        let list = shared.list_mut(key);
        list.push_front(Bytes::copy_from_slice(value));

        Ok(list.len() as u64)
    }

    async fn list_push_capped(&self, key: &str, value: &[u8], max_len: usize) -> Result<(), StoreError> {
        let mut shared = self.available()?;
        let list = shared.list_mut(key);
        list.push_front(Bytes::copy_from_slice(value));
        list.truncate(max_len);
        shared.drop_if_empty(key);

        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Bytes>, StoreError> {
        let shared = self.available()?;
        Ok(shared
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_pop_push(&self, source: &str, destination: &str) -> Result<Option<Bytes>, StoreError> {
        let mut shared = self.available()?;
        let item = match shared.lists.get_mut(source).and_then(|l| l.pop_back()) {
            Some(item) => item,
            None => return Ok(None),
        };
        shared.drop_if_empty(source);
        shared.list_mut(destination).push_front(item.clone());

        Ok(Some(item))
    }

    async fn list_remove(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let mut shared = self.available()?;
        let removed = match shared.lists.get_mut(key) {
            Some(list) => match list.iter().position(|item| item.as_ref() == value) {
                Some(position) => {
                    list.remove(position);
                    1
                }
                None => 0,
            },
            None => 0,
        };
        shared.drop_if_empty(key);

        Ok(removed)
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let shared = self.available()?;
        Ok(shared.lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn list_take_all(&self, key: &str) -> Result<Vec<Bytes>, StoreError> {
        let mut shared = self.available()?;
        Ok(shared
            .lists
            .remove(key)
            .map(|l| l.into_iter().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;

    #[tokio::test]
    async fn connections_get_distinct_ids_and_share_data() {
        let a = InMemoryStore::new();
        let b = a.connect();

        assert_ne!(a.connection_id().await.unwrap(), b.connection_id().await.unwrap());

        assert!(a.set_if_absent("k", "a").await.unwrap());
        assert!(!b.set_if_absent("k", "b").await.unwrap());
        assert_eq!(b.get("k").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn values_expire_with_clock() {
        let (clock, mut controller) = time::mocked_clock();
        let store = InMemoryStore::with_clock(clock);

        store.set_with_expiry("k", "v", Duration::from_secs(1)).await.unwrap();
        controller.advance(Duration::from_millis(999));
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        controller.advance(Duration::from_millis(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        // An expired key doesn't block set-if-absent.
        assert!(store.set_if_absent("k", "w").await.unwrap());
    }

    #[tokio::test]
    async fn delete_if_equals_only_removes_matching_value() {
        let store = InMemoryStore::new();
        store.set_if_absent("k", "1").await.unwrap();

        assert!(!store.delete_if_equals("k", "2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("1".to_string()));
        assert!(store.delete_if_equals("k", "1").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_are_fifo_through_pop_push() {
        let store = InMemoryStore::new();
        store.list_push("src", b"first").await.unwrap();
        store.list_push("src", b"second").await.unwrap();

        let moved = store.list_pop_push("src", "dst").await.unwrap();
        assert_eq!(moved, Some(Bytes::from_static(b"first")));
        assert_eq!(store.list_len("src").await.unwrap(), 1);
        assert_eq!(store.list_range("dst").await.unwrap(), vec![Bytes::from_static(b"first")]);

        assert_eq!(store.list_remove("dst", b"first").await.unwrap(), 1);
        assert_eq!(store.list_remove("dst", b"first").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn capped_push_keeps_newest_entries() {
        let store = InMemoryStore::new();
        for i in 0..5u8 {
            store.list_push_capped("errors", &[i], 3).await.unwrap();
        }

        let items = store.list_take_all("errors").await.unwrap();
        assert_eq!(items, vec![Bytes::from(vec![4]), Bytes::from(vec![3]), Bytes::from(vec![2])]);
        assert!(store.list_range("errors").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        let other = store.connect();
        store.set_unavailable(true);

        assert!(matches!(other.get("k").await, Err(StoreError::Unavailable)));
        assert!(matches!(other.list_push("l", b"x").await, Err(StoreError::Unavailable)));

        store.set_unavailable(false);
        assert!(other.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connection_id_checks_availability_without_holding_the_lock() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.connection_id().await, Err(StoreError::Unavailable)));

        store.set_unavailable(false);
        let id = store.connection_id().await.unwrap();
        // The next call on the same connection must not block on the store mutex.
        assert_eq!(store.connection_id().await.unwrap(), id);
        assert!(store.set_if_absent("k", "v").await.unwrap());
    }
}
