use bytes::Bytes;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// NodeId is the identifier a store connection assigns to its client. It's unique among live
/// connections and it is the value written under the master and changer keys.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(i64);

impl NodeId {
    pub fn new(id: i64) -> Self {
        NodeId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub(crate) fn to_value(self) -> String {
        self.0.to_string()
    }

    pub(crate) fn parse_value(key: &str, value: &str) -> Result<Self, StoreError> {
        value
            .parse::<i64>()
            .map(NodeId)
            .map_err(|e| StoreError::MalformedValue {
                key: key.to_string(),
                reason: format!("expected node id, got '{}': {}", value, e),
            })
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store transport failure: {0}")]
    Transport(Box<dyn Error + Send + Sync>),

    #[error("Malformed value under key '{key}': {reason}")]
    MalformedValue { key: String, reason: String },

    #[error("Lost a race on key '{key}', retry later")]
    Contended { key: String },

    // Only produced by the in-memory store when a test takes it offline.
    #[error("Store is unavailable")]
    Unavailable,
}

/// KeyValueStore is the set of primitives the coordination layer needs from the shared store. All
/// cross-node mutual exclusion is built from `set_if_absent` and `delete_if_equals`, so those two
/// must be atomic on the server side.
///
/// Lists follow Redis semantics: `list_push` adds at the head, `list_pop_push` pops the tail of
/// `source` and pushes it to the head of `destination` in one step.
#[async_trait::async_trait]
pub trait KeyValueStore: Clone + Send + Sync + 'static {
    /// The identifier of this connection.
    async fn connection_id(&self) -> Result<NodeId, StoreError>;

    /// Return true if the value was written, false if the key already existed.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Return the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Remove `key` iff it currently holds `expected`. Return true if removed.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Return the length of the list after the push.
    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64, StoreError>;

    /// Push, then trim the list down to its `max_len` newest entries.
    async fn list_push_capped(&self, key: &str, value: &[u8], max_len: usize) -> Result<(), StoreError>;

    /// Full contents, head first.
    async fn list_range(&self, key: &str) -> Result<Vec<Bytes>, StoreError>;

    async fn list_pop_push(&self, source: &str, destination: &str) -> Result<Option<Bytes>, StoreError>;

    /// Remove one occurrence of `value`. Return the number removed.
    async fn list_remove(&self, key: &str, value: &[u8]) -> Result<u64, StoreError>;

    async fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Read the whole list and delete it as one atomic step.
    async fn list_take_all(&self, key: &str) -> Result<Vec<Bytes>, StoreError>;
}
