use crate::store::api::{KeyValueStore, NodeId, StoreError};
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo};
use std::time::Duration;

// GET + DEL must happen as one step, otherwise a changer rotated by another node between the two
// calls would be deleted.
const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone, Debug)]
pub struct RedisStoreConfig {
    pub url: String,
    /// Tried once if `url` can't be reached.
    pub fallback_url: Option<String>,
    /// Overrides whatever the url carries, when set.
    pub password: Option<String>,
    pub db: i64,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
}

/// RedisStore runs every primitive over one multiplexed connection. The connection's `CLIENT ID`
/// is this node's id, so the store must not transparently reconnect under a new id; a broken
/// connection surfaces as transport errors until the process restarts.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    delete_if_equals: redis::Script,
}

impl RedisStore {
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, StoreError> {
        match Self::connect_url(&config.url, config).await {
            Ok(store) => Ok(store),
            Err(e) => match &config.fallback_url {
                Some(fallback_url) => Self::connect_url(fallback_url, config).await,
                None => Err(e),
            },
        }
    }

    async fn connect_url(url: &str, config: &RedisStoreConfig) -> Result<Self, StoreError> {
        let mut info = url.into_connection_info().map_err(transport)?;
        info.redis.db = config.db;
        if config.password.is_some() {
            info.redis.password = config.password.clone();
        }

        let client = redis::Client::open(info).map_err(transport)?;
        let mut conn = client
            .get_multiplexed_async_connection_with_timeouts(config.read_timeout, config.dial_timeout)
            .await
            .map_err(transport)?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(transport)?;

        Ok(RedisStore {
            conn,
            delete_if_equals: redis::Script::new(DELETE_IF_EQUALS_SCRIPT),
        })
    }
}

fn transport(e: redis::RedisError) -> StoreError {
    StoreError::Transport(Box::new(e))
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn connection_id(&self) -> Result<NodeId, StoreError> {
        let mut conn = self.conn.clone();
        let id: i64 = redis::cmd("CLIENT")
            .arg("ID")
            .query_async(&mut conn)
            .await
            .map_err(transport)?;

        Ok(NodeId::new(id))
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.set_nx(key, value).await.map_err(transport)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(transport)
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(transport)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .delete_if_equals
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(transport)?;

        Ok(removed == 1)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // PSETEX rejects 0.
        let millis = (ttl.as_millis() as u64).max(1);
        conn.pset_ex(key, value, millis).await.map_err(transport)
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush(key, value).await.map_err(transport)
    }

    async fn list_push_capped(&self, key: &str, value: &[u8], max_len: usize) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let last_kept = max_len as isize - 1;
        let _: (u64, ()) = redis::pipe()
            .atomic()
            .lpush(key, value)
            .ltrim(key, 0, last_kept)
            .query_async(&mut conn)
            .await
            .map_err(transport)?;

        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let items: Vec<Vec<u8>> = conn.lrange(key, 0, -1).await.map_err(transport)?;

        Ok(items.into_iter().map(Bytes::from).collect())
    }

    async fn list_pop_push(&self, source: &str, destination: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let item: Option<Vec<u8>> = conn.rpoplpush(source, destination).await.map_err(transport)?;

        Ok(item.map(Bytes::from))
    }

    async fn list_remove(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.lrem(key, 1, value).await.map_err(transport)
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.llen(key).await.map_err(transport)
    }

    async fn list_take_all(&self, key: &str) -> Result<Vec<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let (items, _): (Vec<Vec<u8>>, u64) = redis::pipe()
            .atomic()
            .lrange(key, 0, -1)
            .del(key)
            .query_async(&mut conn)
            .await
            .map_err(transport)?;

        Ok(items.into_iter().map(Bytes::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These need a running Redis: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
    fn config() -> RedisStoreConfig {
        RedisStoreConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into()),
            fallback_url: None,
            password: None,
            db: 15,
            dial_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn redis_set_if_absent_and_conditional_delete() {
        let store = RedisStore::connect(&config()).await.unwrap();
        let key = format!("master-relay-test:{}", uuid::Uuid::new_v4());

        assert!(store.set_if_absent(&key, "7").await.unwrap());
        assert!(!store.set_if_absent(&key, "8").await.unwrap());
        assert!(!store.delete_if_equals(&key, "8").await.unwrap());
        assert!(store.delete_if_equals(&key, "7").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore]
    async fn redis_list_take_all_clears_list() {
        let store = RedisStore::connect(&config()).await.unwrap();
        let key = format!("master-relay-test:{}", uuid::Uuid::new_v4());

        store.list_push_capped(&key, b"a", 2).await.unwrap();
        store.list_push_capped(&key, b"b", 2).await.unwrap();
        store.list_push_capped(&key, b"c", 2).await.unwrap();

        let items = store.list_take_all(&key).await.unwrap();
        assert_eq!(items, vec![Bytes::from_static(b"c"), Bytes::from_static(b"b")]);
        assert_eq!(store.list_len(&key).await.unwrap(), 0);
    }
}
