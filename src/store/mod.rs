mod api;
mod in_memory;
mod keyspace;
mod redis_store;

pub use api::KeyValueStore;
pub use api::NodeId;
pub use api::StoreError;
pub use in_memory::InMemoryStore;
pub use keyspace::Keyspace;
pub use redis_store::RedisStore;
pub use redis_store::RedisStoreConfig;
