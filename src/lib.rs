mod classifier;
mod coordination;
mod node;
mod queue;
mod role;
mod store;
mod time;

pub use classifier::ClassificationTable;
pub use coordination::TickOutcome;
pub use node::try_create_node;
pub use node::try_create_redis_node;
pub use node::AppConfig;
pub use node::ConfigError;
pub use node::Node;
pub use node::NodeConfig;
pub use node::NodeCreationError;
pub use node::NodeHandle;
pub use node::NodeOptions;
pub use node::NodeSection;
pub use node::RedisSection;
pub use queue::Consumer;
pub use queue::Delivery;
pub use queue::QueueError;
pub use queue::Subscription;
pub use queue::TaskQueue;
pub use queue::WorkItem;
pub use role::CoordinationError;
pub use role::ErrorStream;
pub use role::Role;
pub use role::RoleChangeListener;
pub use role::RoleState;
pub use store::InMemoryStore;
pub use store::KeyValueStore;
pub use store::Keyspace;
pub use store::NodeId;
pub use store::RedisStore;
pub use store::RedisStoreConfig;
pub use store::StoreError;
pub use time::mocked_clock;
pub use time::Clock;
pub use time::MockClock;
pub use time::MockClockController;
pub use time::RealClock;

// The crate root only declares modules and re-exports. Modules are never `pub`; everything public
// is exported through an explicit `pub use`.
