mod config;
mod handle;
mod options;
mod wiring;

pub use config::AppConfig;
pub use config::ConfigError;
pub use config::NodeSection;
pub use config::RedisSection;
pub use handle::Node;
pub use handle::NodeHandle;
pub use options::NodeOptions;
pub use wiring::try_create_node;
pub use wiring::try_create_redis_node;
pub use wiring::NodeConfig;
pub use wiring::NodeCreationError;
