use crate::node::options::NodeOptions;
use crate::store::RedisStoreConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// AppConfig is the on-disk configuration of the `master-relay` binary.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub redis: RedisSection,
    #[serde(default)]
    pub node: NodeSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisSection {
    pub url: String,
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_db")]
    pub db: i64,
    #[serde(default = "default_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Everything optional; unset values fall back to the node defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    pub publish_interval_ms: Option<u64>,
    pub heartbeat_expiry_ms: Option<u64>,
    pub master_poll_interval_ms: Option<u64>,
    pub changer_tick_interval_ms: Option<u64>,
    pub changer_patience: Option<u32>,
    pub prefetch_limit: Option<usize>,
    pub consumer_poll_interval_ms: Option<u64>,
    pub recovery_interval_ms: Option<u64>,
    pub consumer_heartbeat_ttl_ms: Option<u64>,
    pub error_log_capacity: Option<usize>,
    pub queue_name: Option<String>,
    pub key_prefix: Option<String>,
    pub classification_seed: Option<u64>,
}

fn default_db() -> i64 {
    1
}

fn default_timeout_ms() -> u64 {
    5000
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn redis_store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.redis.url.clone(),
            fallback_url: self.redis.fallback_url.clone(),
            password: self.redis.password.clone(),
            db: self.redis.db,
            dial_timeout: Duration::from_millis(self.redis.dial_timeout_ms),
            read_timeout: Duration::from_millis(self.redis.read_timeout_ms),
        }
    }

    pub fn node_options(&self) -> NodeOptions {
        let node = &self.node;
        NodeOptions {
            publish_interval: node.publish_interval_ms.map(Duration::from_millis),
            heartbeat_expiry: node.heartbeat_expiry_ms.map(Duration::from_millis),
            master_poll_interval: node.master_poll_interval_ms.map(Duration::from_millis),
            changer_tick_interval: node.changer_tick_interval_ms.map(Duration::from_millis),
            changer_patience: node.changer_patience,
            prefetch_limit: node.prefetch_limit,
            consumer_poll_interval: node.consumer_poll_interval_ms.map(Duration::from_millis),
            recovery_interval: node.recovery_interval_ms.map(Duration::from_millis),
            consumer_heartbeat_ttl: node.consumer_heartbeat_ttl_ms.map(Duration::from_millis),
            error_log_capacity: node.error_log_capacity,
            queue_name: node.queue_name.clone(),
            key_prefix: node.key_prefix.clone(),
            classification_table: None,
            classification_seed: node.classification_seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml("redis:\n  url: redis://127.0.0.1:6379\n").unwrap();

        let redis = config.redis_store_config();
        assert_eq!(redis.db, 1);
        assert_eq!(redis.password, None);
        assert_eq!(redis.dial_timeout, Duration::from_secs(5));

        let options = config.node_options();
        assert_eq!(options.publish_interval, None);
        assert_eq!(options.queue_name, None);
    }

    #[test]
    fn node_section_maps_milliseconds() {
        let yaml = r#"
redis:
  url: redis://primary:6379
  fallback_url: redis://127.0.0.1:6379
  password: hunter2
  db: 3
node:
  publish_interval_ms: 250
  changer_patience: 3
  queue_name: jobs
  key_prefix: pool-a
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.redis.fallback_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.redis_store_config().db, 3);

        let options = config.node_options();
        assert_eq!(options.publish_interval, Some(Duration::from_millis(250)));
        assert_eq!(options.changer_patience, Some(3));
        assert_eq!(options.queue_name.as_deref(), Some("jobs"));
        assert_eq!(options.key_prefix.as_deref(), Some("pool-a"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "redis:\n  url: redis://x\n  hostname: y\n";
        assert!(matches!(AppConfig::from_yaml(yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = AppConfig::from_file("/nonexistent/config.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/config.yaml"));
    }
}
