use crate::classifier::{ErrorClassifier, ErrorLog};
use crate::coordination::MasterLease;
use crate::node::config::{AppConfig, ConfigError};
use crate::node::handle::{Node, NodeHandle};
use crate::node::options::{NodeOptions, NodeOptionsValidated};
use crate::queue::TaskQueue;
use crate::role::{self, PayloadGenerator, PipelineSettings, RoleSettings, RoleStateMachine};
use crate::store::{KeyValueStore, Keyspace, RedisStore, StoreError};
use crate::time::{Clock, RealClock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::convert::TryFrom;

pub struct NodeConfig {
    pub logger: slog::Logger,
    pub options: NodeOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Failed to connect to store: {0}")]
    Connect(StoreError),
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Failed to load config: {0}")]
    Config(#[from] ConfigError),
}

pub async fn try_create_node<S: KeyValueStore, C: Clock>(
    config: NodeConfig,
    store: S,
    clock: C,
) -> Result<Node<S, C>, NodeCreationError> {
    let options = NodeOptionsValidated::try_from(config.options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;

    let my_id = store.connection_id().await.map_err(NodeCreationError::Connect)?;
    let logger = config.logger.new(slog::o!("NodeId" => my_id.to_string()));
    let keyspace = Keyspace::new(options.key_prefix.clone());

    let mut seed_rng = match options.classification_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let error_log = ErrorLog::new(store.clone(), &keyspace, options.error_log_capacity);
    let classifier = ErrorClassifier::new(
        logger.clone(),
        options.classification_table.clone(),
        StdRng::seed_from_u64(seed_rng.gen()),
        error_log.clone(),
    );
    let payloads = PayloadGenerator::new(StdRng::seed_from_u64(seed_rng.gen()));

    let queue = TaskQueue::open(
        logger.clone(),
        store.clone(),
        clock.clone(),
        &keyspace,
        &options.queue_name,
        options.consumer_heartbeat_ttl,
    );

    let (errors, error_stream) = role::error_channel(logger.clone());
    let (notifier, role_listener) = role::role_change_channel();

    let settings = RoleSettings {
        publish_interval: options.publish_interval,
        heartbeat_expiry: options.heartbeat_expiry,
        master_poll_interval: options.master_poll_interval,
        changer_tick_interval: options.changer_tick_interval,
        changer_patience: options.changer_patience,
        pipeline: PipelineSettings {
            prefetch_limit: options.prefetch_limit,
            poll_interval: options.consumer_poll_interval,
            recovery_interval: options.recovery_interval,
        },
    };

    let handle = NodeHandle {
        my_id,
        master: MasterLease::new(logger.clone(), store.clone(), &keyspace, my_id),
        error_log,
        role_listener,
    };

    let state_machine = RoleStateMachine::new(
        logger.clone(),
        my_id,
        store,
        clock,
        &keyspace,
        settings,
        queue,
        classifier,
        payloads,
        errors,
        notifier,
    );

    Ok(Node {
        logger,
        handle,
        state_machine,
        error_stream: Some(error_stream),
    })
}

pub async fn try_create_redis_node(
    logger: slog::Logger,
    config: &AppConfig,
) -> Result<Node<RedisStore, RealClock>, NodeCreationError> {
    let store = RedisStore::connect(&config.redis_store_config())
        .await
        .map_err(NodeCreationError::Connect)?;

    let node_config = NodeConfig {
        logger,
        options: config.node_options(),
    };
    try_create_node(node_config, store, RealClock).await
}
