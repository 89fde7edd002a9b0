use crate::classifier::ClassificationTable;
use std::convert::TryFrom;
use std::time::Duration;

#[derive(Clone, Default, Debug)]
pub struct NodeOptions {
    pub publish_interval: Option<Duration>,
    pub heartbeat_expiry: Option<Duration>,
    pub master_poll_interval: Option<Duration>,
    pub changer_tick_interval: Option<Duration>,
    pub changer_patience: Option<u32>,
    pub prefetch_limit: Option<usize>,
    pub consumer_poll_interval: Option<Duration>,
    pub recovery_interval: Option<Duration>,
    pub consumer_heartbeat_ttl: Option<Duration>,
    pub error_log_capacity: Option<usize>,
    pub queue_name: Option<String>,
    pub key_prefix: Option<String>,
    pub classification_table: Option<ClassificationTable>,
    /// Seeds both the classifier and the payload generator. Entropy when absent.
    pub classification_seed: Option<u64>,
}

#[derive(Clone, Debug)]
pub(crate) struct NodeOptionsValidated {
    pub(crate) publish_interval: Duration,
    pub(crate) heartbeat_expiry: Duration,
    pub(crate) master_poll_interval: Duration,
    pub(crate) changer_tick_interval: Duration,
    pub(crate) changer_patience: u32,
    pub(crate) prefetch_limit: usize,
    pub(crate) consumer_poll_interval: Duration,
    pub(crate) recovery_interval: Duration,
    pub(crate) consumer_heartbeat_ttl: Duration,
    pub(crate) error_log_capacity: usize,
    pub(crate) queue_name: String,
    pub(crate) key_prefix: Option<String>,
    pub(crate) classification_table: ClassificationTable,
    pub(crate) classification_seed: Option<u64>,
}

impl NodeOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.publish_interval >= self.heartbeat_expiry {
            return Err("Heartbeat expiry must be greater than the publish interval");
        }
        if self.publish_interval.is_zero()
            || self.master_poll_interval.is_zero()
            || self.changer_tick_interval.is_zero()
            || self.consumer_poll_interval.is_zero()
            || self.recovery_interval.is_zero()
        {
            return Err("Intervals must be non-zero");
        }
        if self.changer_patience == 0 {
            return Err("Changer patience must be at least one tick");
        }
        if self.prefetch_limit == 0 {
            return Err("Prefetch limit must be at least 1");
        }
        if self.consumer_heartbeat_ttl <= self.consumer_poll_interval {
            return Err("Consumer heartbeat TTL must be greater than the consumer poll interval");
        }
        if self.error_log_capacity == 0 {
            return Err("Error log capacity must be at least 1");
        }
        if self.queue_name.is_empty() {
            return Err("Queue name must not be empty");
        }

        Ok(())
    }
}

impl TryFrom<NodeOptions> for NodeOptionsValidated {
    type Error = &'static str;

    fn try_from(options: NodeOptions) -> Result<Self, Self::Error> {
        let values = NodeOptionsValidated {
            publish_interval: options.publish_interval.unwrap_or(Duration::from_millis(500)),
            heartbeat_expiry: options.heartbeat_expiry.unwrap_or(Duration::from_secs(1)),
            master_poll_interval: options.master_poll_interval.unwrap_or(Duration::from_millis(700)),
            changer_tick_interval: options.changer_tick_interval.unwrap_or(Duration::from_secs(1)),
            changer_patience: options.changer_patience.unwrap_or(2),
            prefetch_limit: options.prefetch_limit.unwrap_or(10),
            consumer_poll_interval: options.consumer_poll_interval.unwrap_or(Duration::from_millis(10)),
            recovery_interval: options.recovery_interval.unwrap_or(Duration::from_secs(60)),
            consumer_heartbeat_ttl: options.consumer_heartbeat_ttl.unwrap_or(Duration::from_secs(10)),
            error_log_capacity: options.error_log_capacity.unwrap_or(1000),
            queue_name: options.queue_name.unwrap_or_else(|| "sub1".to_string()),
            key_prefix: options.key_prefix,
            classification_table: options.classification_table.unwrap_or_default(),
            classification_seed: options.classification_seed,
        };

        values.validate()?;
        Ok(values)
    }
}
