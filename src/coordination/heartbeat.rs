use crate::store::{KeyValueStore, Keyspace, StoreError};
use crate::time::{to_chrono, Clock};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Heartbeat is the producer's liveness signal: a timestamp record that the store expires on its
/// own shortly after the producer stops refreshing it.
#[derive(Clone)]
pub(crate) struct Heartbeat<S: KeyValueStore, C: Clock> {
    logger: slog::Logger,
    store: S,
    clock: C,
    key: String,
    expiry: Duration,
}

impl<S: KeyValueStore, C: Clock> Heartbeat<S, C> {
    pub(crate) fn new(logger: slog::Logger, store: S, clock: C, keyspace: &Keyspace, expiry: Duration) -> Self {
        Heartbeat {
            logger,
            store,
            clock,
            key: keyspace.heartbeat(),
            expiry,
        }
    }

    pub(crate) async fn record_heartbeat(&self) -> Result<(), StoreError> {
        let now = self.clock.now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.store
            .set_with_expiry(&self.key, &now, self.expiry)
            .await
            .map_err(|e| {
                slog::warn!(self.logger, "Failed to record heartbeat: {}", e);
                e
            })
    }

    /// A missing record counts as expired. That's what lets the very first node get promoted
    /// before any producer has ever published.
    pub(crate) async fn is_heartbeat_expired(&self) -> Result<bool, StoreError> {
        let value = self.store.get(&self.key).await.map_err(|e| {
            slog::warn!(self.logger, "Failed to read heartbeat: {}", e);
            e
        })?;

        let last_sent = match value {
            None => return Ok(true),
            Some(v) => self.parse_timestamp(&v)?,
        };

        Ok(last_sent + to_chrono(self.expiry) < self.clock.now())
    }

    fn parse_timestamp(&self, value: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::MalformedValue {
                key: self.key.clone(),
                reason: format!("expected RFC 3339 timestamp, got '{}': {}", value, e),
            })
    }
}
