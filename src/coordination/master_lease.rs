use crate::store::{KeyValueStore, Keyspace, NodeId, StoreError};

/// MasterLease owns the `master -> NodeId` record. The record has no TTL; it changes hands only
/// through an explicit release by the failover path followed by a claim.
#[derive(Clone)]
pub(crate) struct MasterLease<S: KeyValueStore> {
    logger: slog::Logger,
    store: S,
    key: String,
    my_id: NodeId,
}

impl<S: KeyValueStore> MasterLease<S> {
    pub(crate) fn new(logger: slog::Logger, store: S, keyspace: &Keyspace, my_id: NodeId) -> Self {
        MasterLease {
            logger,
            store,
            key: keyspace.master(),
            my_id,
        }
    }

    /// Attempt set-if-absent of the master record to our id. A record that already exists (ours or
    /// anybody's) is left alone and is not an error. Returns true if this call wrote the record.
    pub(crate) async fn claim_master(&self) -> Result<bool, StoreError> {
        let claimed = self
            .store
            .set_if_absent(&self.key, &self.my_id.to_value())
            .await
            .map_err(|e| self.log_err("claim master", e))?;

        if claimed {
            slog::info!(self.logger, "Claimed master lease");
        } else {
            slog::debug!(self.logger, "Master lease already held");
        }
        Ok(claimed)
    }

    pub(crate) async fn current_master(&self) -> Result<Option<NodeId>, StoreError> {
        let value = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| self.log_err("read master", e))?;

        match value {
            None => Ok(None),
            Some(v) => NodeId::parse_value(&self.key, &v)
                .map(Some)
                .map_err(|e| self.log_err("read master", e)),
        }
    }

    /// False when nobody holds the lease, as well as when somebody else does.
    pub(crate) async fn is_current_master(&self) -> Result<bool, StoreError> {
        Ok(self.current_master().await? == Some(self.my_id))
    }

    /// Unconditionally delete the master record. Returns the number of records removed.
    pub(crate) async fn release_stale_master(&self) -> Result<u64, StoreError> {
        let removed = self
            .store
            .delete(&self.key)
            .await
            .map_err(|e| self.log_err("release master", e))?;

        slog::info!(self.logger, "Released stale master lease, removed {}", removed);
        Ok(removed)
    }

    fn log_err(&self, operation: &str, e: StoreError) -> StoreError {
        slog::warn!(self.logger, "Failed to {}: {}", operation, e);
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn lease(store: &InMemoryStore, id: i64) -> MasterLease<InMemoryStore> {
        MasterLease::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            store.clone(),
            &Keyspace::default(),
            NodeId::new(id),
        )
    }

    #[tokio::test]
    async fn first_claim_wins_and_later_claims_are_noops() {
        let store = InMemoryStore::new();
        let a = lease(&store, 10);
        let b = lease(&store, 20);

        assert!(!a.is_current_master().await.unwrap());
        assert_eq!(a.current_master().await.unwrap(), None);

        assert!(a.claim_master().await.unwrap());
        assert!(!b.claim_master().await.unwrap());
        // Idempotent for the holder too.
        assert!(!a.claim_master().await.unwrap());

        assert!(a.is_current_master().await.unwrap());
        assert!(!b.is_current_master().await.unwrap());
        assert_eq!(b.current_master().await.unwrap(), Some(NodeId::new(10)));
    }

    #[tokio::test]
    async fn release_then_claim_hands_over() {
        let store = InMemoryStore::new();
        let a = lease(&store, 10);
        let b = lease(&store, 20);
        a.claim_master().await.unwrap();

        assert_eq!(b.release_stale_master().await.unwrap(), 1);
        assert_eq!(b.release_stale_master().await.unwrap(), 0);
        assert!(b.claim_master().await.unwrap());

        assert!(b.is_current_master().await.unwrap());
        assert!(!a.is_current_master().await.unwrap());
    }

    #[tokio::test]
    async fn malformed_record_is_an_error_not_a_panic() {
        let store = InMemoryStore::new();
        store.set_if_absent("master", "not-a-number").await.unwrap();

        let result = lease(&store, 10).is_current_master().await;
        assert!(matches!(result, Err(StoreError::MalformedValue { .. })));
    }

    #[tokio::test]
    async fn transport_errors_surface() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);

        assert!(lease(&store, 10).claim_master().await.is_err());
        assert!(lease(&store, 10).is_current_master().await.is_err());
    }
}
