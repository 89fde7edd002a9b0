use crate::store::{KeyValueStore, Keyspace, NodeId, StoreError};

/// Changer elects, among subscribers, the single node allowed to attempt failover. Election uses
/// the same first-writer-wins set-if-absent as the master lease; rotation is a conditional delete
/// so a node can only unseat the changer it actually observed.
#[derive(Clone)]
pub(crate) struct Changer<S: KeyValueStore> {
    logger: slog::Logger,
    store: S,
    key: String,
    my_id: NodeId,
}

impl<S: KeyValueStore> Changer<S> {
    pub(crate) fn new(logger: slog::Logger, store: S, keyspace: &Keyspace, my_id: NodeId) -> Self {
        Changer {
            logger,
            store,
            key: keyspace.changer(),
            my_id,
        }
    }

    /// Read the current changer, electing ourselves if there is none.
    pub(crate) async fn current_changer(&self) -> Result<NodeId, StoreError> {
        if let Some(changer) = self.read().await? {
            return Ok(changer);
        }

        let elected = self.store.set_if_absent(&self.key, &self.my_id.to_value()).await?;
        if elected {
            slog::info!(self.logger, "Elected self as changer");
            return Ok(self.my_id);
        }

        // Somebody else won between our read and our write. Whoever it is, they're the changer,
        // unless they've already been rotated out again, in which case we try once more next tick.
        match self.read().await? {
            Some(changer) => Ok(changer),
            None => Err(StoreError::Contended { key: self.key.clone() }),
        }
    }

    pub(crate) async fn is_self_changer(&self) -> Result<bool, StoreError> {
        Ok(self.current_changer().await? == self.my_id)
    }

    /// Delete the changer record iff it still names `stale`. Returns true if it was removed.
    pub(crate) async fn rotate_changer(&self, stale: NodeId) -> Result<bool, StoreError> {
        let removed = self.store.delete_if_equals(&self.key, &stale.to_value()).await?;
        if removed {
            slog::info!(self.logger, "Rotated out unresponsive changer {:?}", stale);
        } else {
            slog::debug!(self.logger, "Changer {:?} already rotated", stale);
        }
        Ok(removed)
    }

    /// Drop our own changer record once failover is done, so the next expiry episode elects
    /// afresh.
    pub(crate) async fn resign(&self) -> Result<bool, StoreError> {
        self.store.delete_if_equals(&self.key, &self.my_id.to_value()).await
    }

    async fn read(&self) -> Result<Option<NodeId>, StoreError> {
        match self.store.get(&self.key).await? {
            None => Ok(None),
            Some(v) => NodeId::parse_value(&self.key, &v).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn changer(store: &InMemoryStore, id: i64) -> Changer<InMemoryStore> {
        Changer::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            store.clone(),
            &Keyspace::default(),
            NodeId::new(id),
        )
    }

    #[tokio::test]
    async fn first_reader_becomes_changer() {
        let store = InMemoryStore::new();
        let b = changer(&store, 2);
        let c = changer(&store, 3);

        assert_eq!(b.current_changer().await.unwrap(), NodeId::new(2));
        assert_eq!(c.current_changer().await.unwrap(), NodeId::new(2));
        assert!(b.is_self_changer().await.unwrap());
        assert!(!c.is_self_changer().await.unwrap());
    }

    #[tokio::test]
    async fn rotating_a_stale_id_never_removes_a_newer_changer() {
        let store = InMemoryStore::new();
        let b = changer(&store, 2);
        let c = changer(&store, 3);
        let d = changer(&store, 4);

        // C elects itself, D observes C.
        let observed_by_c = c.current_changer().await.unwrap();
        let observed_by_d = d.current_changer().await.unwrap();
        assert_eq!(observed_by_c, NodeId::new(3));
        assert_eq!(observed_by_d, NodeId::new(3));

        // C's record gets rotated out, then B is elected.
        assert!(c.rotate_changer(observed_by_c).await.unwrap());
        assert_eq!(b.current_changer().await.unwrap(), NodeId::new(2));

        // D's rotation is based on the stale observation and must be a no-op.
        assert!(!d.rotate_changer(observed_by_d).await.unwrap());
        assert_eq!(d.current_changer().await.unwrap(), NodeId::new(2));
    }

    #[tokio::test]
    async fn concurrent_rotations_remove_at_most_once() {
        let store = InMemoryStore::new();
        let holder = changer(&store, 1);
        let stale = holder.current_changer().await.unwrap();

        let mut handles = Vec::new();
        for id in 10..20 {
            let observer = changer(&store.connect(), id);
            handles.push(tokio::spawn(async move { observer.rotate_changer(stale).await.unwrap() }));
        }

        let mut removed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                removed += 1;
            }
        }
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn resign_only_removes_own_record() {
        let store = InMemoryStore::new();
        let b = changer(&store, 2);
        let c = changer(&store, 3);
        b.current_changer().await.unwrap();

        assert!(!c.resign().await.unwrap());
        assert!(b.resign().await.unwrap());
        assert_eq!(c.current_changer().await.unwrap(), NodeId::new(3));
    }
}
