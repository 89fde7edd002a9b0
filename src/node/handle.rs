use crate::classifier::ErrorLog;
use crate::coordination::MasterLease;
use crate::queue::WorkItem;
use crate::role::{ErrorStream, RoleChangeListener, RoleStateMachine};
use crate::store::{KeyValueStore, NodeId, StoreError};
use crate::time::Clock;
use tokio_util::sync::CancellationToken;

/// Node is one member of the worker pool, ready to run.
pub struct Node<S: KeyValueStore, C: Clock> {
    pub(super) logger: slog::Logger,
    pub(super) handle: NodeHandle<S>,
    pub(super) state_machine: RoleStateMachine<S, C>,
    pub(super) error_stream: Option<ErrorStream>,
}

impl<S: KeyValueStore, C: Clock> Node<S, C> {
    pub fn id(&self) -> NodeId {
        self.handle.my_id
    }

    pub fn handle(&self) -> NodeHandle<S> {
        self.handle.clone()
    }

    /// Take the stream of errors the node carries on past. If nobody takes it, `run` logs them.
    pub fn take_error_stream(&mut self) -> Option<ErrorStream> {
        self.error_stream.take()
    }

    /// Run until `shutdown` is cancelled. A subscriber drains what it has buffered before this
    /// returns.
    pub async fn run(self, shutdown: CancellationToken) {
        if let Some(error_stream) = self.error_stream {
            tokio::spawn(error_stream.log_all(self.logger.clone()));
        }

        self.state_machine.run(shutdown).await;
    }
}

/// NodeHandle answers questions about a node while it runs.
#[derive(Clone)]
pub struct NodeHandle<S: KeyValueStore> {
    pub(super) my_id: NodeId,
    pub(super) master: MasterLease<S>,
    pub(super) error_log: ErrorLog<S>,
    pub(super) role_listener: RoleChangeListener,
}

impl<S: KeyValueStore> NodeHandle<S> {
    pub fn id(&self) -> NodeId {
        self.my_id
    }

    pub async fn is_current_master(&self) -> Result<bool, StoreError> {
        self.master.is_current_master().await
    }

    pub async fn current_master(&self) -> Result<Option<NodeId>, StoreError> {
        self.master.current_master().await
    }

    /// Read and clear the error log shared by the whole pool, oldest first.
    pub async fn drain_errors(&self) -> Result<Vec<WorkItem>, StoreError> {
        self.error_log.drain().await
    }

    pub fn role_listener(&self) -> RoleChangeListener {
        self.role_listener.clone()
    }
}
