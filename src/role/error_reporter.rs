use crate::queue::QueueError;
use crate::store::StoreError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// CoordinationError is something a role loop hit and carried on past. None of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("Failed to {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("Failed to {operation}: {source}")]
    Queue {
        operation: &'static str,
        #[source]
        source: QueueError,
    },
}

impl CoordinationError {
    pub(crate) fn store(operation: &'static str, source: StoreError) -> Self {
        CoordinationError::Store { operation, source }
    }

    pub(crate) fn queue(operation: &'static str, source: QueueError) -> Self {
        CoordinationError::Queue { operation, source }
    }
}

pub(crate) fn error_channel(logger: slog::Logger) -> (ErrorReporter, ErrorStream) {
    let (tx, rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
    (ErrorReporter { logger, tx }, ErrorStream { rx })
}

/// ErrorReporter never blocks the loop reporting through it: if nobody keeps up with the stream,
/// the error is logged here and dropped.
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    logger: slog::Logger,
    tx: mpsc::Sender<CoordinationError>,
}

impl ErrorReporter {
    pub(crate) fn report(&self, error: CoordinationError) {
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(error)) => {
                slog::warn!(self.logger, "Error stream full, dropping: {}", error);
            }
            Err(TrySendError::Closed(error)) => {
                slog::warn!(self.logger, "{}", error);
            }
        }
    }
}

/// ErrorStream yields the errors the node's loops carried on past.
pub struct ErrorStream {
    rx: mpsc::Receiver<CoordinationError>,
}

impl ErrorStream {
    pub async fn next(&mut self) -> Option<CoordinationError> {
        self.rx.recv().await
    }

    /// Log every error until the node goes away.
    pub(crate) async fn log_all(mut self, logger: slog::Logger) {
        while let Some(error) = self.next().await {
            slog::error!(logger, "{}", error);
        }
    }
}
