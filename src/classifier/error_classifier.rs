use crate::classifier::error_log::ErrorLog;
use crate::queue::WorkItem;
use crate::store::{KeyValueStore, StoreError};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};

/// ClassificationTable is a row of slots, one of which is picked uniformly at random for every
/// item. The item is flagged if the picked slot is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassificationTable {
    slots: Vec<bool>,
}

impl ClassificationTable {
    pub fn new(slots: Vec<bool>) -> Self {
        ClassificationTable { slots }
    }

    /// Flag one item in `n` on average. `one_in(0)` flags nothing.
    pub fn one_in(n: usize) -> Self {
        let mut slots = vec![false; n];
        if let Some(first) = slots.first_mut() {
            *first = true;
        }
        ClassificationTable { slots }
    }

    pub fn never() -> Self {
        ClassificationTable { slots: Vec::new() }
    }

    fn pick(&self, rng: &mut StdRng) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        self.slots[rng.gen_range(0..self.slots.len())]
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        ClassificationTable::one_in(20)
    }
}

/// ErrorClassifier decides, per delivered item, whether it counts as erroneous and records the
/// flagged ones in the shared error log.
#[derive(Clone)]
pub(crate) struct ErrorClassifier<S: KeyValueStore> {
    logger: slog::Logger,
    table: Arc<ClassificationTable>,
    rng: Arc<Mutex<StdRng>>,
    error_log: ErrorLog<S>,
}

impl<S: KeyValueStore> ErrorClassifier<S> {
    pub(crate) fn new(logger: slog::Logger, table: ClassificationTable, rng: StdRng, error_log: ErrorLog<S>) -> Self {
        ErrorClassifier {
            logger,
            table: Arc::new(table),
            rng: Arc::new(Mutex::new(rng)),
            error_log,
        }
    }

    /// Returns true if the item was flagged. A flagged item that couldn't be recorded is an error.
    pub(crate) async fn classify(&self, item: &WorkItem) -> Result<bool, StoreError> {
        let flagged = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.table.pick(&mut rng)
        };

        if flagged {
            self.error_log.record(item).await?;
            slog::info!(self.logger, "Flagged {} as erroneous", item);
        } else {
            slog::debug!(self.logger, "Handled {}", item);
        }
        Ok(flagged)
    }
}
