mod error_classifier;
mod error_log;

pub use error_classifier::ClassificationTable;
pub(crate) use error_classifier::ErrorClassifier;
pub(crate) use error_log::ErrorLog;
