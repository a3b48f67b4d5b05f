//! Errors surfaced by the merge engine.
//!
//! Only malformed descriptors and hard dispatch failures are errors. Unknown
//! routes, unsatisfiable placeholders, and deadlocked dependencies all degrade
//! to `null` values in the merged result instead.

use thiserror::Error;

/// A request descriptor that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}': {reason}")]
pub struct ConfigurationError {
    pub field: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Main error type for merge batches.
#[derive(Debug, Error)]
pub enum MergeError {
    /// One or more descriptors were malformed. Every field is checked, so
    /// this lists all offending fields at once.
    #[error("invalid request descriptor(s): {}", join_failures(.0))]
    Configuration(Vec<ConfigurationError>),

    /// A dispatcher raised while executing a sub-request; the batch is aborted.
    #[error("sub-request '{field}' failed: {source}")]
    Dispatch {
        field: String,
        #[source]
        source: anyhow::Error,
    },

    /// `run` was called again on a batch that previously aborted.
    #[error("merge batch was aborted by the failure of field '{field}'")]
    BatchAborted { field: String },
}

impl MergeError {
    /// Field responsible for the error, when there is exactly one.
    pub fn field(&self) -> Option<&str> {
        match self {
            MergeError::Configuration(failures) if failures.len() == 1 => Some(failures[0].field.as_str()),
            MergeError::Configuration(_) => None,
            MergeError::Dispatch { field, .. } | MergeError::BatchAborted { field } => Some(field.as_str()),
        }
    }
}

fn join_failures(failures: &[ConfigurationError]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
