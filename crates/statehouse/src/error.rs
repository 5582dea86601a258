#![forbid(unsafe_code)]

//! Error types for the store.
//!
//! Only [`ValidationError`] crosses the public write boundary, as the `Err`
//! arm of [`Store::set`](crate::Store::set). Persistence, load and subscriber
//! failures are logged and swallowed inside the store; their types are public
//! so storage backends and tests can name them.

use std::fmt;

use thiserror::Error;

/// One key's rejection inside a failed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    /// The offending state key.
    pub key: String,
    /// Every message its validator (or the gateway) produced.
    pub errors: Vec<String>,
}

impl fmt::Display for KeyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.errors.join(", "))
    }
}

/// A batch was rejected. No key of the batch was applied.
///
/// Carries every failing key, in batch order, so a caller fixing several
/// fields sees all of them at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", join_failures(.failures))]
pub struct ValidationError {
    failures: Vec<KeyFailure>,
}

fn join_failures(failures: &[KeyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub(crate) fn new(failures: Vec<KeyFailure>) -> Self {
        Self { failures }
    }

    /// All failing keys with their messages.
    #[must_use]
    pub fn failures(&self) -> &[KeyFailure] {
        &self.failures
    }

    /// Whether `key` is among the failing keys.
    #[must_use]
    pub fn mentions(&self, key: &str) -> bool {
        self.failures.iter().any(|failure| failure.key == key)
    }
}

/// Failure of a [`Storage`](crate::persist::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Writing the whitelisted subset failed. The in-memory commit stands.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialize persisted state: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A persisted blob was rejected on load. Defaults are retained.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("persisted state is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("persisted state is not a JSON object")]
    NotAnObject,

    #[error("persisted state is missing required key `{key}`")]
    MissingKey { key: String },

    #[error("persisted key `{key}` does not match expected shape {expected}")]
    ShapeMismatch { key: String, expected: String },
}

/// An observer callback failed. The subscription is evicted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriberError {
    #[error("callback failed: {0}")]
    Failed(String),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

/// Configuration errors raised when registering computed properties.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("`{name}` is reserved for store notifications")]
    ReservedName { name: String },

    #[error("`{name}` is already a state key")]
    TemplateKeyConflict { name: String },

    #[error("computed property `{name}` already exists")]
    DuplicateComputed { name: String },

    #[error("computed property `{name}` depends on unknown key `{dependency}`")]
    UnknownDependency { name: String, dependency: String },

    #[error("computed dependency cycle: {}", path.join(" -> "))]
    ComputedCycle { path: Vec<String> },
}

pub type Result<T> = std::result::Result<T, StoreError>;
