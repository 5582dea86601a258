#![forbid(unsafe_code)]

//! Whitelisted persistence of state to a [`Storage`] backend.
//!
//! The gateway writes one JSON object under one namespaced storage key,
//! holding exactly the whitelisted keys. Loading parses that object and
//! checks it field by field before anything reaches the store.
//!
//! # Failure Modes
//!
//! - **Write fails**: the error is returned to the store, which logs and
//!   drops it. The in-memory commit stands.
//! - **Blob malformed**: [`LoadError`] describes the first problem; the store
//!   keeps its current values.

pub mod storage;

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::State;
use crate::error::{LoadError, PersistenceError};
use crate::shape::Shape;

pub use storage::{FileStorage, MemoryStorage, Storage};

/// Default storage key for the persisted blob.
pub const DEFAULT_STORAGE_KEY: &str = "statehouse:state";

/// One whitelisted key and how its persisted value must look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedField {
    pub key: String,
    pub shape: Shape,
    /// A blob without this key is rejected.
    pub required: bool,
}

impl PersistedField {
    #[must_use]
    pub fn required(key: impl Into<String>, shape: Shape) -> Self {
        Self {
            key: key.into(),
            shape,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(key: impl Into<String>, shape: Shape) -> Self {
        Self {
            key: key.into(),
            shape,
            required: false,
        }
    }
}

/// Where and what to persist.
#[derive(Clone)]
pub struct PersistenceConfig {
    /// Storage key of the blob.
    pub storage_key: String,
    /// The whitelist, in blob order.
    pub fields: Vec<PersistedField>,
    /// Backend receiving the blob.
    pub storage: Rc<dyn Storage>,
}

impl PersistenceConfig {
    #[must_use]
    pub fn new(storage: impl Storage + 'static, fields: Vec<PersistedField>) -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            fields,
            storage: Rc::new(storage),
        }
    }

    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Whether `key` is whitelisted.
    #[must_use]
    pub fn persists(&self, key: &str) -> bool {
        self.fields.iter().any(|field| field.key == key)
    }
}

impl fmt::Debug for PersistenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceConfig")
            .field("storage_key", &self.storage_key)
            .field("fields", &self.fields)
            .field("storage", &self.storage)
            .finish()
    }
}

/// Serializes and restores the whitelisted subset of a state.
#[derive(Debug, Clone)]
pub(crate) struct PersistenceGateway {
    config: PersistenceConfig,
}

impl PersistenceGateway {
    pub(crate) fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    pub(crate) fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// The whitelisted subset of `state` as a JSON object.
    pub(crate) fn subset(&self, state: &State) -> Map<String, Value> {
        self.config
            .fields
            .iter()
            .filter_map(|field| {
                state
                    .get(&field.key)
                    .map(|value| (field.key.clone(), value.clone()))
            })
            .collect()
    }

    pub(crate) fn save(&self, state: &State) -> Result<(), PersistenceError> {
        let blob = serde_json::to_string(&Value::Object(self.subset(state)))?;
        self.config.storage.write(&self.config.storage_key, &blob)?;
        Ok(())
    }

    /// Read and check the blob. `Ok(None)` when nothing is stored.
    pub(crate) fn load(&self) -> Result<Option<State>, LoadError> {
        let Some(raw) = self.config.storage.read(&self.config.storage_key)? else {
            return Ok(None);
        };
        let parsed: Value = serde_json::from_str(&raw)?;
        let Value::Object(mut object) = parsed else {
            return Err(LoadError::NotAnObject);
        };

        let mut restored = State::new();
        for field in &self.config.fields {
            match object.remove(&field.key) {
                Some(value) if field.shape.matches(&value) => {
                    restored.insert(field.key.clone(), value);
                }
                Some(_) => {
                    return Err(LoadError::ShapeMismatch {
                        key: field.key.clone(),
                        expected: field.shape.to_string(),
                    });
                }
                None if field.required => {
                    return Err(LoadError::MissingKey {
                        key: field.key.clone(),
                    });
                }
                None => {}
            }
        }
        if !object.is_empty() {
            tracing::debug!(
                message = "store.load_ignored_keys",
                count = object.len()
            );
        }
        Ok(Some(restored))
    }

    pub(crate) fn clear(&self) -> Result<(), PersistenceError> {
        self.config.storage.remove(&self.config.storage_key)?;
        Ok(())
    }
}
