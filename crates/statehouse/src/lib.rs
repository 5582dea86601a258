#![forbid(unsafe_code)]

//! Reactive state container: validated atomic batch writes, ordered
//! subscriptions, bounded undo history, computed values and whitelisted
//! persistence.
//!
//! ```
//! use futures::executor::block_on;
//! use serde_json::json;
//! use statehouse::{SetOptions, Store, StoreConfig};
//!
//! let store = Store::review(StoreConfig::default());
//! block_on(store.set([("selectedStaff", json!("Jane"))], SetOptions::default())).unwrap();
//! assert_eq!(store.get("selectedStaff"), Some(json!("Jane")));
//! assert!(store.undo());
//! assert_eq!(store.get("selectedStaff"), Some(json!("")));
//! ```

use std::collections::BTreeMap;

pub mod computed;
pub mod config;
pub mod error;
pub mod history;
pub mod persist;
pub mod review;
pub mod shape;
pub mod store;
pub mod subscription;
pub mod validate;

pub use serde_json::Value;

/// A full key-value state, ordered by key.
pub type State = BTreeMap<String, Value>;

pub use computed::{COMPUTED_PRIORITY, ComputedHandle};
pub use config::{DEFAULT_HISTORY_LIMIT, StoreConfig};
pub use error::{
    KeyFailure, LoadError, PersistenceError, StorageError, StoreError, SubscriberError,
    ValidationError,
};
pub use history::HistoryEntry;
pub use persist::{
    DEFAULT_STORAGE_KEY, FileStorage, MemoryStorage, PersistedField, PersistenceConfig, Storage,
};
pub use shape::Shape;
pub use store::{BATCH_UPDATE_KEY, Change, RESET_KEY, SetOptions, Store};
pub use subscription::{CallbackOutcome, SubscribeOptions, SubscriptionId, Unsubscribe};
pub use validate::{ValidationResult, Validator, Verdict, builtin};
