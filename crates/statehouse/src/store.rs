#![forbid(unsafe_code)]

//! The state store and its change gateway.
//!
//! # Design
//!
//! [`Store`] owns a private key-value mapping. Reads hand out clones; every
//! write goes through one commit routine reached by two doors:
//!
//! - [`Store::set`], the public door, validates the whole batch first and
//!   commits nothing if any key fails.
//! - The trusted door (crate-private) skips validation. It is used by the
//!   computed engine, [`Store::undo`] and [`Store::load_persisted_state`].
//!
//! The commit routine applies keys in batch order. For each key that really
//! changed it records history (when the plan asks for it) and dispatches the
//! key's subscribers before moving to the next key. After the batch it sends
//! the optional `batch-update` notification and writes the persistence
//! whitelist.
//!
//! # Invariants
//!
//! 1. The template key set never changes; ordinary writes to unknown or
//!    computed keys are validation failures.
//! 2. A failed batch changes nothing.
//! 3. Writing a value equal to the current one is not a change.
//! 4. No `RefCell` borrow is held while a validator is awaited or a
//!    subscriber runs.
//!
//! # Concurrency
//!
//! `set` suspends only while awaiting pending validators. Two overlapping
//! calls are not serialized: each validates against what it saw and commits
//! when its validators settle, so the later commit wins for shared keys.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::State;
use crate::computed::ComputedRegistry;
use crate::config::StoreConfig;
use crate::error::{KeyFailure, ValidationError};
use crate::history::{HistoryEntry, HistoryLog};
use crate::persist::PersistenceGateway;
use crate::subscription::{CallbackOutcome, SubscribeOptions, SubscriptionId, SubscriptionRegistry, Unsubscribe};
use crate::validate::{ValidationResult, Validator, ValidatorRegistry, Verdict};

/// Reserved notification key for per-batch change lists.
pub const BATCH_UPDATE_KEY: &str = "batch-update";

/// Reserved notification key for a full reset.
pub const RESET_KEY: &str = "reset";

/// One committed key change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub key: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Options for [`Store::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Also notify `batch-update` once with the full change list.
    pub notify_batch: bool,
}

impl SetOptions {
    #[must_use]
    pub fn notify_batch() -> Self {
        Self { notify_batch: true }
    }
}

/// How the commit routine treats one batch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommitPlan {
    record_history: bool,
    persist: bool,
    notify_batch: bool,
}

impl CommitPlan {
    /// A validated write from `set`.
    fn validated(options: SetOptions) -> Self {
        Self {
            record_history: true,
            persist: true,
            notify_batch: options.notify_batch,
        }
    }

    /// A computed property's own value.
    pub(crate) fn derived() -> Self {
        Self {
            record_history: false,
            persist: false,
            notify_batch: false,
        }
    }

    /// Undo of a recorded change.
    fn undo() -> Self {
        Self {
            record_history: false,
            persist: true,
            notify_batch: false,
        }
    }

    /// Values restored from storage.
    fn restore() -> Self {
        Self::derived()
    }
}

pub(crate) struct StoreInner {
    pub(crate) defaults: State,
    pub(crate) state: RefCell<State>,
    pub(crate) validators: RefCell<ValidatorRegistry>,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) history: RefCell<HistoryLog>,
    pub(crate) computed: RefCell<ComputedRegistry>,
    persistence: Option<PersistenceGateway>,
}

/// A reactive state container.
///
/// Cloning a `Store` creates a new handle to the **same** state, the way
/// application code passes one store to many consumers.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.inner.state.borrow())
            .field("subscriptions", &self.inner.subscriptions)
            .field("computed", &self.inner.computed.borrow())
            .field("history_len", &self.inner.history.borrow().len())
            .finish()
    }
}

impl Store {
    /// Create a store whose key set and defaults are `template`.
    #[must_use]
    pub fn new(template: State, config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(template.clone()),
                defaults: template,
                validators: RefCell::new(ValidatorRegistry::new()),
                subscriptions: SubscriptionRegistry::new(),
                history: RefCell::new(HistoryLog::new(config.history_limit)),
                computed: RefCell::new(ComputedRegistry::default()),
                persistence: config.persistence.map(PersistenceGateway::new),
            }),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// A copy of the value under `key` (template or computed).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.borrow().get(key).cloned()
    }

    /// A full copy of the current state, computed keys included.
    #[must_use]
    pub fn snapshot(&self) -> State {
        self.inner.state.borrow().clone()
    }

    /// Template keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.defaults.keys().cloned().collect()
    }

    /// The default value of a template key.
    #[must_use]
    pub fn default_value(&self, key: &str) -> Option<Value> {
        self.inner.defaults.get(key).cloned()
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Validate and apply a batch of updates.
    ///
    /// Every validator for the batch's keys runs (pending ones are awaited)
    /// before anything is applied. If any key is rejected, including unknown
    /// and computed keys, no key is applied.
    ///
    /// Synchronous callers (a subscriber writing back, say) can drive the
    /// call with `futures::FutureExt::now_or_never`; it completes in one poll
    /// when every validator involved is synchronous.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] listing every rejected key.
    pub async fn set<K, I>(&self, updates: I, options: SetOptions) -> Result<Vec<Change>, ValidationError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let updates: Vec<(String, Value)> = updates
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();

        if let Err(err) = self.validate_batch(&updates).await {
            tracing::debug!(
                message = "store.validation_failed",
                keys = updates.len(),
                failures = err.failures().len()
            );
            return Err(err);
        }
        Ok(self.commit(updates, CommitPlan::validated(options)))
    }

    async fn validate_batch(&self, updates: &[(String, Value)]) -> Result<(), ValidationError> {
        enum Check {
            Rejected(String),
            Verdict(Verdict),
        }

        let checks: Vec<(String, Check)> = {
            let state = self.inner.state.borrow();
            let validators = self.inner.validators.borrow();
            let computed = self.inner.computed.borrow();
            updates
                .iter()
                .filter_map(|(key, value)| {
                    let check = if computed.contains(key) {
                        Check::Rejected("is a computed property and cannot be set".into())
                    } else if let Some(default) = self.inner.defaults.get(key) {
                        let old = state.get(key).unwrap_or(default);
                        Check::Verdict(validators.get(key)?.check(value, old))
                    } else {
                        Check::Rejected("is not a known state key".into())
                    };
                    Some((key.clone(), check))
                })
                .collect()
        };

        let results = join_all(checks.into_iter().map(|(key, check)| async move {
            let result = match check {
                Check::Rejected(message) => ValidationResult::invalid(message),
                Check::Verdict(verdict) => verdict.resolve().await,
            };
            (key, result)
        }))
        .await;

        let failures: Vec<KeyFailure> = results
            .into_iter()
            .filter(|(_, result)| !result.is_valid)
            .map(|(key, result)| {
                let errors = if result.errors.is_empty() {
                    vec!["rejected by validator".to_string()]
                } else {
                    result.errors
                };
                KeyFailure { key, errors }
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(failures))
        }
    }

    /// The trusted door: apply without validation, history or persistence.
    pub(crate) fn commit_trusted(&self, updates: Vec<(String, Value)>) -> Vec<Change> {
        self.commit(updates, CommitPlan::restore())
    }

    /// The single commit routine behind both doors.
    pub(crate) fn commit(&self, updates: Vec<(String, Value)>, plan: CommitPlan) -> Vec<Change> {
        let mut changes = Vec::with_capacity(updates.len());
        for (key, value) in updates {
            let old = {
                let mut state = self.inner.state.borrow_mut();
                let Some(slot) = state.get_mut(&key) else {
                    tracing::warn!(message = "store.unknown_key", key = key.as_str());
                    continue;
                };
                if *slot == value {
                    continue;
                }
                std::mem::replace(slot, value.clone())
            };
            if plan.record_history {
                self.inner
                    .history
                    .borrow_mut()
                    .record(HistoryEntry::new(key.clone(), old.clone(), value.clone()));
            }
            self.inner.subscriptions.dispatch(&key, &value, Some(&old));
            changes.push(Change {
                key,
                old_value: old,
                new_value: value,
            });
        }

        if changes.is_empty() {
            return changes;
        }
        if plan.notify_batch {
            match serde_json::to_value(&changes) {
                Ok(payload) => self.inner.subscriptions.dispatch(BATCH_UPDATE_KEY, &payload, None),
                Err(err) => tracing::warn!(message = "store.batch_payload_failed", error = %err),
            }
        }
        if plan.persist {
            self.persist();
        }
        tracing::debug!(
            message = "store.commit",
            changes = changes.len(),
            history = plan.record_history
        );
        changes
    }

    /// Restore every template key to its default.
    ///
    /// Per-key subscribers are not notified; observers of `reset` receive the
    /// new full state and the previous one. Computed properties are
    /// recomputed first so the notification sees a consistent state. Values
    /// left behind by disposed computed properties are dropped.
    pub fn reset_state(&self) {
        let previous = {
            let computed = self.inner.computed.borrow();
            let mut state = self.inner.state.borrow_mut();
            let previous = state.clone();
            state.retain(|key, _| computed.contains(key));
            state.extend(
                self.inner
                    .defaults
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
            previous
        };
        self.recompute_all();
        let current = self.snapshot();
        self.persist();
        tracing::debug!(message = "store.reset", keys = self.inner.defaults.len());
        self.inner.subscriptions.dispatch(
            RESET_KEY,
            &Value::Object(current.into_iter().collect()),
            Some(&Value::Object(previous.into_iter().collect())),
        );
    }

    /// Restore `keys` to their defaults through [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// As for `set`; unknown keys are rejected.
    pub async fn reset_keys<K, I>(&self, keys: I) -> Result<Vec<Change>, ValidationError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let updates: Vec<(String, Value)> = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                let value = self.inner.defaults.get(&key).cloned().unwrap_or(Value::Null);
                (key, value)
            })
            .collect();
        self.set(updates, SetOptions::default()).await
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Observe committed changes to `key`.
    ///
    /// The callback receives `(new, old)`. It may return `()` or a
    /// `Result<(), E: Display>`; an `Err` or a panic evicts the subscription.
    /// Reserved keys `batch-update` and `reset` can be observed like any
    /// other.
    ///
    /// A callback that writes its own key is not re-entered: the nested
    /// notification skips it (logged as `store.subscriber_reentrant` at
    /// `debug`), so it does not observe the value it wrote.
    pub fn subscribe<F, R>(&self, key: impl Into<String>, callback: F, options: SubscribeOptions) -> Unsubscribe
    where
        F: FnMut(&Value, Option<&Value>) -> R + 'static,
        R: CallbackOutcome,
    {
        let key = key.into();
        let current = if options.immediate {
            self.get(&key).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        self.inner.subscriptions.subscribe(key, callback, options, &current)
    }

    /// Remove subscription `id` from `key`. Returns whether it existed.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        self.inner.subscriptions.unsubscribe(key, id)
    }

    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.subscriptions.count(key)
    }

    // ── Validators ──────────────────────────────────────────────────────

    /// Bind `validator` to `key`, replacing any existing one.
    pub fn add_validator(&self, key: impl Into<String>, validator: Validator) {
        self.inner.validators.borrow_mut().insert(key, validator);
    }

    /// Returns whether a validator was removed.
    pub fn remove_validator(&self, key: &str) -> bool {
        self.inner.validators.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn has_validator(&self, key: &str) -> bool {
        self.inner.validators.borrow().contains(key)
    }

    // ── History ─────────────────────────────────────────────────────────

    /// The newest `limit` history entries (all when `None`), oldest first.
    #[must_use]
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.inner.history.borrow().recent(limit)
    }

    pub fn clear_history(&self) {
        self.inner.history.borrow_mut().clear();
    }

    /// Revert the newest recorded change.
    ///
    /// The old value is restored without re-running validators, even if the
    /// rules have changed since it was recorded. Subscribers and persistence
    /// run as for any commit. Returns `false` when there is nothing to undo.
    pub fn undo(&self) -> bool {
        let Some(entry) = self.inner.history.borrow_mut().pop() else {
            return false;
        };
        tracing::debug!(message = "store.undo", key = entry.key.as_str());
        self.commit(vec![(entry.key, entry.old_value)], CommitPlan::undo());
        true
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Whether a persistence target is configured.
    #[must_use]
    pub fn persistence_enabled(&self) -> bool {
        self.inner.persistence.is_some()
    }

    /// Whether `key` is on the persistence whitelist.
    #[must_use]
    pub fn is_persisted(&self, key: &str) -> bool {
        self.inner
            .persistence
            .as_ref()
            .is_some_and(|gateway| gateway.config().persists(key))
    }

    fn persist(&self) {
        let Some(gateway) = &self.inner.persistence else {
            return;
        };
        let result = {
            let state = self.inner.state.borrow();
            gateway.save(&state)
        };
        if let Err(err) = result {
            tracing::warn!(message = "store.persist_failed", error = %err);
        }
    }

    /// Restore the persisted blob merged over the template defaults.
    ///
    /// Every template key not in the blob goes back to its default, so
    /// transient values set before the load do not survive it. Returns
    /// `true` when a blob was found, passed its shape checks and was
    /// applied. A missing blob, unreadable storage, bad JSON, a missing
    /// required key or a shape mismatch all return `false` and leave state
    /// untouched; problems are logged at `warn`.
    pub fn load_persisted_state(&self) -> bool {
        let Some(gateway) = &self.inner.persistence else {
            return false;
        };
        match gateway.load() {
            Ok(Some(mut restored)) => {
                let updates: Vec<(String, Value)> = self
                    .inner
                    .defaults
                    .iter()
                    .map(|(key, default)| {
                        let value = restored.remove(key).unwrap_or_else(|| default.clone());
                        (key.clone(), value)
                    })
                    .collect();
                let changes = self.commit_trusted(updates);
                tracing::info!(message = "store.loaded", changes = changes.len());
                true
            }
            Ok(None) => {
                tracing::debug!(message = "store.load_empty");
                false
            }
            Err(err) => {
                tracing::warn!(message = "store.load_rejected", error = %err);
                false
            }
        }
    }

    /// Remove the persisted blob. Failures are logged.
    pub fn clear_persisted_state(&self) {
        let Some(gateway) = &self.inner.persistence else {
            return;
        };
        if let Err(err) = gateway.clear() {
            tracing::warn!(message = "store.clear_failed", error = %err);
        }
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Drop all subscriptions, validators, computed definitions and history.
    ///
    /// State values, computed ones included, stay readable.
    pub fn cleanup(&self) {
        let handles = self.inner.computed.borrow_mut().drain();
        drop(handles);
        self.inner.subscriptions.clear();
        self.inner.validators.borrow_mut().clear();
        self.inner.history.borrow_mut().clear();
        tracing::debug!(message = "store.cleanup");
    }
}
