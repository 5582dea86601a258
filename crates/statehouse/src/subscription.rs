#![forbid(unsafe_code)]

//! Per-key observer lists with priority, one-shot and immediate semantics.
//!
//! # Design
//!
//! The registry is owned by a single store (no process-wide state). Each key
//! maps to a list of entries kept sorted by descending priority; equal
//! priorities keep insertion order. Callbacks live behind `Rc<RefCell<..>>`
//! so dispatch can run them without holding the registry borrow, which lets
//! a callback subscribe, unsubscribe or write to the store while it runs.
//!
//! # Invariants
//!
//! 1. A key's list is always sorted by descending priority, stable.
//! 2. A callback that fails or panics is evicted before dispatch moves on.
//! 3. A `once` entry is removed after its first successful invocation.
//! 4. An entry removed mid-dispatch is not invoked afterwards.
//!
//! # Failure Modes
//!
//! - **Recursive re-entry**: a callback whose own invocation triggers a
//!   nested dispatch to itself is skipped for the nested round (it is still
//!   borrowed) and logged at `debug`. It never sees the nested value.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::SubscriberError;

/// Identity of one subscription, unique within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Modifiers for [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Higher runs first. Default 0.
    pub priority: i32,
    /// Remove after the first successful invocation.
    pub once: bool,
    /// Invoke with the current value before `subscribe` returns.
    pub immediate: bool,
}

impl SubscribeOptions {
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// What a callback may return: `()` or a `Result` whose error is displayed.
pub trait CallbackOutcome {
    fn into_result(self) -> Result<(), SubscriberError>;
}

impl CallbackOutcome for () {
    fn into_result(self) -> Result<(), SubscriberError> {
        Ok(())
    }
}

impl<E: fmt::Display> CallbackOutcome for Result<(), E> {
    fn into_result(self) -> Result<(), SubscriberError> {
        self.map_err(|e| SubscriberError::Failed(e.to_string()))
    }
}

type Callback = Rc<RefCell<dyn FnMut(&Value, Option<&Value>) -> Result<(), SubscriberError>>>;

struct Entry {
    id: SubscriptionId,
    priority: i32,
    once: bool,
    callback: Callback,
}

#[derive(Default)]
struct RegistryInner {
    lists: RefCell<HashMap<String, Vec<Entry>>>,
    next_id: Cell<u64>,
}

impl RegistryInner {
    fn remove(&self, key: &str, id: SubscriptionId) -> bool {
        let mut lists = self.lists.borrow_mut();
        let Some(list) = lists.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| entry.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            lists.remove(key);
        }
        removed
    }

    fn contains(&self, key: &str, id: SubscriptionId) -> bool {
        self.lists
            .borrow()
            .get(key)
            .is_some_and(|list| list.iter().any(|entry| entry.id == id))
    }
}

/// Handle returned by `subscribe`.
///
/// Call [`unsubscribe`](Self::unsubscribe) to remove exactly this
/// subscription. Dropping the handle leaves the subscription in place.
#[derive(Clone)]
pub struct Unsubscribe {
    key: String,
    id: SubscriptionId,
    registry: Weak<RegistryInner>,
}

impl Unsubscribe {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove the subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|inner| inner.remove(&self.key, self.id))
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

/// Ordered observer lists, one per key.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Rc<RegistryInner>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` on `key`.
    ///
    /// With `immediate`, the callback first runs with `current` and no old
    /// value. If that call fails the subscription is not kept; if it succeeds
    /// and `once` is set, the call consumed the subscription.
    pub fn subscribe<F, R>(
        &self,
        key: impl Into<String>,
        mut callback: F,
        options: SubscribeOptions,
        current: &Value,
    ) -> Unsubscribe
    where
        F: FnMut(&Value, Option<&Value>) -> R + 'static,
        R: CallbackOutcome,
    {
        let key = key.into();
        let id = SubscriptionId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        let handle = Unsubscribe {
            key: key.clone(),
            id,
            registry: Rc::downgrade(&self.inner),
        };

        let callback: Callback =
            Rc::new(RefCell::new(move |new: &Value, old: Option<&Value>| {
                callback(new, old).into_result()
            }));

        if options.immediate {
            match invoke(&callback, current, None) {
                Ok(()) if options.once => return handle,
                Ok(()) => {}
                Err(err) => {
                    tracing::warn!(
                        message = "store.subscriber_evicted",
                        key = key.as_str(),
                        subscription = id.raw(),
                        error = %err,
                        phase = "immediate"
                    );
                    return handle;
                }
            }
        }

        let entry = Entry {
            id,
            priority: options.priority,
            once: options.once,
            callback,
        };
        let mut lists = self.inner.lists.borrow_mut();
        let list = lists.entry(key).or_default();
        let at = list
            .iter()
            .position(|e| e.priority < entry.priority)
            .unwrap_or(list.len());
        list.insert(at, entry);
        handle
    }

    /// Remove the subscription `id` from `key`.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        self.inner.remove(key, id)
    }

    /// Invoke every subscriber of `key` in priority order.
    pub fn dispatch(&self, key: &str, new: &Value, old: Option<&Value>) {
        let snapshot: Vec<(SubscriptionId, bool, Callback)> = match self.inner.lists.borrow().get(key)
        {
            Some(list) => list
                .iter()
                .map(|e| (e.id, e.once, Rc::clone(&e.callback)))
                .collect(),
            None => return,
        };

        for (id, once, callback) in snapshot {
            if !self.inner.contains(key, id) {
                continue;
            }
            if callback.try_borrow_mut().is_err() {
                tracing::debug!(
                    message = "store.subscriber_reentrant",
                    key,
                    subscription = id.raw()
                );
                continue;
            }
            match invoke(&callback, new, old) {
                Ok(()) => {
                    if once {
                        self.inner.remove(key, id);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        message = "store.subscriber_evicted",
                        key,
                        subscription = id.raw(),
                        error = %err,
                        phase = "dispatch"
                    );
                    self.inner.remove(key, id);
                }
            }
        }
    }

    /// Number of live subscriptions on `key`.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.inner.lists.borrow().get(key).map_or(0, Vec::len)
    }

    /// Drop every subscription on every key.
    pub fn clear(&self) {
        // Dropping callbacks may drop handles that touch the registry; take
        // the map out first so no borrow is held while they drop.
        let lists = std::mem::take(&mut *self.inner.lists.borrow_mut());
        drop(lists);
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.inner.lists.borrow();
        let mut map = f.debug_map();
        for (key, list) in lists.iter() {
            map.entry(key, &list.len());
        }
        map.finish()
    }
}

fn invoke(callback: &Callback, new: &Value, old: Option<&Value>) -> Result<(), SubscriberError> {
    let mut f = callback.borrow_mut();
    match panic::catch_unwind(AssertUnwindSafe(|| (*f)(new, old))) {
        Ok(result) => result,
        Err(payload) => Err(SubscriberError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
