#![forbid(unsafe_code)]

//! Derived values kept in sync with their declared dependencies.
//!
//! # Design
//!
//! A computed property is a named, read-only key whose value is
//! `compute(&snapshot)`. Registration seeds the value through the store's
//! trusted write path and then subscribes an internal handler to each
//! dependency. Whenever a dependency commits a change, the handler
//! recomputes and writes the new value the same way, which in turn notifies
//! the computed key's own subscribers (and any computed property built on
//! top of it).
//!
//! # Invariants
//!
//! 1. Dependencies are declared at registration and never change.
//! 2. Every dependency exists when the property is registered.
//! 3. The dependency graph is acyclic; registration rejects a cycle.
//! 4. Changing a key outside the declared set never recomputes the property.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the previous value stays, the panic is
//!   logged, and the internal subscription survives so the next dependency
//!   change retries.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::State;
use crate::error::{Result, StoreError};
use crate::store::{BATCH_UPDATE_KEY, CommitPlan, RESET_KEY, Store, StoreInner};
use crate::subscription::{SubscribeOptions, Unsubscribe};

/// Priority of the internal dependency handlers, so derived values are fresh
/// before ordinary observers of the same dependency run.
pub const COMPUTED_PRIORITY: i32 = i32::MAX;

pub(crate) type ComputeFn = Rc<dyn Fn(&State) -> Value>;

struct ComputedDefinition {
    dependencies: Vec<String>,
    compute: ComputeFn,
    subscriptions: Vec<Unsubscribe>,
}

/// Definitions by name.
#[derive(Default)]
pub(crate) struct ComputedRegistry {
    definitions: BTreeMap<String, ComputedDefinition>,
}

impl ComputedRegistry {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub(crate) fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.definitions
            .get(name)
            .map(|def| def.dependencies.as_slice())
    }

    fn compute_fn(&self, name: &str) -> Option<ComputeFn> {
        self.definitions.get(name).map(|def| Rc::clone(&def.compute))
    }

    /// Path of a cycle that adding `name -> dependencies` would close.
    fn find_cycle(&self, name: &str, dependencies: &[String]) -> Option<Vec<String>> {
        let mut path = vec![name.to_string()];
        let mut visited = HashSet::new();
        for dep in dependencies {
            if self.reaches(dep, name, &mut path, &mut visited) {
                return Some(path);
            }
        }
        None
    }

    fn reaches(
        &self,
        from: &str,
        target: &str,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        path.push(from.to_string());
        if from == target {
            return true;
        }
        if visited.insert(from.to_string())
            && let Some(deps) = self.dependencies(from)
        {
            for dep in deps {
                if self.reaches(dep, target, path, visited) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    /// Drop every definition, returning their subscription handles.
    pub(crate) fn drain(&mut self) -> Vec<Unsubscribe> {
        std::mem::take(&mut self.definitions)
            .into_values()
            .flat_map(|def| def.subscriptions)
            .collect()
    }
}

impl fmt::Debug for ComputedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, def) in &self.definitions {
            map.entry(name, &def.dependencies);
        }
        map.finish()
    }
}

/// Disposer for a computed property.
///
/// Dropping the handle keeps the property alive; call
/// [`dispose`](Self::dispose) to stop recomputation. The last value stays
/// readable.
#[derive(Clone)]
pub struct ComputedHandle {
    name: String,
    store: Weak<StoreInner>,
}

impl ComputedHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the internal subscriptions and the definition. Returns whether
    /// the property was still registered.
    pub fn dispose(&self) -> bool {
        let Some(inner) = self.store.upgrade() else {
            return false;
        };
        let removed = inner.computed.borrow_mut().definitions.remove(&self.name);
        match removed {
            Some(def) => {
                for handle in def.subscriptions {
                    handle.unsubscribe();
                }
                tracing::debug!(message = "computed.disposed", name = self.name.as_str());
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ComputedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedHandle")
            .field("name", &self.name)
            .finish()
    }
}

impl Store {
    /// Register a computed property `name` derived from `dependencies`.
    ///
    /// The value is computed once immediately and then again after every
    /// committed change to any dependency. Dependencies may be template keys
    /// or other computed properties.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ReservedName`] for `batch-update` or `reset`.
    /// - [`StoreError::TemplateKeyConflict`] if `name` is a template key.
    /// - [`StoreError::DuplicateComputed`] if `name` is already computed.
    /// - [`StoreError::UnknownDependency`] for a dependency that does not exist.
    /// - [`StoreError::ComputedCycle`] if the dependency graph would loop,
    ///   including a property depending on itself.
    pub fn create_computed<N, I, K, F>(
        &self,
        name: N,
        dependencies: I,
        compute: F,
    ) -> Result<ComputedHandle>
    where
        N: Into<String>,
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: Fn(&State) -> Value + 'static,
    {
        let name = name.into();
        let mut deps: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        self.check_computed(&name, &deps)?;

        let compute: ComputeFn = Rc::new(compute);
        self.inner.state.borrow_mut().insert(name.clone(), Value::Null);
        self.inner.computed.borrow_mut().definitions.insert(
            name.clone(),
            ComputedDefinition {
                dependencies: deps.clone(),
                compute,
                subscriptions: Vec::new(),
            },
        );
        self.recompute(&name);

        let mut subscriptions = Vec::with_capacity(deps.len());
        for dep in &deps {
            let store = Rc::downgrade(&self.inner);
            let target = name.clone();
            let handle = self.inner.subscriptions.subscribe(
                dep.clone(),
                move |_: &Value, _: Option<&Value>| {
                    if let Some(inner) = store.upgrade() {
                        Store { inner }.recompute(&target);
                    }
                },
                SubscribeOptions::default().with_priority(COMPUTED_PRIORITY),
                &Value::Null,
            );
            subscriptions.push(handle);
        }
        if let Some(def) = self.inner.computed.borrow_mut().definitions.get_mut(&name) {
            def.subscriptions = subscriptions;
        }

        tracing::debug!(
            message = "computed.created",
            name = name.as_str(),
            dependencies = deps.len()
        );
        Ok(ComputedHandle {
            name,
            store: Rc::downgrade(&self.inner),
        })
    }

    fn check_computed(&self, name: &str, deps: &[String]) -> Result<()> {
        if name == BATCH_UPDATE_KEY || name == RESET_KEY {
            return Err(StoreError::ReservedName { name: name.into() });
        }
        if self.inner.defaults.contains_key(name) {
            return Err(StoreError::TemplateKeyConflict { name: name.into() });
        }
        let computed = self.inner.computed.borrow();
        if computed.contains(name) {
            return Err(StoreError::DuplicateComputed { name: name.into() });
        }
        if deps.iter().any(|dep| dep == name) {
            return Err(StoreError::ComputedCycle {
                path: vec![name.to_string(), name.to_string()],
            });
        }
        for dep in deps {
            if !self.inner.defaults.contains_key(dep) && !computed.contains(dep) {
                return Err(StoreError::UnknownDependency {
                    name: name.into(),
                    dependency: dep.clone(),
                });
            }
        }
        if let Some(path) = computed.find_cycle(name, deps) {
            return Err(StoreError::ComputedCycle { path });
        }
        Ok(())
    }

    /// Recompute `name` from a fresh snapshot and write it through the
    /// trusted path.
    pub(crate) fn recompute(&self, name: &str) {
        let Some(compute) = self.inner.computed.borrow().compute_fn(name) else {
            return;
        };
        let snapshot = self.snapshot();
        match panic::catch_unwind(AssertUnwindSafe(|| compute(&snapshot))) {
            Ok(value) => {
                tracing::trace!(message = "computed.recompute", name);
                self.commit(vec![(name.to_string(), value)], CommitPlan::derived());
            }
            Err(_) => {
                tracing::warn!(message = "computed.compute_failed", name);
            }
        }
    }

    /// Recompute every computed property, dependencies before dependents.
    pub fn recompute_all(&self) {
        for name in self.computed_order() {
            self.recompute(&name);
        }
    }

    /// Names of registered computed properties in dependency order.
    fn computed_order(&self) -> Vec<String> {
        let computed = self.inner.computed.borrow();
        let mut order = Vec::new();
        let mut done = HashSet::new();
        fn visit(
            name: &str,
            computed: &ComputedRegistry,
            done: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) {
            if !computed.contains(name) || !done.insert(name.to_string()) {
                return;
            }
            for dep in computed.dependencies(name).unwrap_or_default() {
                visit(dep, computed, done, order);
            }
            order.push(name.to_string());
        }
        for name in computed.names() {
            visit(&name, &computed, &mut done, &mut order);
        }
        order
    }

    /// Names of registered computed properties.
    #[must_use]
    pub fn computed_names(&self) -> Vec<String> {
        self.inner.computed.borrow().names()
    }
}
