#![forbid(unsafe_code)]

//! Per-key validators and the registry the change gateway consults.
//!
//! A [`Validator`] looks at `(new, old)` for one key and produces a
//! [`ValidationResult`], either right away or as a pending future. The
//! gateway awaits every validator touched by a batch before deciding whether
//! to commit; validators never short-circuit each other.
//!
//! # Invariants
//!
//! 1. At most one validator per key. Adding a second replaces the first.
//! 2. Validators are pure: they see clones of the values and cannot reach
//!    the store.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::Value;

/// Outcome of validating one proposed value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// Accept the value.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    /// Reject with a single message.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![message.into()],
        }
    }

    /// Valid exactly when `errors` is empty.
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// A validator's answer: settled now, or still pending.
pub enum Verdict {
    Ready(ValidationResult),
    Pending(LocalBoxFuture<'static, ValidationResult>),
}

impl Verdict {
    /// Wait for the result.
    pub async fn resolve(self) -> ValidationResult {
        match self {
            Self::Ready(result) => result,
            Self::Pending(fut) => fut.await,
        }
    }
}

impl fmt::Debug for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

type CheckFn = dyn Fn(&Value, &Value) -> Verdict;

/// A validation function bound to one key by the registry.
///
/// Cloning shares the underlying function.
#[derive(Clone)]
pub struct Validator {
    check: Rc<CheckFn>,
}

impl Validator {
    /// Wrap a synchronous check of `(new, old)`.
    pub fn new(check: impl Fn(&Value, &Value) -> ValidationResult + 'static) -> Self {
        Self {
            check: Rc::new(move |new, old| Verdict::Ready(check(new, old))),
        }
    }

    /// Wrap a check that settles later.
    ///
    /// The returned future must own what it needs; clone the values in.
    pub fn pending<F, Fut>(check: F) -> Self
    where
        F: Fn(&Value, &Value) -> Fut + 'static,
        Fut: Future<Output = ValidationResult> + 'static,
    {
        Self {
            check: Rc::new(move |new, old| Verdict::Pending(check(new, old).boxed_local())),
        }
    }

    /// Start validating `new` against `old`.
    #[must_use]
    pub fn check(&self, new: &Value, old: &Value) -> Verdict {
        (self.check)(new, old)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator(..)")
    }
}

/// Holds at most one [`Validator`] per key.
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Validator>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `validator` to `key`, returning the one it replaced.
    pub fn insert(&mut self, key: impl Into<String>, validator: Validator) -> Option<Validator> {
        self.validators.insert(key.into(), validator)
    }

    /// Unbind `key`. Returns whether a validator was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.validators.remove(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Validator> {
        self.validators.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.validators.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn clear(&mut self) {
        self.validators.clear();
    }
}
