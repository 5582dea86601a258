#![forbid(unsafe_code)]

//! Ready-made validators for common field shapes.
//!
//! These are ordinary [`Validator`]s; the gateway treats them like any
//! other plug-in.

use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;

use super::{ValidationResult, Validator, Verdict};
use crate::shape::Shape;

/// Text of at most `max` characters (Unicode scalar values, not bytes).
#[must_use]
pub fn max_length(max: usize) -> Validator {
    Validator::new(move |new, _| match new.as_str() {
        Some(text) => {
            let len = text.chars().count();
            if len <= max {
                ValidationResult::ok()
            } else {
                ValidationResult::invalid(format!(
                    "must be at most {max} characters (got {len})"
                ))
            }
        }
        None => ValidationResult::invalid("must be text"),
    })
}

/// A list whose items all match `item`, optionally capped at `max_items`.
///
/// Every offending item is reported, not only the first.
#[must_use]
pub fn sequence_of(item: Shape, max_items: Option<usize>) -> Validator {
    Validator::new(move |new, _| {
        let Some(items) = new.as_array() else {
            return ValidationResult::invalid(format!("must be a list of {item}"));
        };
        let mut errors: Vec<String> = items
            .iter()
            .enumerate()
            .filter(|(_, v)| !item.matches(v))
            .map(|(i, _)| format!("item {i} must be {item}"))
            .collect();
        if let Some(max) = max_items
            && items.len() > max
        {
            errors.push(format!("must contain at most {max} items (got {})", items.len()));
        }
        ValidationResult::from_errors(errors)
    })
}

/// A single scalar of the given shape.
///
/// Non-scalar shapes are accepted but make little sense here; use
/// [`sequence_of`] for lists.
#[must_use]
pub fn scalar(shape: Shape) -> Validator {
    Validator::new(move |new, _| {
        if shape.matches(new) {
            ValidationResult::ok()
        } else {
            ValidationResult::invalid(format!("must be {shape}"))
        }
    })
}

/// An integer within `min..=max`.
#[must_use]
pub fn integer_range(min: i64, max: i64) -> Validator {
    Validator::new(move |new, _| match new.as_i64() {
        Some(n) if (min..=max).contains(&n) => ValidationResult::ok(),
        Some(n) => {
            ValidationResult::invalid(format!("must be between {min} and {max} (got {n})"))
        }
        None => ValidationResult::invalid("must be an integer"),
    })
}

/// One of a fixed set of values.
#[must_use]
pub fn one_of(allowed: Vec<Value>) -> Validator {
    Validator::new(move |new, _| {
        if allowed.contains(new) {
            return ValidationResult::ok();
        }
        let choices: Vec<String> = allowed.iter().map(Value::to_string).collect();
        ValidationResult::invalid(format!("must be one of: {}", choices.join(", ")))
    })
}

/// All of `validators` must pass; their errors are concatenated in order.
///
/// Stays synchronous while every part is; otherwise the combined check is
/// pending until the slowest part settles.
#[must_use]
pub fn compose(validators: Vec<Validator>) -> Validator {
    Validator {
        check: std::rc::Rc::new(move |new: &Value, old: &Value| {
            let verdicts: Vec<Verdict> = validators.iter().map(|v| v.check(new, old)).collect();
            if verdicts.iter().all(|v| matches!(v, Verdict::Ready(_))) {
                let results = verdicts.into_iter().map(|v| match v {
                    Verdict::Ready(result) => result,
                    Verdict::Pending(_) => ValidationResult::ok(),
                });
                return Verdict::Ready(merge(results));
            }
            Verdict::Pending(
                async move {
                    let results = join_all(verdicts.into_iter().map(Verdict::resolve)).await;
                    merge(results)
                }
                .boxed_local(),
            )
        }),
    }
}

fn merge(results: impl IntoIterator<Item = ValidationResult>) -> ValidationResult {
    let mut errors = Vec::new();
    let mut is_valid = true;
    for result in results {
        is_valid &= result.is_valid;
        errors.extend(result.errors);
    }
    ValidationResult { is_valid, errors }
}
