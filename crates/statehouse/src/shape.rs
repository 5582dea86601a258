#![forbid(unsafe_code)]

//! Structural description of JSON values.
//!
//! Shared by the typed built-in validators and by the persistence loader,
//! which refuses blobs whose whitelisted keys have the wrong shape.

use std::fmt;

use serde_json::Value;

/// Expected shape of a JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Any,
    Null,
    String,
    Number,
    /// A number with no fractional part.
    Integer,
    Bool,
    /// Any array.
    Array,
    /// An array whose every element matches the inner shape.
    ArrayOf(Box<Shape>),
    Object,
}

impl Shape {
    /// Shorthand for [`Shape::ArrayOf`].
    #[must_use]
    pub fn array_of(item: Shape) -> Self {
        Self::ArrayOf(Box::new(item))
    }

    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::ArrayOf(item) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| item.matches(v))),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any value"),
            Self::Null => f.write_str("null"),
            Self::String => f.write_str("text"),
            Self::Number => f.write_str("a number"),
            Self::Integer => f.write_str("an integer"),
            Self::Bool => f.write_str("a boolean"),
            Self::Array => f.write_str("a list"),
            Self::ArrayOf(item) => write!(f, "a list of {item}"),
            Self::Object => f.write_str("an object"),
        }
    }
}
