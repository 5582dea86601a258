#![forbid(unsafe_code)]

//! The review-draft form: the state template, validators and persistence
//! whitelist used by the review application and its CLI.
//!
//! Selections and free text survive restarts; the generated review and the
//! in-flight flag do not.

use serde_json::{Value, json};

use crate::State;
use crate::config::StoreConfig;
use crate::persist::{PersistedField, PersistenceConfig, Storage};
use crate::shape::Shape;
use crate::store::Store;
use crate::validate::builtin;

pub const SELECTED_STAFF: &str = "selectedStaff";
pub const SELECTED_FEATURES: &str = "selectedFeatures";
pub const PERSONAL_COMMENTS: &str = "personalComments";
pub const SOURCE_ID: &str = "sourceId";
pub const RATING: &str = "rating";
pub const GENERATED_REVIEW: &str = "generatedReview";
pub const IS_GENERATING: &str = "isGenerating";
/// Computed: the draft has input and no generation is running.
pub const CAN_GENERATE: &str = "canGenerate";

pub const MAX_COMMENT_CHARS: usize = 200;
pub const MAX_STAFF_CHARS: usize = 100;
pub const MAX_FEATURES: usize = 20;

/// Default values for every review key.
#[must_use]
pub fn template() -> State {
    [
        (SELECTED_STAFF, json!("")),
        (SELECTED_FEATURES, json!([])),
        (PERSONAL_COMMENTS, json!("")),
        (SOURCE_ID, json!("direct")),
        (RATING, json!(5)),
        (GENERATED_REVIEW, json!("")),
        (IS_GENERATING, json!(false)),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

/// Keys written to storage, with the shapes checked on load.
#[must_use]
pub fn whitelist() -> Vec<PersistedField> {
    vec![
        PersistedField::required(SELECTED_STAFF, Shape::String),
        PersistedField::required(SELECTED_FEATURES, Shape::array_of(Shape::String)),
        PersistedField::required(PERSONAL_COMMENTS, Shape::String),
        PersistedField::optional(SOURCE_ID, Shape::String),
        PersistedField::optional(RATING, Shape::Integer),
    ]
}

/// Persistence config for the review whitelist on `storage`.
#[must_use]
pub fn persistence(storage: impl Storage + 'static) -> PersistenceConfig {
    PersistenceConfig::new(storage, whitelist())
}

/// Install the review validators on `store`.
pub fn install_validators(store: &Store) {
    store.add_validator(PERSONAL_COMMENTS, builtin::max_length(MAX_COMMENT_CHARS));
    store.add_validator(SELECTED_STAFF, builtin::max_length(MAX_STAFF_CHARS));
    store.add_validator(
        SELECTED_FEATURES,
        builtin::sequence_of(Shape::String, Some(MAX_FEATURES)),
    );
    store.add_validator(SOURCE_ID, builtin::max_length(64));
    store.add_validator(RATING, builtin::integer_range(1, 5));
    store.add_validator(GENERATED_REVIEW, builtin::scalar(Shape::String));
    store.add_validator(IS_GENERATING, builtin::scalar(Shape::Bool));
}

impl Store {
    /// A store over the review template with its validators and the
    /// `canGenerate` computed property installed.
    #[must_use]
    pub fn review(config: StoreConfig) -> Self {
        let store = Self::new(template(), config);
        install_validators(&store);
        let created = store.create_computed(
            CAN_GENERATE,
            [SELECTED_STAFF, SELECTED_FEATURES, PERSONAL_COMMENTS, IS_GENERATING],
            |state| {
                let busy = state
                    .get(IS_GENERATING)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Value::Bool(has_input(state) && !busy)
            },
        );
        if let Err(err) = created {
            tracing::error!(message = "review.computed_failed", error = %err);
        }
        store
    }
}

/// Whether a draft has anything worth generating from.
#[must_use]
pub fn has_input(state: &State) -> bool {
    let non_empty = |key: &str| {
        state
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    };
    non_empty(SELECTED_STAFF)
        || non_empty(PERSONAL_COMMENTS)
        || state
            .get(SELECTED_FEATURES)
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty())
}
