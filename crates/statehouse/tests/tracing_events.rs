//! Structured log events emitted by the store, captured with a custom
//! `tracing_subscriber` layer.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::executor::block_on;
use serde_json::{Value, json};
use statehouse::review::{self, SELECTED_STAFF};
use statehouse::{
    DEFAULT_STORAGE_KEY, MemoryStorage, SetOptions, Storage, StorageError, Store, StoreConfig,
    SubscribeOptions,
};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Captured {
    level: String,
    message: String,
    key: Option<String>,
}

struct EventCapture {
    events: Arc<Mutex<Vec<Captured>>>,
}

impl<S> Layer<S> for EventCapture
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        #[derive(Default)]
        struct Fields {
            message: Option<String>,
            key: Option<String>,
        }
        impl tracing::field::Visit for Fields {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                match field.name() {
                    "message" => self.message = Some(value.to_string()),
                    "key" => self.key = Some(value.to_string()),
                    _ => {}
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                let text = format!("{value:?}").trim_matches('"').to_string();
                match field.name() {
                    "message" => self.message = Some(text),
                    "key" => self.key = Some(text),
                    _ => {}
                }
            }
        }
        let mut fields = Fields::default();
        event.record(&mut fields);
        if let Some(message) = fields.message {
            self.events.lock().expect("capture lock").push(Captured {
                level: event.metadata().level().to_string(),
                message,
                key: fields.key,
            });
        }
    }
}

fn capture<T>(run: impl FnOnce() -> T) -> (T, Vec<Captured>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(EventCapture {
        events: Arc::clone(&events),
    });
    let out = tracing::subscriber::with_default(subscriber, run);
    let captured = events.lock().expect("capture lock").clone();
    (out, captured)
}

fn find<'a>(events: &'a [Captured], message: &str) -> Option<&'a Captured> {
    events.iter().find(|e| e.message == message)
}

#[derive(Debug)]
struct BrokenStorage;

impl Storage for BrokenStorage {
    fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    fn write(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk gone".into()))
    }
}

fn explode(_: &Value, _: Option<&Value>) {
    panic!("observer blew up");
}

#[test]
fn evicted_subscriber_is_logged_at_warn() {
    let (count, events) = capture(|| {
        let store = Store::review(StoreConfig::default());
        store.subscribe(SELECTED_STAFF, explode, SubscribeOptions::default());
        block_on(store.set([(SELECTED_STAFF, json!("Ann"))], SetOptions::default())).unwrap();
        store.subscriber_count(SELECTED_STAFF)
    });

    assert_eq!(count, 1, "only the computed handler remains");
    let evicted = find(&events, "store.subscriber_evicted").expect("eviction event");
    assert_eq!(evicted.level, "WARN");
    assert_eq!(evicted.key.as_deref(), Some(SELECTED_STAFF));
    assert!(find(&events, "store.commit").is_some());
}

#[test]
fn rejected_load_is_logged_and_state_kept() {
    let storage = MemoryStorage::new();
    storage.insert(DEFAULT_STORAGE_KEY, "not json at all");
    let (loaded, events) = capture(|| {
        let store =
            Store::review(StoreConfig::default().with_persistence(review::persistence(storage.clone())));
        let loaded = store.load_persisted_state();
        (loaded, store.get(SELECTED_STAFF))
    });

    assert_eq!(loaded, (false, Some(json!(""))));
    let rejected = find(&events, "store.load_rejected").expect("rejection event");
    assert_eq!(rejected.level, "WARN");
    assert!(find(&events, "store.loaded").is_none());
}

#[test]
fn successful_load_is_logged_at_info() {
    let storage = MemoryStorage::new();
    storage.insert(
        DEFAULT_STORAGE_KEY,
        r#"{"selectedStaff":"Jane","selectedFeatures":[],"personalComments":""}"#,
    );
    let (_, events) = capture(|| {
        let store =
            Store::review(StoreConfig::default().with_persistence(review::persistence(storage.clone())));
        assert!(store.load_persisted_state());
    });
    let loaded = find(&events, "store.loaded").expect("load event");
    assert_eq!(loaded.level, "INFO");
}

#[test]
fn persist_failure_is_swallowed_and_logged() {
    let (value, events) = capture(|| {
        let config = review::persistence(BrokenStorage);
        let store = Store::review(StoreConfig::default().with_persistence(config));
        block_on(store.set([(SELECTED_STAFF, json!("Ann"))], SetOptions::default())).unwrap();
        assert!(!store.load_persisted_state());
        store.get(SELECTED_STAFF)
    });

    assert_eq!(value, Some(json!("Ann")));
    assert!(find(&events, "store.persist_failed").is_some());
    assert!(find(&events, "store.load_rejected").is_some());
}

#[test]
fn validation_failure_is_logged_at_debug() {
    let (_, events) = capture(|| {
        let store = Store::review(StoreConfig::default());
        assert!(block_on(store.set([("ghost", json!(1))], SetOptions::default())).is_err());
    });
    let failed = find(&events, "store.validation_failed").expect("validation event");
    assert_eq!(failed.level, "DEBUG");
}

#[test]
fn self_writing_subscriber_skip_is_logged_at_debug() {
    let ((seen, final_value), events) = capture(|| {
        let store = Store::review(StoreConfig::default());
        let writer = store.clone();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&seen);
        store.subscribe(
            SELECTED_STAFF,
            move |new: &Value, _: Option<&Value>| {
                sink.borrow_mut().push(new.clone());
                if new == &json!("Ann") {
                    let _ = writer
                        .set([(SELECTED_STAFF, json!("Bob"))], SetOptions::default())
                        .now_or_never();
                }
            },
            SubscribeOptions::default(),
        );
        block_on(store.set([(SELECTED_STAFF, json!("Ann"))], SetOptions::default())).unwrap();
        let seen = seen.borrow().clone();
        (seen, store.get(SELECTED_STAFF))
    });

    assert_eq!(seen, vec![json!("Ann")]);
    assert_eq!(final_value, Some(json!("Bob")));
    let skipped = find(&events, "store.subscriber_reentrant").expect("re-entry event");
    assert_eq!(skipped.level, "DEBUG");
    assert_eq!(skipped.key.as_deref(), Some(SELECTED_STAFF));
}
