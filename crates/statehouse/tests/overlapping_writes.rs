//! Two `set` calls in flight at once, interleaved at their validator awaits.
//!
//! Each call is polled by hand so the order in which validators settle is
//! fixed by the test, not by an executor.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::task::noop_waker_ref;
use serde_json::{Value, json};
use statehouse::{
    Change, SetOptions, State, Store, StoreConfig, ValidationError, ValidationResult, Validator,
};

type Gates = Rc<RefCell<VecDeque<oneshot::Receiver<ValidationResult>>>>;

/// A store whose `comment` validator waits for the next queued gate.
fn gated_store() -> (Store, Gates) {
    let template: State = [
        ("staff".to_string(), json!("")),
        ("comment".to_string(), json!("")),
    ]
    .into_iter()
    .collect();
    let store = Store::new(template, StoreConfig::default());
    let gates: Gates = Rc::default();
    let queue = Rc::clone(&gates);
    store.add_validator(
        "comment",
        Validator::pending(move |_, _| {
            let gate = queue.borrow_mut().pop_front();
            async move {
                match gate {
                    Some(rx) => rx
                        .await
                        .unwrap_or_else(|_| ValidationResult::invalid("gate dropped")),
                    None => ValidationResult::ok(),
                }
            }
        }),
    );
    (store, gates)
}

fn gate(gates: &Gates) -> oneshot::Sender<ValidationResult> {
    let (tx, rx) = oneshot::channel();
    gates.borrow_mut().push_back(rx);
    tx
}

type SetFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Change>, ValidationError>> + 'a>>;

fn start<'a>(store: &'a Store, staff: &str, comment: &str) -> SetFuture<'a> {
    let updates = vec![("staff", json!(staff)), ("comment", json!(comment))];
    store.set(updates, SetOptions::default()).boxed_local()
}

fn poll(fut: &mut SetFuture<'_>) -> Poll<Result<Vec<Change>, ValidationError>> {
    let mut cx = Context::from_waker(noop_waker_ref());
    fut.as_mut().poll(&mut cx)
}

fn settled(fut: &mut SetFuture<'_>) -> Result<Vec<Change>, ValidationError> {
    match poll(fut) {
        Poll::Ready(result) => result,
        Poll::Pending => panic!("set still pending after its validator settled"),
    }
}

#[test]
fn nothing_commits_while_validators_are_pending() {
    let (store, gates) = gated_store();
    let first_gate = gate(&gates);
    let mut first = start(&store, "Ann", "first");

    assert!(poll(&mut first).is_pending());
    assert_eq!(store.get("staff"), Some(json!("")));
    assert!(store.history(None).is_empty());

    first_gate.send(ValidationResult::ok()).unwrap();
    assert_eq!(settled(&mut first).unwrap().len(), 2);
    assert_eq!(store.get("staff"), Some(json!("Ann")));
}

#[test]
fn later_commit_wins_shared_keys() {
    let (store, gates) = gated_store();
    let first_gate = gate(&gates);
    let second_gate = gate(&gates);
    let mut first = start(&store, "Ann", "first");
    let mut second = start(&store, "Bob", "second");
    assert!(poll(&mut first).is_pending());
    assert!(poll(&mut second).is_pending());

    // The call started second settles first.
    second_gate.send(ValidationResult::ok()).unwrap();
    settled(&mut second).unwrap();
    assert_eq!(store.get("staff"), Some(json!("Bob")));

    // The older call still commits its own batch, over the newer values.
    first_gate.send(ValidationResult::ok()).unwrap();
    let changes = settled(&mut first).unwrap();
    assert_eq!(changes[0].old_value, json!("Bob"));
    assert_eq!(store.get("staff"), Some(json!("Ann")));
    assert_eq!(store.get("comment"), Some(json!("first")));

    let order: Vec<Value> = store
        .history(None)
        .into_iter()
        .map(|entry| entry.new_value)
        .collect();
    assert_eq!(
        order,
        vec![json!("Bob"), json!("second"), json!("Ann"), json!("first")]
    );
}

#[test]
fn each_call_is_atomic_on_its_own_batch() {
    let (store, gates) = gated_store();
    let first_gate = gate(&gates);
    let second_gate = gate(&gates);
    let mut first = start(&store, "Ann", "first");
    let mut second = start(&store, "Bob", "second");
    assert!(poll(&mut first).is_pending());
    assert!(poll(&mut second).is_pending());

    second_gate.send(ValidationResult::ok()).unwrap();
    settled(&mut second).unwrap();

    first_gate
        .send(ValidationResult::invalid("flagged by moderation"))
        .unwrap();
    let err = settled(&mut first).unwrap_err();
    assert!(err.mentions("comment"));
    assert!(!err.mentions("staff"));

    assert_eq!(store.get("staff"), Some(json!("Bob")));
    assert_eq!(store.get("comment"), Some(json!("second")));
    assert_eq!(store.history(None).len(), 2);
}
