//! Test-double source collections shared across the integration tests, in
//! the teacher's own style of building a small in-memory harness per test
//! file rather than pulling in a mocking crate (`differential-dataflow`'s
//! own `tests/` build dataflows directly against `Vec`-backed inputs).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use live_view_engine::change::ChangeMessage;
use live_view_engine::ir::ScopedExpr;
use live_view_engine::source::{ChangeListener, CollectionStatus, SortedIndex, SourceCollection, SubscribeOptions, Unsubscribe};
use live_view_engine::{Key, Value};

pub struct NoopUnsubscribe;
impl Unsubscribe for NoopUnsubscribe {
    fn unsubscribe(&mut self) {}
}

struct Inner {
    rows: Vec<(Key, Value)>,
    listener: Option<Box<dyn ChangeListener>>,
}

/// A hand-rolled source collection whose rows can be mutated after
/// `LiveQuery::start` has already subscribed to it, pushing the resulting
/// `ChangeMessage`s straight to whatever listener the driver registered.
/// Has no sorted index — every query built against it exercises mode 3's
/// full-scan fallback (or mode 1/2, depending on the plan).
#[derive(Clone)]
pub struct MutableCollection {
    id: String,
    inner: Arc<Mutex<Inner>>,
}

impl MutableCollection {
    pub fn new(id: &str, rows: Vec<(Key, Value)>) -> Self {
        MutableCollection { id: id.to_string(), inner: Arc::new(Mutex::new(Inner { rows, listener: None })) }
    }

    pub fn insert(&self, key: Key, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.rows.push((key.clone(), value.clone()));
        if let Some(listener) = inner.listener.as_mut() {
            listener.on_changes(vec![ChangeMessage::Insert { key, value }]);
        }
    }

    pub fn update(&self, key: Key, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        let previous_value = inner.rows.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone()).expect("key must exist to update");
        if let Some(row) = inner.rows.iter_mut().find(|(k, _)| *k == key) {
            row.1 = value.clone();
        }
        if let Some(listener) = inner.listener.as_mut() {
            listener.on_changes(vec![ChangeMessage::Update { key, previous_value, value }]);
        }
    }

    pub fn delete(&self, key: Key) {
        let mut inner = self.inner.lock().unwrap();
        let position = inner.rows.iter().position(|(k, _)| *k == key).expect("key must exist to delete");
        let (_, value) = inner.rows.remove(position);
        if let Some(listener) = inner.listener.as_mut() {
            listener.on_changes(vec![ChangeMessage::Delete { key, value }]);
        }
    }
}

impl SourceCollection for MutableCollection {
    fn collection_id(&self) -> &str {
        &self.id
    }

    fn subscribe_changes(&mut self, listener: Box<dyn ChangeListener>, _options: SubscribeOptions) -> live_view_engine::Result<Box<dyn Unsubscribe>> {
        self.inner.lock().unwrap().listener = Some(listener);
        Ok(Box::new(NoopUnsubscribe))
    }

    fn get(&self, key: &Key) -> Option<Value> {
        self.inner.lock().unwrap().rows.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    fn has(&self, key: &Key) -> bool {
        self.inner.lock().unwrap().rows.iter().any(|(k, _)| k == key)
    }

    fn current_state_as_changes(&self, _where_expression: Option<&ScopedExpr>) -> Vec<ChangeMessage> {
        self.inner.lock().unwrap().rows.iter().map(|(k, v)| ChangeMessage::Insert { key: k.clone(), value: v.clone() }).collect()
    }

    fn status(&self) -> CollectionStatus {
        CollectionStatus::Ready
    }

    fn get_key(&self, value: &Value) -> Key {
        match value.get("id") {
            Some(Value::Int(i)) => Key::Int(*i),
            _ => Key::Int(0),
        }
    }

    fn index(&self) -> Option<&dyn SortedIndex> {
        None
    }
}

/// An `employees`-shaped row, matching `spec.md` §8's concrete scenarios.
pub fn employee(id: i64, name: &str, salary: i64, dept_id: i64) -> (Key, Value) {
    (Key::Int(id), Value::record(vec![("name", Value::Str(name.to_string())), ("salary", Value::Int(salary)), ("dept_id", Value::Int(dept_id))]))
}

/// A `vehicle-docs`-shaped row, matching `spec.md` §8 scenario 5.
pub fn vehicle_doc(id: i64, vin: i64, t: i64) -> (Key, Value) {
    (Key::Int(id), Value::record(vec![("vin", Value::Int(vin)), ("t", Value::Int(t))]))
}

/// Collects the final inserted value of every field named `field` across
/// every transaction the sink recorded, in the order the transactions were
/// committed — a test convenience for reading off "what's in the
/// materialized set at the end" without tracking retractions by hand.
pub fn final_values(sink: &live_view_engine::RecordingSink, field: &str) -> Vec<Value> {
    let mut present: Vec<Key> = Vec::new();
    let mut values: std::collections::HashMap<Key, Value> = std::collections::HashMap::new();
    for txn in &sink.transactions {
        for change in txn {
            match change {
                ChangeMessage::Insert { key, value } => {
                    if !present.contains(key) {
                        present.push(key.clone());
                    }
                    values.insert(key.clone(), value.get(field).cloned().unwrap_or(Value::Null));
                }
                ChangeMessage::Update { key, value, .. } => {
                    values.insert(key.clone(), value.get(field).cloned().unwrap_or(Value::Null));
                }
                ChangeMessage::Delete { key, .. } => {
                    present.retain(|k| k != key);
                    values.remove(key);
                }
            }
        }
    }
    present.into_iter().filter_map(|k| values.get(&k).cloned()).collect()
}

/// Same as [`final_values`] but returns `(key, value_of_field)` pairs, kept
/// in first-insert order, for scenarios where more than one column matters.
pub fn final_rows(sink: &live_view_engine::RecordingSink) -> Vec<(Key, Value)> {
    let mut order: Vec<Key> = Vec::new();
    let mut rows: std::collections::HashMap<Key, Value> = std::collections::HashMap::new();
    for txn in &sink.transactions {
        for change in txn {
            match change {
                ChangeMessage::Insert { key, value } => {
                    if !order.contains(key) {
                        order.push(key.clone());
                    }
                    rows.insert(key.clone(), value.clone());
                }
                ChangeMessage::Update { key, value, .. } => {
                    rows.insert(key.clone(), value.clone());
                }
                ChangeMessage::Delete { key, .. } => {
                    order.retain(|k| k != key);
                    rows.remove(key);
                }
            }
        }
    }
    order.into_iter().filter_map(|k| rows.get(&k).cloned().map(|v| (k, v))).collect()
}

#[allow(dead_code)]
pub fn keys(rows: &[(Key, Value)]) -> HashSet<Key> {
    rows.iter().map(|(k, _)| k.clone()).collect()
}
