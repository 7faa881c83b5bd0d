//! Result materializer (`spec.md` §4.H, component H).
//!
//! Consumes whatever batches [`crate::graph::Graph::drain_sink`] produced
//! since the last poll, groups by output key, and folds each key's tuples
//! into the decision table of `spec.md` §4.H to decide whether that key's
//! net change is an insert, an update, or a delete. The fractional index
//! carried on the terminal payload (`spec.md` §3 "Payload at terminal
//! edge") is kept in a side table so an external consumer can sort the
//! materialized set by a plain string compare instead of re-sorting on
//! every change (`spec.md` §4.E "Why the scheme").

use fnv::FnvHashMap;
use tracing::error;

use crate::change::ChangeMessage;
use crate::collection::Batch;
use crate::error::InvariantViolation;
use crate::value::{Key, Value};

/// Produced to the result collection (`spec.md` §6): a batched
/// `begin() … write(...) … commit()` transaction, plus `mark_ready` once the
/// initial full state has been materialized.
pub trait ResultSink: Send {
    fn begin(&mut self);
    fn write(&mut self, change: ChangeMessage);
    fn commit(&mut self);
    fn mark_ready(&mut self);
}

/// A `ResultSink` that just records what it was told, for tests and for
/// embedders that want to inspect materialized state directly rather than
/// writing it into a real collection.
#[derive(Default)]
pub struct RecordingSink {
    pub transactions: Vec<Vec<ChangeMessage>>,
    pub ready: bool,
    in_progress: Vec<ChangeMessage>,
}

impl ResultSink for RecordingSink {
    fn begin(&mut self) {
        self.in_progress.clear();
    }

    fn write(&mut self, change: ChangeMessage) {
        self.in_progress.push(change);
    }

    fn commit(&mut self) {
        self.transactions.push(std::mem::take(&mut self.in_progress));
    }

    fn mark_ready(&mut self) {
        self.ready = true;
    }
}

/// Net per-key accumulation within one materializer pass (`spec.md` §4.H
/// "for each key computes net (inserts, deletes, latestValue,
/// latestFracIndex)").
#[derive(Default)]
struct NetChange {
    inserts: i64,
    deletes: i64,
    latest_insert_value: Option<Value>,
    latest_insert_index: Option<String>,
    latest_delete_value: Option<Value>,
}

/// Per-key materialized state: the value currently held and its fractional
/// index, if the query has an `ORDER BY` (`spec.md` §3 "Lifecycles":
/// "Fractional indexes: created when a row enters the top-K ... discarded
/// when the row exits the materialized window").
struct MaterializedRow {
    value: Value,
    frac_index: Option<String>,
}

pub struct Materializer {
    rows: FnvHashMap<Key, MaterializedRow>,
    violations: Vec<InvariantViolation>,
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Materializer {
    pub fn new() -> Self {
        Materializer { rows: FnvHashMap::default(), violations: Vec::new() }
    }

    /// `true` once any row has been materialized under `key` — the
    /// "key present" condition the `spec.md` §4.H decision table branches
    /// on.
    pub fn contains(&self, key: &Key) -> bool {
        self.rows.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.rows.get(key).map(|row| &row.value)
    }

    pub fn frac_index(&self, key: &Key) -> Option<&str> {
        self.rows.get(key).and_then(|row| row.frac_index.as_deref())
    }

    /// Stable comparator over the fractional-index side table (`spec.md`
    /// §4.H, I3): rows with no index (no `ORDER BY`) are incomparable by
    /// position and fall back to row-key order.
    pub fn compare(&self, a: &Key, b: &Key) -> std::cmp::Ordering {
        match (self.frac_index(a), self.frac_index(b)) {
            (Some(ia), Some(ib)) => ia.cmp(ib).then_with(|| a.cmp(b)),
            _ => a.cmp(b),
        }
    }

    /// Folds every batch drained from the graph's terminal sink into the
    /// `spec.md` §4.H decision table, writing the resulting transaction to
    /// `sink`. One `begin()/commit()` pair per call, even if `batches` is
    /// empty (an empty commit is a harmless no-op for the sink to absorb).
    pub fn apply(&mut self, batches: Vec<Batch>, sink: &mut dyn ResultSink) {
        let mut net: FnvHashMap<Key, NetChange> = FnvHashMap::default();
        for batch in batches {
            for ((key, payload), mult) in batch.tuples {
                let entry = net.entry(key).or_default();
                if mult > 0 {
                    entry.inserts += mult;
                    entry.latest_insert_value = Some(payload.value);
                    entry.latest_insert_index = payload.order_index;
                } else if mult < 0 {
                    entry.deletes += mult.unsigned_abs() as i64;
                    entry.latest_delete_value = Some(payload.value);
                }
            }
        }

        sink.begin();
        for (key, change) in net {
            self.apply_one(key, change, sink);
        }
        sink.commit();
    }

    fn apply_one(&mut self, key: Key, change: NetChange, sink: &mut dyn ResultSink) {
        let present = self.rows.contains_key(&key);

        if change.inserts > change.deletes {
            let Some(value) = change.latest_insert_value else {
                self.invariant_violation(key, change.inserts, change.deletes);
                return;
            };
            let previous = self.rows.insert(key.clone(), MaterializedRow { value: value.clone(), frac_index: change.latest_insert_index.clone() });
            match previous {
                Some(old) => sink.write(ChangeMessage::Update { key, previous_value: old.value, value }),
                None => sink.write(ChangeMessage::Insert { key, value }),
            }
            return;
        }

        if change.inserts == change.deletes && change.inserts > 0 && present {
            let Some(value) = change.latest_insert_value else {
                self.invariant_violation(key, change.inserts, change.deletes);
                return;
            };
            let previous = self.rows.insert(key.clone(), MaterializedRow { value: value.clone(), frac_index: change.latest_insert_index.clone() });
            sink.write(ChangeMessage::Update {
                key,
                previous_value: previous.map(|r| r.value).unwrap_or_else(|| value.clone()),
                value,
            });
            return;
        }

        if change.deletes > 0 && change.inserts == 0 {
            let removed = self.rows.remove(&key);
            let value = removed.map(|r| r.value).or(change.latest_delete_value).unwrap_or(Value::Null);
            sink.write(ChangeMessage::Delete { key, value });
            return;
        }

        self.invariant_violation(key, change.inserts, change.deletes);
    }

    fn invariant_violation(&mut self, key: Key, inserts: i64, deletes: i64) {
        let violation = InvariantViolation::ImpossibleMaterializerCombination { key, inserts, deletes };
        error!(error = %violation, "materializer invariant violated");
        self.violations.push(violation);
    }

    /// Drains any invariant violations observed since the last call
    /// (`spec.md` §7.2).
    pub fn take_violations(&mut self) -> Vec<InvariantViolation> {
        std::mem::take(&mut self.violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Payload;

    fn batch_of(tuples: Vec<(Key, Value, i64)>) -> Batch {
        Batch::of(tuples.into_iter().map(|(k, v, m)| ((k, Payload::new(v)), m)).collect())
    }

    #[test]
    fn first_insert_emits_insert() {
        let mut m = Materializer::new();
        let mut sink = RecordingSink::default();
        m.apply(vec![batch_of(vec![(Key::Int(1), Value::Int(10), 1)])], &mut sink);
        assert_eq!(sink.transactions.len(), 1);
        assert!(matches!(sink.transactions[0][0], ChangeMessage::Insert { .. }));
        assert!(m.contains(&Key::Int(1)));
    }

    #[test]
    fn retract_then_insert_same_batch_is_update() {
        let mut m = Materializer::new();
        let mut sink = RecordingSink::default();
        m.apply(vec![batch_of(vec![(Key::Int(1), Value::Int(10), 1)])], &mut sink);

        m.apply(
            vec![batch_of(vec![(Key::Int(1), Value::Int(10), -1), (Key::Int(1), Value::Int(20), 1)])],
            &mut sink,
        );
        assert!(matches!(sink.transactions[1][0], ChangeMessage::Update { .. }));
        assert_eq!(m.get(&Key::Int(1)), Some(&Value::Int(20)));
    }

    #[test]
    fn pure_retraction_is_delete() {
        let mut m = Materializer::new();
        let mut sink = RecordingSink::default();
        m.apply(vec![batch_of(vec![(Key::Int(1), Value::Int(10), 1)])], &mut sink);
        m.apply(vec![batch_of(vec![(Key::Int(1), Value::Int(10), -1)])], &mut sink);
        assert!(matches!(sink.transactions[1][0], ChangeMessage::Delete { .. }));
        assert!(!m.contains(&Key::Int(1)));
    }

    #[test]
    fn impossible_combination_is_recorded_not_panicked() {
        let mut m = Materializer::new();
        let mut sink = RecordingSink::default();
        // two deletes, one insert for a key that was never present: deletes>inserts>0.
        m.apply(
            vec![batch_of(vec![(Key::Int(1), Value::Int(1), -1), (Key::Int(1), Value::Int(2), -1), (Key::Int(1), Value::Int(3), 1)])],
            &mut sink,
        );
        assert_eq!(m.take_violations().len(), 1);
    }

    #[test]
    fn compare_orders_by_fractional_index_then_key() {
        let mut m = Materializer::new();
        let mut sink = RecordingSink::default();
        let mut batch = Batch::new();
        batch.push(Key::Int(1), Payload::with_order_index(Value::Int(1), "b".to_string()), 1);
        batch.push(Key::Int(2), Payload::with_order_index(Value::Int(2), "a".to_string()), 1);
        m.apply(vec![batch], &mut sink);
        assert_eq!(m.compare(&Key::Int(2), &Key::Int(1)), std::cmp::Ordering::Less);
    }
}
