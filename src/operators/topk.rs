//! Order-by + top-K (`spec.md` §4.E) — the central algorithm of this crate.
//!
//! Maintains exactly the rows ranked `[offset, offset+limit)` out of every
//! row ever admitted, stamping each window member with a fractional index
//! (`fractional_index.rs`) so downstream consumers can sort by plain string
//! comparison. The key simplification that makes the incremental maintenance
//! tractable: since at most one row is inserted or retracted per call, the
//! window (a contiguous slice of the sorted buffer) can gain at most one
//! member and lose at most one member per call. Diffing the window's key
//! sequence before and after the mutation identifies exactly those two rows
//! (if any); every row that stays in the window keeps its existing
//! fractional index untouched, which is what makes round-tripping an
//! insert+delete of the same row leave all other rows' indexes unchanged
//! (`spec.md` §8).

use std::cmp::Ordering;

use fnv::FnvHashMap;
use tracing::debug;

use crate::collection::{Batch, Payload};
use crate::error::InvariantViolation;
use crate::fractional_index;
use crate::graph::Operator;
use crate::value::{compare_values, Key, OrderKey, Value};

/// One column of an `ORDER BY` list: how to extract its value from a row,
/// and how to compare two extracted values (`spec.md` §3, §6).
pub struct OrderBySpec {
    pub extract: Box<dyn Fn(&Value) -> Value + Send>,
    pub key: OrderKey,
}

pub struct TopK {
    specs: Vec<OrderBySpec>,
    offset: usize,
    limit: usize,
    alphabet: String,
    rebalance_threshold: usize,
    /// Every row admitted and not yet retracted, sorted ascending by rank.
    buffer_order: Vec<Key>,
    buffer_values: FnvHashMap<Key, Value>,
    /// Fractional index for rows currently in the window.
    frac_index: FnvHashMap<Key, String>,
    violations: Vec<InvariantViolation>,
}

impl TopK {
    pub fn new(specs: Vec<OrderBySpec>, offset: usize, limit: usize, alphabet: String, rebalance_threshold: usize) -> Self {
        TopK {
            specs,
            offset,
            limit,
            alphabet,
            rebalance_threshold,
            buffer_order: Vec::new(),
            buffer_values: FnvHashMap::default(),
            frac_index: FnvHashMap::default(),
            violations: Vec::new(),
        }
    }

    fn rank_cmp(&self, a: &Key, b: &Key) -> Ordering {
        let av = &self.buffer_values[a];
        let bv = &self.buffer_values[b];
        for spec in &self.specs {
            let ordering = compare_values(&(spec.extract)(av), &(spec.extract)(bv), &spec.key);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.cmp(b)
    }

    fn window_range(&self) -> std::ops::Range<usize> {
        let len = self.buffer_order.len();
        let start = self.offset.min(len);
        let end = (self.offset + self.limit).min(len);
        start..end
    }

    fn window_keys(&self) -> Vec<Key> {
        self.buffer_order[self.window_range()].to_vec()
    }

    /// Test/diagnostic accessor for the current window, in rank order.
    pub fn current_window(&self) -> Vec<(Key, Value, String)> {
        self.window_keys()
            .into_iter()
            .map(|k| {
                let v = self.buffer_values[&k].clone();
                let idx = self.frac_index[&k].clone();
                (k, v, idx)
            })
            .collect()
    }

    fn insert_sorted(&mut self, key: Key, value: Value) {
        self.buffer_values.insert(key.clone(), value);
        let pos = self.buffer_order.partition_point(|existing| self.rank_cmp(existing, &key) == Ordering::Less);
        self.buffer_order.insert(pos, key);
    }

    fn remove_key(&mut self, key: &Key) -> bool {
        if let Some(pos) = self.buffer_order.iter().position(|k| k == key) {
            self.buffer_order.remove(pos);
            true
        } else {
            false
        }
    }

    /// Applies one tuple's worth of change to the buffer and window,
    /// returning the output batch (retractions/insertions of *window*
    /// members whose presence or identity changed).
    fn apply_mutation(&mut self, is_insert: bool, key: Key, value: Value) -> Batch {
        let old_window = self.window_keys();

        if is_insert {
            self.insert_sorted(key.clone(), value);
        } else if !self.remove_key(&key) {
            self.violations.push(InvariantViolation::RetractionWithoutRecord { operator: "topk", key: key.clone() });
            return Batch::new();
        }

        let new_window = self.window_keys();
        let exited: Vec<&Key> = old_window.iter().filter(|k| !new_window.contains(k)).collect();
        let entered: Vec<&Key> = new_window.iter().filter(|k| !old_window.contains(k)).collect();

        let mut out = Batch::new();
        for exited_key in &exited {
            if let Some(old_idx) = self.frac_index.remove(*exited_key) {
                if let Some(v) = self.buffer_values.get(*exited_key) {
                    out.push((*exited_key).clone(), Payload::with_order_index(v.clone(), old_idx), -1);
                }
            }
        }
        let mut triggered_rebalance = false;
        for entered_key in &entered {
            let idx_in_window = new_window.iter().position(|k| k == *entered_key).unwrap();
            let left = idx_in_window.checked_sub(1).and_then(|i| new_window.get(i)).and_then(|k| self.frac_index.get(k));
            let right = new_window.get(idx_in_window + 1).and_then(|k| self.frac_index.get(k));
            let new_idx = fractional_index::index_between(left.map(|s| s.as_str()), right.map(|s| s.as_str()), &self.alphabet);
            if new_idx.len() > self.rebalance_threshold {
                triggered_rebalance = true;
            }
            self.frac_index.insert((*entered_key).clone(), new_idx.clone());
            if let Some(v) = self.buffer_values.get(*entered_key) {
                out.push((*entered_key).clone(), Payload::with_order_index(v.clone(), new_idx), 1);
            }
        }

        if !is_insert {
            self.buffer_values.remove(&key);
        }

        if triggered_rebalance {
            debug!(window_len = new_window.len(), "top-k rebalance triggered");
            out.extend(self.rebalance());
        }

        out
    }

    /// Evenly respaces every current window member's fractional index
    /// (`spec.md` §4.E "pathological dense case").
    fn rebalance(&mut self) -> Batch {
        let window = self.window_keys();
        let fresh = fractional_index::rebalance(window.len(), &self.alphabet);
        let mut out = Batch::new();
        for (key, new_idx) in window.iter().zip(fresh.into_iter()) {
            if let Some(old_idx) = self.frac_index.get(key).cloned() {
                if old_idx == new_idx {
                    continue;
                }
                if let Some(v) = self.buffer_values.get(key) {
                    out.push(key.clone(), Payload::with_order_index(v.clone(), old_idx), -1);
                    out.push(key.clone(), Payload::with_order_index(v.clone(), new_idx.clone()), 1);
                }
            }
            self.frac_index.insert(key.clone(), new_idx);
        }
        out
    }
}

impl Operator for TopK {
    fn name(&self) -> &'static str {
        "topk"
    }

    fn push(&mut self, _port: usize, batch: Batch) -> Batch {
        let mut deletes = Vec::new();
        let mut inserts = Vec::new();
        for ((key, payload), mult) in batch.tuples {
            if mult < 0 {
                for _ in 0..mult.unsigned_abs() {
                    deletes.push((key.clone(), payload.value.clone()));
                }
            } else if mult > 0 {
                for _ in 0..mult {
                    inserts.push((key.clone(), payload.value.clone()));
                }
            }
        }
        let mut out = Batch::new();
        for (key, value) in deletes {
            out.extend(self.apply_mutation(false, key, value));
        }
        for (key, value) in inserts {
            out.extend(self.apply_mutation(true, key, value));
        }
        out
    }

    fn data_needed(&self) -> Option<usize> {
        Some((self.offset + self.limit).saturating_sub(self.buffer_order.len()))
    }

    fn take_violations(&mut self) -> Vec<InvariantViolation> {
        std::mem::take(&mut self.violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Direction, OrderKey};

    fn salary_spec(direction: Direction) -> OrderBySpec {
        OrderBySpec {
            extract: Box::new(|v| v.get("salary").cloned().unwrap_or(Value::Null)),
            key: OrderKey::new(direction),
        }
    }

    fn row(id: i64, name: &str, salary: i64) -> (Key, Value) {
        (Key::Int(id), Value::record(vec![("name", Value::Str(name.to_string())), ("salary", Value::Int(salary))]))
    }

    fn push_all(op: &mut TopK, rows: Vec<(Key, Value)>) -> Batch {
        let mut batch = Batch::new();
        for (k, v) in rows {
            batch.push(k, Payload::new(v), 1);
        }
        op.push(0, batch)
    }

    fn window_names(op: &TopK) -> Vec<String> {
        op.current_window()
            .into_iter()
            .map(|(_, v, _)| match v.get("name") {
                Some(Value::Str(s)) => s.clone(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn scenario_offset_limit_desc() {
        let mut op = TopK::new(vec![salary_spec(Direction::Desc)], 1, 2, crate::config::DEFAULT_ALPHABET.to_string(), 16);
        push_all(&mut op, vec![
            row(1, "A", 50000),
            row(2, "B", 60000),
            row(3, "C", 55000),
            row(4, "D", 65000),
            row(5, "E", 52000),
        ]);
        assert_eq!(window_names(&op), vec!["B", "C"]);

        push_all(&mut op, vec![row(6, "G", 70000)]);
        assert_eq!(window_names(&op), vec!["D", "B"]);
    }

    #[test]
    fn scenario_asc_underfilled_requests_more() {
        let mut op = TopK::new(vec![salary_spec(Direction::Asc)], 1, 10, crate::config::DEFAULT_ALPHABET.to_string(), 16);
        push_all(&mut op, vec![
            row(1, "A", 50000),
            row(2, "B", 60000),
            row(3, "C", 55000),
            row(4, "D", 65000),
            row(5, "E", 52000),
        ]);
        assert!(op.data_needed().unwrap() > 0);
        push_all(&mut op, vec![row(6, "G", 72000)]);
        assert_eq!(window_names(&op), vec!["E", "A", "C", "B", "D", "G"]);
    }

    #[test]
    fn update_inside_window_keeps_frac_index_of_untouched_rows() {
        let mut op = TopK::new(vec![salary_spec(Direction::Desc)], 1, 2, crate::config::DEFAULT_ALPHABET.to_string(), 16);
        push_all(&mut op, vec![
            row(1, "A", 50000),
            row(2, "B", 60000),
            row(3, "C", 55000),
            row(4, "D", 65000),
            row(5, "E", 52000),
        ]);
        let c_index_before = op.frac_index.get(&Key::Int(3)).cloned();

        // update B: 60000 -> 62000
        let mut batch = Batch::new();
        batch.push(Key::Int(2), Payload::new(row(2, "B", 60000).1), -1);
        batch.push(Key::Int(2), Payload::new(row(2, "B", 62000).1), 1);
        op.push(0, batch);

        assert_eq!(window_names(&op), vec!["B", "C"]);
        let c_index_after = op.frac_index.get(&Key::Int(3)).cloned();
        assert_eq!(c_index_before, c_index_after, "untouched row keeps its fractional index");
    }

    #[test]
    fn delete_inside_window_promotes_next_row() {
        let mut op = TopK::new(vec![salary_spec(Direction::Desc)], 1, 2, crate::config::DEFAULT_ALPHABET.to_string(), 16);
        push_all(&mut op, vec![
            row(1, "A", 50000),
            row(2, "B", 60000),
            row(3, "C", 55000),
            row(4, "D", 65000),
            row(5, "E", 52000),
        ]);
        let mut delete = Batch::new();
        delete.push(Key::Int(2), Payload::new(row(2, "B", 60000).1), -1);
        op.push(0, delete);
        assert_eq!(window_names(&op), vec!["C", "E"]);
    }

    #[test]
    fn insert_delete_roundtrip_restores_indexes() {
        let mut op = TopK::new(vec![salary_spec(Direction::Desc)], 0, 10, crate::config::DEFAULT_ALPHABET.to_string(), 16);
        push_all(&mut op, vec![row(1, "A", 10), row(2, "B", 20)]);
        let before = op.frac_index.clone();

        let mut insert = Batch::new();
        insert.push(Key::Int(3), Payload::new(row(3, "G", 15).1), 1);
        op.push(0, insert);
        let mut delete = Batch::new();
        delete.push(Key::Int(3), Payload::new(row(3, "G", 15).1), -1);
        op.push(0, delete);

        assert_eq!(before, op.frac_index);
    }

    #[test]
    fn unknown_retraction_is_recorded_as_violation() {
        let mut op = TopK::new(vec![salary_spec(Direction::Desc)], 0, 2, crate::config::DEFAULT_ALPHABET.to_string(), 16);
        let mut delete = Batch::new();
        delete.push(Key::Int(99), Payload::new(Value::Int(1)), -1);
        op.push(0, delete);
        assert_eq!(op.take_violations().len(), 1);
    }
}
