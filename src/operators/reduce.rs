//! `reduce` — group-by with aggregates (`spec.md` §4.D).
//!
//! Per group key, holds one [`AggState`] per requested aggregate plus the
//! group's net row count. On input, each aggregate's `add`/`remove`
//! primitive (modeled here as `apply` with a signed multiplicity) updates in
//! place; whenever the group's computed output value changes, a retraction
//! of the previous output and an insert of the new one are emitted. `min`
//! and `max` keep a sorted multiset of contributions (a `BTreeMap` keyed by
//! value) so a removal can find the new extremum without rescanning every
//! contributor — the same approach the teacher's `group`/`min` operators use
//! for the analogous problem.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use fnv::FnvHashMap;

use crate::collection::{Batch, Payload};
use crate::graph::Operator;
use crate::value::{Key, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggKind {
    Min,
    Max,
    Sum,
    Count,
    Avg,
}

pub struct AggregateSpec {
    pub output_field: String,
    pub kind: AggKind,
    /// Extracts the numeric value an aggregate operates over; ignored for
    /// `Count`. Returns `None` for a row that should be skipped (NULL field),
    /// matching SQL's NULL-skipping aggregate semantics.
    pub extract: Box<dyn Fn(&Value) -> Option<f64> + Send>,
}

#[derive(Clone, Copy, PartialEq)]
struct OrdFloat(f64);
impl Eq for OrdFloat {}
impl PartialOrd for OrdFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrdFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

enum AggState {
    Count { total: i64 },
    Sum { total: f64, any_float: bool },
    Avg { sum: f64, count: i64 },
    MinMax { multiset: BTreeMap<OrdFloat, (Value, i64)>, want_max: bool },
}

impl AggState {
    fn new(kind: AggKind) -> Self {
        match kind {
            AggKind::Count => AggState::Count { total: 0 },
            AggKind::Sum => AggState::Sum { total: 0.0, any_float: false },
            AggKind::Avg => AggState::Avg { sum: 0.0, count: 0 },
            AggKind::Min => AggState::MinMax { multiset: BTreeMap::new(), want_max: false },
            AggKind::Max => AggState::MinMax { multiset: BTreeMap::new(), want_max: true },
        }
    }

    fn apply(&mut self, value: Option<&Value>, numeric: Option<f64>, mult: i64) {
        match self {
            AggState::Count { total } => *total += mult,
            AggState::Sum { total, any_float } => {
                if let Some(n) = numeric {
                    *total += n * mult as f64;
                    if matches!(value, Some(Value::Float(_))) {
                        *any_float = true;
                    }
                }
            }
            AggState::Avg { sum, count } => {
                if let Some(n) = numeric {
                    *sum += n * mult as f64;
                    *count += mult;
                }
            }
            AggState::MinMax { multiset, .. } => {
                if let (Some(n), Some(v)) = (numeric, value) {
                    let entry = multiset.entry(OrdFloat(n)).or_insert((v.clone(), 0));
                    entry.1 += mult;
                    if entry.1 == 0 {
                        multiset.remove(&OrdFloat(n));
                    }
                }
            }
        }
    }

    fn output(&self) -> Option<Value> {
        match self {
            AggState::Count { total } => Some(Value::Int(*total)),
            AggState::Sum { total, any_float } => {
                if *any_float || total.fract() != 0.0 {
                    Some(Value::Float(*total))
                } else {
                    Some(Value::Int(*total as i64))
                }
            }
            AggState::Avg { sum, count } => if *count > 0 { Some(Value::Float(sum / *count as f64)) } else { None },
            AggState::MinMax { multiset, want_max } => {
                if *want_max {
                    multiset.values().next_back().map(|(v, _)| v.clone())
                } else {
                    multiset.values().next().map(|(v, _)| v.clone())
                }
            }
        }
    }
}

struct GroupState {
    states: Vec<AggState>,
    row_total: i64,
    last_output: Option<Value>,
}

pub struct Reduce<G>
where
    G: Fn(&Value) -> Key + Send,
{
    group_fn: G,
    key_field: String,
    aggregates: Vec<AggregateSpec>,
    groups: FnvHashMap<Key, GroupState>,
}

impl<G> Reduce<G>
where
    G: Fn(&Value) -> Key + Send,
{
    pub fn new(group_fn: G, key_field: impl Into<String>, aggregates: Vec<AggregateSpec>) -> Self {
        Reduce { group_fn, key_field: key_field.into(), aggregates, groups: FnvHashMap::default() }
    }

    fn group_output(&self, key: &Key, state: &GroupState) -> Value {
        let mut fields = vec![(self.key_field.clone(), key_to_value(key))];
        for (spec, agg) in self.aggregates.iter().zip(state.states.iter()) {
            fields.push((spec.output_field.clone(), agg.output().unwrap_or(Value::Null)));
        }
        Value::Record(fields)
    }
}

fn key_to_value(key: &Key) -> Value {
    match key {
        Key::Int(i) => Value::Int(*i),
        Key::Str(s) => Value::Str(s.clone()),
    }
}

impl<G> Operator for Reduce<G>
where
    G: Fn(&Value) -> Key + Send,
{
    fn name(&self) -> &'static str {
        "reduce"
    }

    fn push(&mut self, _port: usize, batch: Batch) -> Batch {
        let mut touched: Vec<Key> = Vec::new();
        for ((_row_key, payload), mult) in batch.tuples {
            let group_key = (self.group_fn)(&payload.value);
            let state = self.groups.entry(group_key.clone()).or_insert_with(|| GroupState {
                states: self.aggregates.iter().map(|spec| AggState::new(spec.kind)).collect(),
                row_total: 0,
                last_output: None,
            });
            for (spec, agg) in self.aggregates.iter().zip(state.states.iter_mut()) {
                let numeric = (spec.extract)(&payload.value);
                agg.apply(Some(&payload.value), numeric, mult);
            }
            state.row_total += mult;
            touched.push(group_key);
        }

        let mut out = Batch::new();
        touched.sort();
        touched.dedup();
        for group_key in touched {
            let Some(state) = self.groups.get(&group_key) else { continue };
            if state.row_total <= 0 {
                if let Some(prev) = &state.last_output {
                    out.push(group_key.clone(), Payload::new(prev.clone()), -1);
                }
                self.groups.remove(&group_key);
                continue;
            }
            let new_output = self.group_output(&group_key, state);
            let state = self.groups.get_mut(&group_key).unwrap();
            if state.last_output.as_ref() != Some(&new_output) {
                if let Some(prev) = state.last_output.take() {
                    out.push(group_key.clone(), Payload::new(prev), -1);
                }
                out.push(group_key.clone(), Payload::new(new_output.clone()), 1);
                state.last_output = Some(new_output);
            }
        }
        out
    }
}
