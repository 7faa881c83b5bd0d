//! Multiset stream primitives (`spec.md` §4.A, component A).
//!
//! A `Batch` is an unordered bag of `Tuple`s; meaning is additive. Operators
//! receive whole batches and produce whole batches. The runtime does not
//! eagerly consolidate — a batch may carry several tuples for the same
//! `(key, payload)` — but must consolidate before exposing observable state
//! (I2 in `spec.md` §3).

use std::hash::{Hash, Hasher};

use crate::value::{Key, Value};

/// A row's payload as it travels through the dataflow graph.
///
/// `order_index` is `None` everywhere except on output of the top-K operator
/// (`spec.md` §3: "Payload at terminal edge: `(resultValue, orderByIndex |
/// null)`"); keeping the field on every payload (rather than introducing a
/// second payload type for the terminal edge) lets every operator in the
/// graph share one tuple type.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    pub value: Value,
    pub order_index: Option<String>,
}

impl Payload {
    pub fn new(value: Value) -> Self {
        Payload { value, order_index: None }
    }

    pub fn with_order_index(value: Value, order_index: String) -> Self {
        Payload { value, order_index: Some(order_index) }
    }
}

impl Eq for Payload {}

impl Hash for Payload {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.order_index.hash(state);
    }
}

/// One row, one signed multiplicity.
pub type Tuple = ((Key, Payload), i64);

/// An unordered bag of tuples. Meaning is additive: a negative multiplicity
/// is a retraction.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub tuples: Vec<Tuple>,
}

impl Batch {
    pub fn new() -> Self {
        Batch { tuples: Vec::new() }
    }

    pub fn of(tuples: Vec<Tuple>) -> Self {
        Batch { tuples }
    }

    pub fn push(&mut self, key: Key, payload: Payload, mult: i64) {
        self.tuples.push(((key, payload), mult));
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn extend(&mut self, other: Batch) {
        self.tuples.extend(other.tuples);
    }

    /// Consolidates in place: groups by `(key, payload)`, sums multiplicities,
    /// drops zero-sum entries. See `consolidation.rs` for the grouping logic.
    pub fn consolidate(&mut self) {
        crate::consolidation::consolidate(&mut self.tuples);
    }
}
