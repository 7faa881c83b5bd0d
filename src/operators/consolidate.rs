//! `consolidate` — per-batch canonicalization (`spec.md` §4.C).
//!
//! Sums multiplicities for equal `(key, payload)` tuples within a single
//! batch and drops zero-sum entries. This is a stateless operator: it only
//! ever looks at the batch in front of it, which is why `spec.md` §2 files it
//! under "Stateless operators" rather than alongside join/distinct/reduce.
//! Cross-batch consolidation of *observable* state is the materializer's job
//! (§4.H), not this operator's.

use crate::collection::Batch;
use crate::graph::Operator;

#[derive(Default)]
pub struct Consolidate;

impl Operator for Consolidate {
    fn name(&self) -> &'static str {
        "consolidate"
    }

    fn push(&mut self, _port: usize, mut batch: Batch) -> Batch {
        batch.consolidate();
        batch
    }
}
