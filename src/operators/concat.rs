//! `concat` — multiset union (`spec.md` §4.C).
//!
//! Two input ports, one output; whichever port a batch arrives on, it passes
//! through unchanged. Union is exactly "both batches exist", so no combining
//! logic is needed beyond that.

use crate::collection::Batch;
use crate::graph::Operator;

#[derive(Default)]
pub struct Concat;

impl Operator for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn push(&mut self, _port: usize, batch: Batch) -> Batch {
        batch
    }
}
