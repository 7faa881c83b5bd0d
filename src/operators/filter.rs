//! `filter` — WHERE clause (`spec.md` §4.C).
//!
//! Drops tuples whose payload fails the predicate; multiplicities are
//! preserved for survivors.

use crate::collection::Batch;
use crate::graph::Operator;
use crate::value::Value;

pub struct Filter<P: Fn(&Value) -> bool + Send> {
    predicate: P,
}

impl<P: Fn(&Value) -> bool + Send> Filter<P> {
    pub fn new(predicate: P) -> Self {
        Filter { predicate }
    }
}

impl<P: Fn(&Value) -> bool + Send> Operator for Filter<P> {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn push(&mut self, _port: usize, batch: Batch) -> Batch {
        let tuples = batch.tuples.into_iter().filter(|((_, payload), _)| (self.predicate)(&payload.value)).collect();
        Batch::of(tuples)
    }
}
