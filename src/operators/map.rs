//! `map` — projection (`spec.md` §4.C).
//!
//! Relabels each tuple's payload; keys and multiplicities pass through
//! unchanged.

use crate::collection::{Batch, Payload};
use crate::graph::Operator;
use crate::value::Value;

pub struct Map<F: Fn(&Value) -> Value + Send> {
    project: F,
}

impl<F: Fn(&Value) -> Value + Send> Map<F> {
    pub fn new(project: F) -> Self {
        Map { project }
    }
}

impl<F: Fn(&Value) -> Value + Send> Operator for Map<F> {
    fn name(&self) -> &'static str {
        "map"
    }

    fn push(&mut self, _port: usize, batch: Batch) -> Batch {
        let tuples = batch
            .tuples
            .into_iter()
            .map(|((key, payload), mult)| {
                let value = (self.project)(&payload.value);
                ((key, Payload { value, order_index: payload.order_index }), mult)
            })
            .collect();
        Batch::of(tuples)
    }
}
