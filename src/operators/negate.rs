//! `negate` — flips multiplicity sign (`spec.md` §4.C), used to derive
//! retractions (e.g. for `EXCEPT`-style subtraction via `concat`).

use crate::collection::Batch;
use crate::graph::Operator;

#[derive(Default)]
pub struct Negate;

impl Operator for Negate {
    fn name(&self) -> &'static str {
        "negate"
    }

    fn push(&mut self, _port: usize, batch: Batch) -> Batch {
        let tuples = batch.tuples.into_iter().map(|(row, mult)| (row, -mult)).collect();
        Batch::of(tuples)
    }
}
