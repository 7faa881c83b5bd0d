//! `distinct` (`spec.md` §4.D).
//!
//! Holds the current net multiplicity per output `(key, payload)`; emits a
//! retraction plus a single-copy insert whenever the sign of that net
//! multiplicity transitions across "present" (> 0).

use fnv::FnvHashMap;

use crate::collection::{Batch, Payload};
use crate::graph::Operator;
use crate::value::Key;

#[derive(Default)]
pub struct Distinct {
    counts: FnvHashMap<(Key, Payload), i64>,
}

impl Distinct {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Operator for Distinct {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn push(&mut self, _port: usize, batch: Batch) -> Batch {
        let mut deltas: FnvHashMap<(Key, Payload), i64> = FnvHashMap::default();
        for (row, mult) in batch.tuples {
            *deltas.entry(row).or_insert(0) += mult;
        }

        let mut out = Batch::new();
        for (row, delta) in deltas {
            if delta == 0 {
                continue;
            }
            let was_present = self.counts.get(&row).copied().unwrap_or(0) > 0;
            let new_count = self.counts.entry(row.clone()).or_insert(0);
            *new_count += delta;
            let is_present = *new_count > 0;
            if *new_count == 0 {
                self.counts.remove(&row);
            }
            match (was_present, is_present) {
                (false, true) => out.push(row.0, row.1, 1),
                (true, false) => out.push(row.0, row.1, -1),
                _ => {}
            }
        }
        out
    }
}
