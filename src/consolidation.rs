//! Grouping and summing of signed multiplicities.
//!
//! Grounded on the teacher's `consolidation.rs`: that module sorts runs of
//! equal keys and sums their weights, dropping zero accumulations. This crate
//! has the same goal but payloads are not generally `Ord` (deep structural
//! comparison on `Value` has no canonical order we want to expose), so
//! grouping here goes through an `FnvHashMap` keyed by `(Key, Payload)`
//! instead of a sort. The observable behavior — and the "drop zero-sum
//! entries" rule — is identical.

use fnv::FnvHashMap;

use crate::collection::{Payload, Tuple};
use crate::value::Key;

/// Sums multiplicities for equal `(key, payload)` pairs in place, dropping
/// entries whose sum is zero. Order of surviving tuples is unspecified.
pub fn consolidate(tuples: &mut Vec<Tuple>) {
    if tuples.len() <= 1 {
        tuples.retain(|(_, mult)| *mult != 0);
        return;
    }
    let mut totals: FnvHashMap<(Key, Payload), i64> = FnvHashMap::default();
    for (row, mult) in tuples.drain(..) {
        *totals.entry(row).or_insert(0) += mult;
    }
    tuples.extend(totals.into_iter().filter(|(_, mult)| *mult != 0).map(|(row, mult)| (row, mult)));
}
