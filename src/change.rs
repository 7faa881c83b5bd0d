//! The external change-message unit (`spec.md` §3).
//!
//! `ChangeMessage` is what source collections and the result collection speak.
//! Internally the runtime only ever deals in multiset tuples (`collection.rs`);
//! the boundary between the two is exactly the `split_into_tuples` method
//! below, which turns an `update` into its constituent delete+insert pair.

use crate::value::{Key, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeMessage {
    Insert { key: Key, value: Value },
    Update { key: Key, previous_value: Value, value: Value },
    Delete { key: Key, value: Value },
}

impl ChangeMessage {
    pub fn key(&self) -> &Key {
        match self {
            ChangeMessage::Insert { key, .. } => key,
            ChangeMessage::Update { key, .. } => key,
            ChangeMessage::Delete { key, .. } => key,
        }
    }

    /// Splits an `update` into `delete(previousValue) ∧ insert(value)`, per
    /// `spec.md` §3: "Updates are semantically equivalent to ... and are
    /// split into that pair at the boundary." Insert/delete pass through as a
    /// single-element vec.
    pub fn split_into_tuples(self) -> Vec<((Key, Value), i64)> {
        match self {
            ChangeMessage::Insert { key, value } => vec![((key, value), 1)],
            ChangeMessage::Delete { key, value } => vec![((key, value), -1)],
            ChangeMessage::Update { key, previous_value, value } => {
                vec![((key.clone(), previous_value), -1), ((key, value), 1)]
            }
        }
    }
}
