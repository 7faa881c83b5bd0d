//! `join` — hash equi-join with two-sided state (`spec.md` §4.D).
//!
//! Each side maintains `joinKeyHash -> [(rowKey, payload, mult)]`. On a left
//! batch, for each tuple: probe the right table, emit the cross product with
//! signed multiplicities `mᴸ · mᴿ`, then update the left table; symmetric for
//! the right side. Outer joins emit padded-null rows when the opposite
//! side's count for a key is zero, and retract them once a real match
//! arrives — implemented here by tracking each side's bucket as a running
//! total, and treating a 0↔non-zero crossing of that total as the signal to
//! flip every row on the *other* side between padded and matched.

use fnv::FnvHashMap;

use crate::collection::{Batch, Payload};
use crate::graph::Operator;
use crate::value::{Key, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    /// No join key: every left row paired with every right row.
    Cross,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Default)]
struct Bucket {
    /// rowKey -> (value, net multiplicity), so repeated updates to the same
    /// row converge rather than leaking duplicate entries.
    rows: FnvHashMap<Key, (Value, i64)>,
    total: i64,
}

pub struct Join<KL, KR, C>
where
    KL: Fn(&Value) -> Key + Send,
    KR: Fn(&Value) -> Key + Send,
    C: Fn(Option<&Value>, Option<&Value>) -> Value + Send,
{
    kind: JoinKind,
    left_key: KL,
    right_key: KR,
    combine: C,
    left_state: FnvHashMap<Key, Bucket>,
    right_state: FnvHashMap<Key, Bucket>,
}

impl<KL, KR, C> Join<KL, KR, C>
where
    KL: Fn(&Value) -> Key + Send,
    KR: Fn(&Value) -> Key + Send,
    C: Fn(Option<&Value>, Option<&Value>) -> Value + Send,
{
    pub fn new(kind: JoinKind, left_key: KL, right_key: KR, combine: C) -> Self {
        Join { kind, left_key, right_key, combine, left_state: FnvHashMap::default(), right_state: FnvHashMap::default() }
    }

    /// Whether a row on `own` gets a padded-null partner emitted when the
    /// opposite bucket is empty.
    fn pad_self(&self, own: Side) -> bool {
        matches!(
            (own, self.kind),
            (Side::Left, JoinKind::LeftOuter | JoinKind::FullOuter) | (Side::Right, JoinKind::RightOuter | JoinKind::FullOuter)
        )
    }

    /// Whether rows on the *other* side need their padding flipped when
    /// `own`'s bucket total crosses zero.
    fn pad_other(&self, own: Side) -> bool {
        matches!(
            (own, self.kind),
            (Side::Left, JoinKind::RightOuter | JoinKind::FullOuter) | (Side::Right, JoinKind::LeftOuter | JoinKind::FullOuter)
        )
    }

    fn join_key(&self, own: Side, value: &Value) -> Key {
        if self.kind == JoinKind::Cross {
            return Key::Int(0);
        }
        match own {
            Side::Left => (self.left_key)(value),
            Side::Right => (self.right_key)(value),
        }
    }

    fn output_key(&self, left_key: &Key, right_key: Option<&Key>) -> Key {
        match right_key {
            Some(rk) => Key::composite(left_key, rk),
            None => left_key.clone(),
        }
    }

    fn combine_row(&self, left: Option<&Value>, right: Option<&Value>) -> Value {
        (self.combine)(left, right)
    }

    fn process(&mut self, own: Side, row_key: Key, value: Value, delta: i64) -> Batch {
        let jk = self.join_key(own, &value);
        let mut out = Batch::new();

        let (own_state, other_state) = match own {
            Side::Left => (&mut self.left_state, &mut self.right_state),
            Side::Right => (&mut self.right_state, &mut self.left_state),
        };
        let other_bucket = other_state.entry(jk.clone()).or_default();

        // 1. Matched cross product against the opposite side's current rows.
        for (other_key, (other_value, other_mult)) in other_bucket.rows.iter() {
            let mult = delta * other_mult;
            if mult == 0 {
                continue;
            }
            let (left_key, right_key, left_val, right_val) = match own {
                Side::Left => (&row_key, other_key, &value, other_value),
                Side::Right => (other_key, &row_key, other_value, &value),
            };
            let out_key = self.output_key(left_key, Some(right_key));
            let out_value = self.combine_row(Some(left_val), Some(right_val));
            out.push(out_key, Payload::new(out_value), mult);
        }

        // 2. If this row itself is unmatched under an outer join, pad it.
        if self.pad_self(own) && other_bucket.total == 0 {
            let (left_val, right_val) = match own {
                Side::Left => (Some(&value), None),
                Side::Right => (None, Some(&value)),
            };
            out.push(row_key.clone(), Payload::new(self.combine_row(left_val, right_val)), delta);
        }

        // 3. Apply the delta to this row's own bucket and track the crossing.
        let own_bucket = own_state.entry(jk.clone()).or_default();
        let prior_total = own_bucket.total;
        let entry = own_bucket.rows.entry(row_key.clone()).or_insert((value.clone(), 0));
        entry.1 += delta;
        let entry_mult = entry.1;
        if entry_mult == 0 {
            own_bucket.rows.remove(&row_key);
        } else {
            entry.0 = value.clone();
        }
        own_bucket.total += delta;
        let new_total = own_bucket.total;

        // 4. If our total crossed zero and the other side pads on our
        // emptiness, flip every row on the other side between padded and
        // matched.
        if self.pad_other(own) {
            let other_bucket = other_state.entry(jk).or_default();
            if prior_total == 0 && new_total != 0 {
                for (other_key, (other_value, other_mult)) in other_bucket.rows.iter() {
                    let (left_val, right_val) = match own {
                        Side::Left => (None, Some(other_value)),
                        Side::Right => (Some(other_value), None),
                    };
                    out.push(other_key.clone(), Payload::new(self.combine_row(left_val, right_val)), -other_mult);
                }
            } else if prior_total != 0 && new_total == 0 {
                for (other_key, (other_value, other_mult)) in other_bucket.rows.iter() {
                    let (left_val, right_val) = match own {
                        Side::Left => (None, Some(other_value)),
                        Side::Right => (Some(other_value), None),
                    };
                    out.push(other_key.clone(), Payload::new(self.combine_row(left_val, right_val)), *other_mult);
                }
            }
        }

        out
    }
}

impl<KL, KR, C> Operator for Join<KL, KR, C>
where
    KL: Fn(&Value) -> Key + Send,
    KR: Fn(&Value) -> Key + Send,
    C: Fn(Option<&Value>, Option<&Value>) -> Value + Send,
{
    fn name(&self) -> &'static str {
        "join"
    }

    fn push(&mut self, port: usize, batch: Batch) -> Batch {
        let side = if port == 0 { Side::Left } else { Side::Right };
        let mut out = Batch::new();
        for ((row_key, payload), mult) in batch.tuples {
            out.extend(self.process(side, row_key, payload.value, mult));
        }
        out
    }
}
