//! The row key and row value data model (`spec.md` §3).
//!
//! `Key` identifies a row within its collection (a string or an integer).
//! `Value` is the opaque, deeply-comparable record carried as a tuple's
//! payload. Both need manual `Hash`/`Eq` impls because `Value` holds `f64`.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::hashable::StructuralHash;

/// A row key: unique within its source collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// Builds a composite key for a join's output row, per the design note in
    /// `spec.md` §4.D: "composite encoded via the structural hash utility".
    pub fn composite(left: &Key, right: &Key) -> Key {
        let hash = (left, right).structural_hash();
        Key::Str(format!("{hash:016x}"))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The opaque, deeply-comparable row value.
///
/// `Record` keeps its fields in insertion order as authored by the caller;
/// operators that need canonical field order (hashing, equality) sort a local
/// copy rather than mutating the value, so display order is preserved for
/// consumers.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
}

impl Value {
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(k, _)| k == field).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn record(fields: Vec<(&str, Value)>) -> Value {
        Value::Record(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Merges two records side by side under `left`/`right` namespaces, the
    /// shape a join's combine function produces for its output payload.
    pub fn join_pair(left: Option<Value>, right: Option<Value>) -> Value {
        Value::Record(vec![
            ("left".to_string(), left.unwrap_or(Value::Null)),
            ("right".to_string(), right.unwrap_or(Value::Null)),
        ])
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort_by(|x, y| x.0.cmp(&y.0));
                b.sort_by(|x, y| x.0.cmp(&y.0));
                a == b
            }
            _ => false,
        }
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(items) => {
                for item in items {
                    item.hash(state);
                }
            }
            Value::Record(fields) => {
                let mut fields = fields.clone();
                fields.sort_by(|x, y| x.0.cmp(&y.0));
                for (k, v) in fields {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

/// Direction for one key in an `ORDER BY` list (`spec.md` §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Where NULLs sort for one key (`spec.md` §3, §6 "Order-by option surface").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// String comparison mode for one key (`spec.md` §3, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringCmp {
    /// Code-point order.
    Lexical,
    /// Locale comparator; this crate's default collation is "numeric"
    /// (`"a2" < "a10"`), matching the default named in `spec.md` §6.
    Locale,
}

/// One key of an `ORDER BY` list.
#[derive(Clone, Debug)]
pub struct OrderKey {
    pub direction: Direction,
    pub nulls: NullsOrder,
    pub string_cmp: StringCmp,
}

impl OrderKey {
    pub fn new(direction: Direction) -> Self {
        let nulls = match direction {
            Direction::Asc => NullsOrder::First,
            Direction::Desc => NullsOrder::Last,
        };
        OrderKey { direction, nulls, string_cmp: StringCmp::Locale }
    }

    pub fn with_nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = nulls;
        self
    }

    pub fn with_string_cmp(mut self, string_cmp: StringCmp) -> Self {
        self.string_cmp = string_cmp;
        self
    }
}

/// Compares two order-key values under one [`OrderKey`]'s semantics.
///
/// `spec.md` §4.E "Failure semantics": a value that cannot be totally ordered
/// against its peer (mismatched, non-comparable types) is treated as NULL for
/// ordering purposes rather than raising an error.
pub fn compare_values(a: &Value, b: &Value, spec: &OrderKey) -> Ordering {
    let a_null = is_unorderable(a);
    let b_null = is_unorderable(b);
    match (a_null, b_null) {
        (true, true) => Ordering::Equal,
        // Null placement is absolute — it names which end of the result set
        // nulls sit at, independent of whether the non-null values are
        // ascending or descending — so `direction` must not flip it.
        (true, false) => nulls_relative_order(spec.nulls, true),
        (false, true) => nulls_relative_order(spec.nulls, false),
        (false, false) => {
            let ordering = compare_comparable(a, b, spec.string_cmp);
            match spec.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        }
    }
}

fn nulls_relative_order(nulls: NullsOrder, a_is_null: bool) -> Ordering {
    match (nulls, a_is_null) {
        (NullsOrder::First, true) => Ordering::Less,
        (NullsOrder::First, false) => Ordering::Greater,
        (NullsOrder::Last, true) => Ordering::Greater,
        (NullsOrder::Last, false) => Ordering::Less,
    }
}

fn is_unorderable(v: &Value) -> bool {
    matches!(v, Value::Null) || matches!(v, Value::List(_)) || matches!(v, Value::Record(_))
}

fn compare_comparable(a: &Value, b: &Value, string_cmp: StringCmp) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => compare_strings(x, y, string_cmp),
        // Mismatched comparable types: no total order is defined. Treated as
        // equal rather than an error, consistent with the NULL-for-ordering
        // rule (`spec.md` §4.E); the row-key tiebreak resolves determinism.
        _ => Ordering::Equal,
    }
}

fn compare_strings(a: &str, b: &str, mode: StringCmp) -> Ordering {
    match mode {
        StringCmp::Lexical => a.cmp(b),
        StringCmp::Locale => numeric_collation(a, b),
    }
}

/// "numeric" locale collation: runs of ASCII digits compare by numeric value
/// rather than lexically, so `"a2" < "a10"` (`spec.md` §6 default).
fn numeric_collation(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek(), bi.peek()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                if x.is_ascii_digit() && y.is_ascii_digit() {
                    let a_num = take_digits(&mut ai);
                    let b_num = take_digits(&mut bi);
                    let by_value = a_num.len().cmp(&b_num.len()).then_with(|| a_num.cmp(&b_num));
                    if by_value != Ordering::Equal {
                        return by_value;
                    }
                } else {
                    let xc = *x;
                    let yc = *y;
                    ai.next();
                    bi.next();
                    if xc != yc {
                        return xc.cmp(&yc);
                    }
                }
            }
        }
    }
}

fn take_digits(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = iter.peek() {
        if c.is_ascii_digit() {
            out.push(*c);
            iter.next();
        } else {
            break;
        }
    }
    out
}
