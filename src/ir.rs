//! Query IR (`spec.md` §4.F, component F) — the pre-built plan the compiler
//! consumes. Building this from a surface query language is explicitly out
//! of scope (`spec.md` §1 "Out of scope: the surface query builder / IR data
//! types"); this module only defines the shape the compiler walks.
//!
//! Expressions come in two flavors. [`Expr`] evaluates against a single row
//! (a source collection's raw value, or the pipeline's current combined
//! value) and is what `SELECT`, `GROUP BY`, and `ORDER BY` use. [`ScopedExpr`]
//! pairs an `Expr` with the collection it is evaluated against, which is what
//! `WHERE` fragments and join keys need — they must name which collection's
//! row they read before the compiler has wired anything together.

use crate::value::{Direction, NullsOrder, StringCmp, Value};

/// A single-row expression: column projection, literals, comparisons, and the
/// aggregate-free boolean combinators named in `spec.md` §6's WHERE-pushdown
/// description.
#[derive(Clone, Debug)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Eq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn eval(&self, row: &Value) -> Value {
        match self {
            Expr::Column(field) => row.get(field).cloned().unwrap_or(Value::Null),
            Expr::Literal(v) => v.clone(),
            Expr::Eq(a, b) => Value::Bool(a.eval(row) == b.eval(row)),
            Expr::Lt(a, b) => Value::Bool(order_eval(a, b, row) == std::cmp::Ordering::Less),
            Expr::Lte(a, b) => Value::Bool(order_eval(a, b, row) != std::cmp::Ordering::Greater),
            Expr::Gt(a, b) => Value::Bool(order_eval(a, b, row) == std::cmp::Ordering::Greater),
            Expr::Gte(a, b) => Value::Bool(order_eval(a, b, row) != std::cmp::Ordering::Less),
            Expr::And(a, b) => Value::Bool(as_bool(&a.eval(row)) && as_bool(&b.eval(row))),
            Expr::Or(a, b) => Value::Bool(as_bool(&a.eval(row)) || as_bool(&b.eval(row))),
            Expr::Not(a) => Value::Bool(!as_bool(&a.eval(row))),
        }
    }

    /// Evaluates as a `filter` predicate (`spec.md` §4.C `filter(p)`).
    pub fn eval_bool(&self, row: &Value) -> bool {
        as_bool(&self.eval(row))
    }
}

fn as_bool(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn order_eval(a: &Expr, b: &Expr, row: &Value) -> std::cmp::Ordering {
    use crate::value::{compare_values, OrderKey};
    compare_values(&a.eval(row), &b.eval(row), &OrderKey::new(Direction::Asc).with_string_cmp(StringCmp::Lexical))
}

/// An [`Expr`] paired with the one collection it is evaluated against —
/// `spec.md` §4.F's "free variables reference only that collection".
#[derive(Clone, Debug)]
pub struct ScopedExpr {
    pub collection: String,
    pub expr: Expr,
}

impl ScopedExpr {
    /// Evaluates against a namespaced record (`collection id -> row`), the
    /// shape the compiler threads through the graph once more than one
    /// collection is in play.
    pub fn eval_namespaced(&self, namespace: &Value) -> Value {
        let row = namespace.get(&self.collection).cloned().unwrap_or(Value::Null);
        self.expr.eval(&row)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
}

pub struct JoinClause {
    pub collection: String,
    pub kind: JoinKind,
    /// `None` for `Cross` (`spec.md` §4.D: "cross" ignores join keys).
    pub on: Option<(ScopedExpr, ScopedExpr)>,
}

pub struct GroupByClause {
    pub key: Expr,
    /// Output field name the group key is materialized under, e.g. `"vin"`
    /// in `spec.md` §8 scenario 5.
    pub key_field: String,
    pub aggregates: Vec<AggregateDef>,
}

pub struct AggregateDef {
    pub output_field: String,
    pub kind: crate::operators::reduce::AggKind,
    /// `None` for `count(*)`.
    pub arg: Option<Expr>,
}

pub struct OrderByClause {
    pub expr: Expr,
    pub direction: Direction,
    pub nulls: Option<NullsOrder>,
    pub string_cmp: Option<StringCmp>,
}

/// The projection applied at the end of the pipeline, before `ORDER BY`.
pub struct ProjectionField {
    pub output_field: String,
    pub expr: Expr,
}

/// The full pre-built plan (`spec.md` §4.F).
pub struct QueryPlan {
    pub from: String,
    pub joins: Vec<JoinClause>,
    /// Already-scoped `WHERE` conjuncts; cross-collection conditions belong
    /// on the relevant `JoinClause.on` instead (`spec.md` §4.D restricts
    /// `join` to equi-joins, so there is no other place for them).
    pub where_clause: Vec<ScopedExpr>,
    pub group_by: Option<GroupByClause>,
    pub order_by: Vec<OrderByClause>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// `None` selects the natural flattening of every joined collection's
    /// fields (last-write-wins on name collision).
    pub select: Option<Vec<ProjectionField>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_missing_field_is_null() {
        let row = Value::record(vec![("a", Value::Int(1))]);
        assert_eq!(Expr::Column("b".to_string()).eval(&row), Value::Null);
    }

    #[test]
    fn boolean_combinators() {
        let row = Value::record(vec![("a", Value::Int(5))]);
        let expr = Expr::And(
            Box::new(Expr::Gt(Box::new(Expr::Column("a".to_string())), Box::new(Expr::Literal(Value::Int(1))))),
            Box::new(Expr::Lt(Box::new(Expr::Column("a".to_string())), Box::new(Expr::Literal(Value::Int(10))))),
        );
        assert!(expr.eval_bool(&row));
    }
}
