//! Compiler: IR → graph (`spec.md` §4.F, component F).
//!
//! Walks a [`QueryPlan`] once, building a left-deep pipeline of joins over a
//! namespaced record (`{collectionId -> rawRow}`, accumulated one entry per
//! collection as it is joined in), flattens that namespace into one flat
//! row, then wires an optional `reduce`, an optional projection, and an
//! optional top-K over the flat row. Per-collection `WHERE` fragments are
//! applied immediately after that collection enters the pipeline, before it
//! can be joined against — the cheapest place to drop rows. There is
//! deliberately no cost-based join ordering or rewrite search (`spec.md` §1
//! Non-goals: "no query planning across multiple equivalent rewrites, no
//! cost-based optimizer"); joins are wired in the IR's `FROM … JOIN …` order.

use std::collections::BTreeSet;

use fnv::FnvHashMap;

use crate::config::EngineConfig;
use crate::error::{CompileError, EngineError, Result};
use crate::graph::{EdgeId, Graph, InputHandle, NodeId};
use crate::hashable::StructuralHash;
use crate::ir::{self, Expr, JoinKind as IrJoinKind, QueryPlan, ScopedExpr};
use crate::operators::join::{Join, JoinKind};
use crate::operators::map::Map;
use crate::operators::reduce::{AggregateSpec, Reduce};
use crate::operators::topk::{OrderBySpec, TopK};
use crate::operators::filter::Filter;
use crate::value::{Key, OrderKey, StringCmp, Value};

/// Recorded when a query is eligible for mode 3 (`spec.md` §4.G) — exactly
/// one source collection, no grouping, a pure-projection sort key, and a
/// `LIMIT`.
pub struct OrderByOptimization {
    pub collection: String,
    pub offset: usize,
    pub limit: usize,
    /// Compares two raw collection rows by the query's `ORDER BY` keys, in
    /// declared order (`spec.md` §4.F "comparator" in the optimizer record).
    /// Used by the subscription driver's mode 3 "drop above current max"
    /// rule (`spec.md` §4.G mode 3 step 2).
    pub compare: Box<dyn Fn(&Value, &Value) -> std::cmp::Ordering + Send>,
}

pub struct CompiledPipeline {
    pub graph: Graph,
    pub inputs: FnvHashMap<String, InputHandle>,
    pub collection_where_clauses: FnvHashMap<String, Option<Expr>>,
    pub lazy_collections: BTreeSet<String>,
    pub optimizable_order_by: Option<OrderByOptimization>,
    pub topk_node: Option<NodeId>,
}

pub struct Compiler;

impl Compiler {
    pub fn compile(plan: &QueryPlan, config: &EngineConfig) -> Result<CompiledPipeline> {
        if plan.limit.is_some() && plan.order_by.is_empty() {
            return Err(EngineError::Compile(CompileError::LimitWithoutOrderBy));
        }

        let mut all_collections: BTreeSet<String> = BTreeSet::new();
        all_collections.insert(plan.from.clone());
        for join in &plan.joins {
            all_collections.insert(join.collection.clone());
        }

        let collection_where_clauses = extract_pushdown(plan, &all_collections);

        let mut graph = Graph::new();
        let mut inputs: FnvHashMap<String, InputHandle> = FnvHashMap::default();
        for collection in &all_collections {
            inputs.insert(collection.clone(), graph.new_input());
        }

        let mut lazy_collections: BTreeSet<String> = BTreeSet::new();

        let from_edge = graph.input_edge(&inputs[&plan.from]);
        let mut current_edge = wrap_and_filter(&mut graph, from_edge, plan.from.clone(), collection_where_clauses[&plan.from].clone());

        for join in &plan.joins {
            let right_input_edge = graph.input_edge(&inputs[&join.collection]);
            let right_edge = wrap_and_filter(
                &mut graph,
                right_input_edge,
                join.collection.clone(),
                collection_where_clauses[&join.collection].clone(),
            );

            let kind = match join.kind {
                IrJoinKind::Inner => JoinKind::Inner,
                IrJoinKind::LeftOuter => JoinKind::LeftOuter,
                IrJoinKind::RightOuter => JoinKind::RightOuter,
                IrJoinKind::FullOuter => JoinKind::FullOuter,
                IrJoinKind::Cross => JoinKind::Cross,
            };
            let (left_key_expr, right_key_expr) = match &join.on {
                Some((l, r)) => (Some(l.clone()), Some(r.clone())),
                None => (None, None),
            };
            let left_key = move |v: &Value| -> Key {
                match &left_key_expr {
                    Some(expr) => value_to_key(&expr.eval_namespaced(v)),
                    None => Key::Int(0),
                }
            };
            let right_key = move |v: &Value| -> Key {
                match &right_key_expr {
                    Some(expr) => value_to_key(&expr.eval_namespaced(v)),
                    None => Key::Int(0),
                }
            };
            let join_node = graph.add_operator(Box::new(Join::new(kind, left_key, right_key, combine_namespaces)));
            graph.wire(current_edge, join_node, 0);
            graph.wire(right_edge, join_node, 1);
            current_edge = graph.output_edge(join_node);

            lazy_collections.insert(join.collection.clone());
        }

        // Flatten the per-collection namespace (`{collectionId -> row}`) into
        // one flat row before anything downstream runs: `GROUP BY`'s key and
        // aggregate expressions, like `ORDER BY`'s and `SELECT`'s, are plain
        // unscoped `Expr`s that name a field directly (`spec.md` §4.F) — only
        // `WHERE` and join-key expressions are namespace-scoped, and both
        // have already been evaluated above, in `wrap_and_filter`/the join
        // key closures. Flattening here, rather than after an optional
        // group-by, is what lets `GROUP BY`/aggregate expressions reference
        // a joined-in field by its plain name.
        let flatten_node = graph.add_operator(Box::new(Map::new(flatten_namespace)));
        graph.wire(current_edge, flatten_node, 0);
        current_edge = graph.output_edge(flatten_node);

        if let Some(group_by) = &plan.group_by {
            let key_expr = group_by.key.clone();
            let group_fn = move |v: &Value| value_to_key(&key_expr.eval(v));
            let aggregates: Vec<AggregateSpec> = group_by
                .aggregates
                .iter()
                .map(|agg| {
                    let arg = agg.arg.clone();
                    AggregateSpec {
                        output_field: agg.output_field.clone(),
                        kind: agg.kind,
                        extract: Box::new(move |v: &Value| arg.as_ref().and_then(|e| numeric(&e.eval(v)))),
                    }
                })
                .collect();
            let reduce_node = graph.add_operator(Box::new(Reduce::new(group_fn, group_by.key_field.clone(), aggregates)));
            graph.wire(current_edge, reduce_node, 0);
            current_edge = graph.output_edge(reduce_node);
        }

        if let Some(fields) = &plan.select {
            let fields = fields.clone();
            let project_node = graph.add_operator(Box::new(Map::new(move |v: &Value| {
                Value::Record(fields.iter().map(|f| (f.output_field.clone(), f.expr.eval(v))).collect())
            })));
            graph.wire(current_edge, project_node, 0);
            current_edge = graph.output_edge(project_node);
        }

        let mut topk_node = None;
        if !plan.order_by.is_empty() {
            let specs: Vec<OrderBySpec> = build_order_key_specs(plan)
                .into_iter()
                .map(|(expr, key)| OrderBySpec { extract: Box::new(move |v: &Value| expr.eval(v)), key })
                .collect();
            let offset = plan.offset.unwrap_or(0);
            let limit = plan.limit.unwrap_or(usize::MAX);
            let node = graph.add_operator(Box::new(TopK::new(
                specs,
                offset,
                limit,
                config.fractional_index_alphabet.clone(),
                config.fractional_index_rebalance_threshold,
            )));
            graph.wire(current_edge, node, 0);
            current_edge = graph.output_edge(node);
            topk_node = Some(node);
        }

        graph.wire_to_sink(current_edge);
        graph.finalize();

        let optimizable_order_by = order_by_optimization(plan);

        Ok(CompiledPipeline { graph, inputs, collection_where_clauses, lazy_collections, optimizable_order_by, topk_node })
    }
}

fn extract_pushdown(plan: &QueryPlan, collections: &BTreeSet<String>) -> FnvHashMap<String, Option<Expr>> {
    let mut out: FnvHashMap<String, Option<Expr>> = FnvHashMap::default();
    for collection in collections {
        out.insert(collection.clone(), None);
    }
    for scoped in &plan.where_clause {
        let slot = out.entry(scoped.collection.clone()).or_insert(None);
        *slot = Some(match slot.take() {
            Some(existing) => Expr::And(Box::new(existing), Box::new(scoped.expr.clone())),
            None => scoped.expr.clone(),
        });
    }
    out
}

fn wrap_and_filter(graph: &mut Graph, source: EdgeId, collection: String, pushdown: Option<Expr>) -> EdgeId {
    let wrap_collection = collection.clone();
    let wrap_node = graph.add_operator(Box::new(Map::new(move |v: &Value| Value::Record(vec![(wrap_collection.clone(), v.clone())]))));
    graph.wire(source, wrap_node, 0);
    let mut edge = graph.output_edge(wrap_node);

    if let Some(expr) = pushdown {
        let scoped = ScopedExpr { collection, expr };
        let filter_node = graph.add_operator(Box::new(Filter::new(move |v: &Value| scoped.eval_namespaced(v) == Value::Bool(true))));
        graph.wire(edge, filter_node, 0);
        edge = graph.output_edge(filter_node);
    }
    edge
}

fn combine_namespaces(left: Option<&Value>, right: Option<&Value>) -> Value {
    let mut fields = Vec::new();
    if let Some(Value::Record(lf)) = left {
        fields.extend(lf.clone());
    }
    if let Some(Value::Record(rf)) = right {
        fields.extend(rf.clone());
    }
    Value::Record(fields)
}

fn flatten_namespace(v: &Value) -> Value {
    match v {
        Value::Record(fields) => {
            let mut out: Vec<(String, Value)> = Vec::new();
            for (_, sub) in fields {
                if let Value::Record(sub_fields) = sub {
                    for (k, vv) in sub_fields {
                        if let Some(existing) = out.iter_mut().find(|(ek, _)| ek == k) {
                            existing.1 = vv.clone();
                        } else {
                            out.push((k.clone(), vv.clone()));
                        }
                    }
                }
            }
            Value::Record(out)
        }
        other => other.clone(),
    }
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Join keys and group keys must collapse onto [`Key`]; primitives map
/// directly, anything else is hashed structurally (`spec.md` §4.D "composite
/// encoded via the structural hash utility").
fn value_to_key(v: &Value) -> Key {
    match v {
        Value::Int(i) => Key::Int(*i),
        Value::Str(s) => Key::Str(s.clone()),
        other => Key::Str(format!("{:016x}", other.structural_hash())),
    }
}

/// Builds the `(expression, comparator)` pair for each declared `ORDER BY`
/// key, shared between the top-K operator's specs and the mode-3 optimizer
/// record's row comparator.
fn build_order_key_specs(plan: &QueryPlan) -> Vec<(Expr, OrderKey)> {
    plan.order_by
        .iter()
        .map(|ob| {
            let mut key = OrderKey::new(ob.direction);
            if let Some(nulls) = ob.nulls {
                key = key.with_nulls(nulls);
            }
            key = key.with_string_cmp(ob.string_cmp.unwrap_or(StringCmp::Locale));
            (ob.expr.clone(), key)
        })
        .collect()
}

fn order_by_optimization(plan: &QueryPlan) -> Option<OrderByOptimization> {
    if !plan.joins.is_empty() || plan.group_by.is_some() || plan.order_by.is_empty() {
        return None;
    }
    let Some(limit) = plan.limit else { return None };
    let pure_projection = plan.order_by.iter().all(|ob| matches!(ob.expr, ir::Expr::Column(_)));
    if !pure_projection {
        return None;
    }
    let specs = build_order_key_specs(plan);
    let compare = Box::new(move |a: &Value, b: &Value| {
        for (expr, key) in &specs {
            let ordering = crate::value::compare_values(&expr.eval(a), &expr.eval(b), key);
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    Some(OrderByOptimization { collection: plan.from.clone(), offset: plan.offset.unwrap_or(0), limit, compare })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JoinClause, OrderByClause, ProjectionField};
    use crate::value::Direction;

    fn simple_plan() -> QueryPlan {
        QueryPlan {
            from: "employees".to_string(),
            joins: vec![],
            where_clause: vec![],
            group_by: None,
            order_by: vec![OrderByClause { expr: Expr::Column("salary".to_string()), direction: Direction::Desc, nulls: None, string_cmp: None }],
            limit: Some(2),
            offset: Some(1),
            select: None,
        }
    }

    #[test]
    fn rejects_limit_without_order_by() {
        let mut plan = simple_plan();
        plan.order_by.clear();
        let err = Compiler::compile(&plan, &EngineConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn single_collection_order_by_is_optimizable() {
        let plan = simple_plan();
        let compiled = Compiler::compile(&plan, &EngineConfig::default()).unwrap();
        let opt = compiled.optimizable_order_by.unwrap();
        assert_eq!(opt.collection, "employees");
        assert_eq!(opt.offset, 1);
        assert_eq!(opt.limit, 2);
        assert!(compiled.topk_node.is_some());
    }

    #[test]
    fn join_marks_inner_collection_lazy() {
        let mut plan = simple_plan();
        plan.joins.push(JoinClause {
            collection: "departments".to_string(),
            kind: IrJoinKind::Inner,
            on: Some((
                ScopedExpr { collection: "employees".to_string(), expr: Expr::Column("dept_id".to_string()) },
                ScopedExpr { collection: "departments".to_string(), expr: Expr::Column("id".to_string()) },
            )),
        });
        plan.select = Some(vec![
            ProjectionField { output_field: "name".to_string(), expr: Expr::Column("name".to_string()) },
            ProjectionField { output_field: "salary".to_string(), expr: Expr::Column("salary".to_string()) },
        ]);
        let compiled = Compiler::compile(&plan, &EngineConfig::default()).unwrap();
        assert!(compiled.lazy_collections.contains("departments"));
        assert!(compiled.optimizable_order_by.is_none(), "joins disqualify mode 3");
    }

    /// `spec.md` §8 scenario 5: `GROUP BY vin ORDER BY max(t) DESC LIMIT 10`
    /// needs the namespace flattened before `reduce` runs, or `vin`/`t`
    /// would never resolve against the still-namespaced row.
    #[test]
    fn group_by_key_resolves_against_the_flattened_row() {
        use crate::ir::{AggregateDef, GroupByClause};
        use crate::operators::reduce::AggKind;

        let plan = QueryPlan {
            from: "vehicle_docs".to_string(),
            joins: vec![],
            where_clause: vec![],
            group_by: Some(GroupByClause {
                key: Expr::Column("vin".to_string()),
                key_field: "vin".to_string(),
                aggregates: vec![AggregateDef { output_field: "t".to_string(), kind: AggKind::Max, arg: Some(Expr::Column("t".to_string())) }],
            }),
            order_by: vec![OrderByClause { expr: Expr::Column("t".to_string()), direction: Direction::Desc, nulls: None, string_cmp: None }],
            limit: Some(10),
            offset: None,
            select: None,
        };
        let mut compiled = Compiler::compile(&plan, &EngineConfig::default()).unwrap();

        let mut batch = crate::collection::Batch::new();
        let doc = |id: i64, vin: i64, t: i64| Value::record(vec![("vin", Value::Int(vin)), ("t", Value::Int(t))]);
        batch.push(Key::Int(1), crate::collection::Payload::new(doc(1, 1, 1)), 1);
        batch.push(Key::Int(2), crate::collection::Payload::new(doc(2, 2, 2)), 1);
        batch.push(Key::Int(3), crate::collection::Payload::new(doc(3, 1, 5)), 1);
        compiled.graph.send_data(&compiled.inputs[&plan.from], batch);
        compiled.graph.run();
        let out = compiled.graph.drain_sink();

        let mut seen: std::collections::HashMap<Key, Value> = std::collections::HashMap::new();
        for b in out {
            for ((key, payload), mult) in b.tuples {
                if mult > 0 {
                    seen.insert(key, payload.value);
                }
            }
        }
        let vin1 = seen.values().find(|v| v.get("vin") == Some(&Value::Int(1))).unwrap();
        assert_eq!(vin1.get("t"), Some(&Value::Int(5)), "max(t) over vin=1 rows {{t:1}} and {{t:5}} is 5, not null");
    }
}
