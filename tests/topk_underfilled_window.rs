//! `spec.md` §8 scenario 2: `ORDER BY salary ASC OFFSET 1 LIMIT 10` over
//! only five employees — the window asks the driver for more rows than
//! exist, and the operator keeps requesting until an insert finally fills
//! the request or the source proves it has nothing left.

mod common;

use common::{employee, final_values, MutableCollection};
use fnv::FnvHashMap;
use live_view_engine::ir::{Direction, Expr, OrderByClause, QueryPlan};
use live_view_engine::source::SourceCollection;
use live_view_engine::{EngineConfig, Key, LiveQuery, RecordingSink, Value};

fn plan() -> QueryPlan {
    QueryPlan {
        from: "employees".to_string(),
        joins: vec![],
        where_clause: vec![],
        group_by: None,
        order_by: vec![OrderByClause { expr: Expr::Column("salary".to_string()), direction: Direction::Asc, nulls: None, string_cmp: None }],
        limit: Some(10),
        offset: Some(1),
        select: None,
    }
}

#[test]
fn underfilled_window_grows_as_rows_are_inserted() {
    let rows = vec![employee(1, "A", 50_000, 1), employee(2, "B", 60_000, 2), employee(3, "C", 55_000, 1), employee(4, "D", 65_000, 2), employee(5, "E", 52_000, 1)];
    let employees = MutableCollection::new("employees", rows);
    let mut sources: FnvHashMap<String, Box<dyn SourceCollection>> = FnvHashMap::default();
    sources.insert("employees".to_string(), Box::new(employees.clone()));

    let mut query = LiveQuery::new(&plan(), sources, &EngineConfig::default()).unwrap();
    let mut sink = RecordingSink::default();
    query.start(&mut sink).unwrap();

    assert_eq!(final_values(&sink, "salary"), vec![Value::Int(52_000), Value::Int(55_000), Value::Int(60_000), Value::Int(65_000)]);
    assert!(sink.ready, "an underfilled window with an exhausted source must still reach readiness");

    employees.insert(Key::Int(6), Value::record(vec![("name", Value::Str("G".to_string())), ("salary", Value::Int(72_000)), ("dept_id", Value::Int(1))]));
    query.poll(&mut sink).unwrap();

    assert_eq!(
        final_values(&sink, "salary"),
        vec![Value::Int(52_000), Value::Int(55_000), Value::Int(60_000), Value::Int(65_000), Value::Int(72_000)]
    );
}
