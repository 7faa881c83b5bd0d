//! Randomized interleaving of insert/update/delete batches against an
//! `ORDER BY ... OFFSET ... LIMIT ...` query, checking `spec.md` §3's I3
//! (fractional-index order agrees with the order-by comparator) and I4
//! (the materialized set is exactly the rows ranked `[offset, offset+limit)`)
//! after every batch — the "many small deltas, still correct" coverage that
//! a handful of scripted scenarios can't give.

mod common;

use std::collections::HashMap;

use fnv::FnvHashMap;
use live_view_engine::ir::{Direction, Expr, OrderByClause, QueryPlan};
use live_view_engine::source::SourceCollection;
use live_view_engine::{EngineConfig, Key, LiveQuery, RecordingSink, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn plan(offset: usize, limit: usize) -> QueryPlan {
    QueryPlan {
        from: "employees".to_string(),
        joins: vec![],
        where_clause: vec![],
        group_by: None,
        order_by: vec![OrderByClause { expr: Expr::Column("salary".to_string()), direction: Direction::Desc, nulls: None, string_cmp: None }],
        limit: Some(limit),
        offset: Some(offset),
        select: None,
    }
}

fn expected_window(model: &HashMap<i64, i64>, offset: usize, limit: usize) -> Vec<i64> {
    let mut ids: Vec<i64> = model.keys().copied().collect();
    ids.sort_by(|a, b| model[b].cmp(&model[a]).then(a.cmp(b)));
    ids.into_iter().skip(offset).take(limit).collect()
}

#[test]
fn random_insert_update_delete_interleaving_preserves_topk_invariants() {
    let offset = 2;
    let limit = 3;
    let mut model: HashMap<i64, i64> = HashMap::new();
    let mut next_id = 1i64;
    let mut rng = StdRng::seed_from_u64(0xA11CE);

    let seed_count = rng.gen_range(4..8);
    let mut initial_rows = Vec::new();
    for _ in 0..seed_count {
        let id = next_id;
        next_id += 1;
        let salary = rng.gen_range(10_000..100_000);
        model.insert(id, salary);
        initial_rows.push((Key::Int(id), Value::record(vec![("salary", Value::Int(salary))])));
    }

    let employees = common::MutableCollection::new("employees", initial_rows);
    let mut sources: FnvHashMap<String, Box<dyn SourceCollection>> = FnvHashMap::default();
    sources.insert("employees".to_string(), Box::new(employees.clone()));

    let mut query = LiveQuery::new(&plan(offset, limit), sources, &EngineConfig::default()).unwrap();
    let mut sink = RecordingSink::default();
    query.start(&mut sink).unwrap();
    check_invariants(&query, &sink, &model, offset, limit);

    for _ in 0..60 {
        let op = rng.gen_range(0..3);
        let live_ids: Vec<i64> = model.keys().copied().collect();
        match op {
            0 => {
                let id = next_id;
                next_id += 1;
                let salary = rng.gen_range(10_000..100_000);
                model.insert(id, salary);
                employees.insert(Key::Int(id), Value::record(vec![("salary", Value::Int(salary))]));
            }
            1 if !live_ids.is_empty() => {
                let id = live_ids[rng.gen_range(0..live_ids.len())];
                let salary = rng.gen_range(10_000..100_000);
                model.insert(id, salary);
                employees.update(Key::Int(id), Value::record(vec![("salary", Value::Int(salary))]));
            }
            2 if live_ids.len() > 1 => {
                let id = live_ids[rng.gen_range(0..live_ids.len())];
                model.remove(&id);
                employees.delete(Key::Int(id));
            }
            _ => continue,
        }
        query.poll(&mut sink).unwrap();
        check_invariants(&query, &sink, &model, offset, limit);
    }
}

fn check_invariants(query: &LiveQuery, sink: &RecordingSink, model: &HashMap<i64, i64>, offset: usize, limit: usize) {
    let rows = common::final_rows(sink);
    let mut present: Vec<i64> = rows
        .iter()
        .map(|(k, _)| match k {
            Key::Int(i) => *i,
            _ => unreachable!(),
        })
        .collect();
    present.sort();

    let mut expected = expected_window(model, offset, limit);
    expected.sort();
    assert_eq!(present, expected, "I4: materialized set must equal exactly the rows ranked [offset, offset+limit)");

    // I3: fractional-index order must agree with the salary-desc comparator.
    let mut by_rank: Vec<(Key, i64)> = rows
        .iter()
        .map(|(k, v)| match (k, v.get("salary")) {
            (key, Some(Value::Int(s))) => (key.clone(), *s),
            _ => unreachable!(),
        })
        .collect();
    by_rank.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for pair in by_rank.windows(2) {
        let (k1, _) = &pair[0];
        let (k2, _) = &pair[1];
        assert_ne!(query.compare(k1, k2), std::cmp::Ordering::Greater, "fractional-index order must not contradict the order-by comparator");
    }
}
