//! Criteria resolution and time reconciliation through the public API.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use netportal_core::TableId;
use netportal_jobs::prelude::*;
use netportal_jobs::resolver::RawValues;
use netportal_test_utils::{StoreFactory, EMPTY};
use proptest::prelude::*;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn raw(pairs: &[(&str, &str)]) -> RawValues {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
        .collect()
}

fn daily_table() -> Arc<Table> {
    Arc::new(
        Table::new(TableId::new(7), "daily", EMPTY)
            .column(Column::time("time"))
            .column(Column::new("bytes"))
            .criteria_default(DURATION, "1 day"),
    )
}

#[test]
fn endtime_and_duration_give_starttime() {
    let criteria = Criteria::new()
        .with(ENDTIME, "2013-12-01T11:00:00Z")
        .with(DURATION, "5min");
    let built = criteria.build_for_table(&daily_table()).unwrap();

    assert_eq!(built.starttime(), Some(ts("2013-12-01T10:55:00Z")));
    assert_eq!(built.endtime(), Some(ts("2013-12-01T11:00:00Z")));
    assert_eq!(built.duration(), Some(chrono::Duration::minutes(5)));
}

#[test]
fn table_default_duration_fills_the_gap() {
    let criteria = Criteria::new().with(ENDTIME, "2013-12-01T11:00:00Z");
    let built = criteria.build_for_table(&daily_table()).unwrap();
    assert_eq!(built.starttime(), Some(ts("2013-11-30T11:00:00Z")));
}

#[test]
fn created_jobs_carry_reconciled_times() {
    let store = StoreFactory::new().inline().build();
    let job = store
        .create(
            daily_table(),
            Criteria::new()
                .with(ENDTIME, "2013-12-01T11:00:00Z")
                .with(DURATION, "5min"),
        )
        .unwrap();
    let criteria = job.criteria().unwrap();
    assert_eq!(criteria.starttime(), Some(ts("2013-12-01T10:55:00Z")));
}

#[test]
fn derived_fields_resolve_from_parents() {
    let sum = |a: &str, b: &str| {
        PostProcessHook::new("sum", |field, criteria, params| {
            let total = params
                .values()
                .filter_map(Value::as_str)
                .map(|key| match criteria.get(key) {
                    Some(Value::Int(v)) => Ok(*v),
                    other => Err(anyhow::anyhow!("{key} is not an integer: {other:?}")),
                })
                .sum::<anyhow::Result<i64>>()?;
            criteria.set(field.keyword(), total);
            Ok(())
        })
        .param("a", a)
        .param("b", b)
    };

    let resolver = Resolver::new([
        Field::new("wx").parents(["w", "x"]).post_process(sum("w", "x")),
        Field::new("wy").parents(["w", "y"]).post_process(sum("w", "y")),
        Field::new("label")
            .parents(["wx", "wy"])
            .template("{wx}/{wy}"),
        Field::new("w").kind(FieldKind::Integer),
        Field::new("x").kind(FieldKind::Integer),
        Field::new("y").kind(FieldKind::Integer),
    ])
    .unwrap();

    let criteria = resolver
        .resolve(&raw(&[("w", "1"), ("x", "2"), ("y", "5"), (IGNORE_CACHE, "true")]))
        .unwrap();
    assert_eq!(criteria.get("wx"), Some(&Value::Int(3)));
    assert_eq!(criteria.get("wy"), Some(&Value::Int(6)));
    assert_eq!(criteria.get("label"), Some(&Value::from("3/6")));
    assert!(criteria.ignore_cache());
}

#[test]
fn resolution_errors_name_the_field() {
    let resolver = Resolver::new([
        Field::new("host").required(),
        Field::new("port").kind(FieldKind::Integer),
    ])
    .unwrap();

    let err = resolver.resolve(&raw(&[("port", "80")])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(err.to_string().contains("host"));

    let err = resolver
        .resolve(&raw(&[("host", "a"), ("port", "eighty")]))
        .unwrap_err();
    assert!(err.to_string().contains("port"));
}

/// Generates an acyclic parent map: field `i` may only depend on fields
/// with a smaller index.
fn arb_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        (0..n)
            .map(|i| proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i.min(3)))
            .collect::<Vec<_>>()
    })
}

fn fields_for(dag: &[Vec<usize>], order: &[usize]) -> Vec<Field> {
    order
        .iter()
        .map(|&i| Field::new(format!("f{i}")).parents(dag[i].iter().map(|p| format!("f{p}"))))
        .collect()
}

proptest! {
    #[test]
    fn order_puts_parents_first(
        (dag, order) in arb_dag().prop_flat_map(|dag| {
            let n = dag.len();
            (Just(dag), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        let resolver = Resolver::new(fields_for(&dag, &order)).unwrap();
        let resolved = resolver.order().unwrap();
        prop_assert_eq!(resolved.len(), dag.len());

        let position: HashMap<&str, usize> = resolved
            .iter()
            .enumerate()
            .map(|(pos, k)| (k.as_str(), pos))
            .collect();
        for (i, parents) in dag.iter().enumerate() {
            let child = position[format!("f{i}").as_str()];
            for p in parents {
                let parent_pos = position[format!("f{p}").as_str()];
                prop_assert!(parent_pos < child);
            }
        }

        // fields with no parents keep declaration order
        let roots: Vec<&String> = resolved
            .iter()
            .filter(|k| resolver.field(k).unwrap().parent_keywords().is_empty())
            .collect();
        let declared: Vec<String> = order
            .iter()
            .filter(|&&i| dag[i].is_empty())
            .map(|i| format!("f{i}"))
            .collect();
        prop_assert_eq!(roots, declared.iter().collect::<Vec<_>>());
    }

    #[test]
    fn closing_a_chain_is_a_cycle(len in 2usize..8) {
        let fields: Vec<Field> = (0..len)
            .map(|i| Field::new(format!("c{i}")).parents([format!("c{}", (i + 1) % len)]))
            .collect();
        let resolver = Resolver::new(fields).unwrap();
        match resolver.order() {
            Err(Error::CircularDependency { cycle, .. }) => prop_assert_eq!(cycle.len(), len),
            other => prop_assert!(false, "expected a cycle, got {:?}", other),
        }
    }
}

#[test]
fn extra_keys_change_the_handle() {
    let table = daily_table();
    let base = Criteria::new().with(ENDTIME, "2013-12-01T11:00:00Z");
    let a = base.build_for_table(&table).unwrap();
    let b = base.with("device", "r1").build_for_table(&table).unwrap();
    assert_eq!(
        compute_handle(&table, &a).unwrap(),
        compute_handle(&table, &a.clone()).unwrap()
    );
    assert_ne!(
        compute_handle(&table, &a).unwrap(),
        compute_handle(&table, &b).unwrap()
    );
}
