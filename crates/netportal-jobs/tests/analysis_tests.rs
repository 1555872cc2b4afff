//! Analysis tables built from dependent jobs, with spawned workers.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use netportal_core::TableId;
use netportal_jobs::prelude::*;
use netportal_test_utils::{
    assert_job_complete, assert_refcount, init_test_logging, wait_until_done, RowsExecutor,
    StoreFactory, ROWS,
};

const ANALYSIS: &str = "analysis";

fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog
        .insert(
            Table::new(TableId::new(1), "hosts", ROWS)
                .column(Column::new("host").key().text())
                .column(Column::new("bytes"))
                .criteria_default(DURATION, "1h"),
        )
        .unwrap();
    catalog
}

/// Joins per-host byte counts into a share of the total.
fn share(ctx: &AnalysisContext<'_>, inputs: &Inputs) -> anyhow::Result<Option<Frame>> {
    let hosts = inputs
        .get("hosts")
        .ok_or_else(|| anyhow::anyhow!("missing input"))?;
    let bytes: Vec<f64> = hosts
        .column("bytes")
        .unwrap_or_default()
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0))
        .collect();
    let total: f64 = bytes.iter().sum();
    if total <= 0.0 {
        return Ok(None);
    }
    ctx.mark_progress(50)?;

    let mut frame = Frame::new();
    frame.set_column("host", hosts.column("host").unwrap_or_default().to_vec())?;
    frame.set_column(
        "share",
        bytes.iter().map(|b| Value::Float(b / total)).collect(),
    )?;
    Ok(Some(frame))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn analysis_runs_its_inputs_first() {
    init_test_logging();
    let rows = RowsExecutor::new(vec![
        vec![Value::from("a"), Value::Int(10)],
        vec![Value::from("b"), Value::Int(30)],
        vec![Value::from("c"), Value::Int(60)],
    ]);
    let catalog = catalog();
    let analysis = AnalysisExecutor::new(share)
        .input_from(&catalog, "hosts", "hosts")
        .unwrap();
    let factory = StoreFactory::new().rows(rows.clone());
    let mut executors = factory.executors();
    executors.register(ANALYSIS, Arc::new(analysis));
    let store = JobStore::new(executors);

    let table = Arc::new(
        Table::new(TableId::new(2), "top_share", ANALYSIS)
            .column(Column::new("host").key().text())
            .column(Column::new("share"))
            .sort_by("share")
            .row_limit(2),
    );
    let criteria = Criteria::new().with(ENDTIME, "2024-01-01T12:00:00Z");
    let job = store.create(table, criteria).unwrap();
    job.start().await.unwrap();

    let record = wait_until_done(&job, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Complete, "{}", record.message);
    assert_eq!(
        job.values().unwrap(),
        vec![
            vec![Value::from("c"), Value::Float(0.6)],
            vec![Value::from("b"), Value::Float(0.3)],
        ]
    );
    assert_eq!(rows.calls(), 1);

    // the dependent ran with its own table's defaults and is released
    let dependent = store
        .jobs()
        .unwrap()
        .into_iter()
        .find(|r| r.table.name() == "hosts")
        .unwrap();
    assert_eq!(
        dependent.criteria.duration(),
        Some(chrono::Duration::hours(1))
    );
    let dependent = store.job(dependent.id);
    assert_job_complete(&dependent);
    assert_refcount(&dependent, 0);
}

#[test]
fn unknown_input_tables_are_rejected() {
    let err = AnalysisExecutor::new(share)
        .input_from(&catalog(), "hosts", "routers")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("routers"));
}
