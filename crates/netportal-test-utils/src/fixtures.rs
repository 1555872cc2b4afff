//! Factories for tables, stores and scripted query executors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use netportal_core::{JobId, TableId};
use netportal_jobs::prelude::*;

/// Executor ID of [`RowsExecutor`] in stores built by [`StoreFactory`].
pub const ROWS: &str = "rows";

/// Executor ID of [`TrackingExecutor`] in stores built by [`StoreFactory`].
pub const TRACKING: &str = "tracking";

/// Executor ID of [`EmptyExecutor`] in stores built by [`StoreFactory`].
pub const EMPTY: &str = "empty";

/// Executor ID of a [`FailingExecutor`] in stores built by [`StoreFactory`].
pub const FAILING: &str = "failing";

/// Executor ID of the [`PooledExecutor`] in stores built by [`StoreFactory`].
pub const DEVICES: &str = "devices";

/// Returns a fixed UTC timestamp for deterministic tests.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

/// A time-series table with `time`, `host` and `bytes` columns.
pub fn traffic_table(id: u64) -> Arc<Table> {
    Arc::new(traffic(id, ROWS))
}

/// Like [`traffic_table`] but backed by the executor `executor`.
pub fn traffic(id: u64, executor: &str) -> Table {
    Table::new(TableId::new(id), format!("traffic_{id}"), executor)
        .column(Column::time("time"))
        .column(Column::new("host").key().text())
        .column(Column::new("bytes").resample(ResampleOp::Sum))
}

/// A table with one numeric column run by `executor`.
pub fn simple_table(id: u64, executor: &str) -> Arc<Table> {
    Arc::new(Table::new(TableId::new(id), format!("simple_{id}"), executor).column(Column::new("v")))
}

/// Returns an executor that always produces the same rows.
#[derive(Debug, Clone, Default)]
pub struct RowsExecutor {
    rows: Vec<Vec<Value>>,
    calls: Arc<AtomicUsize>,
}

impl RowsExecutor {
    /// Creates an executor returning `rows`.
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns how many times the executor ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for RowsExecutor {
    async fn run(&self, _table: &Table, _job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(QueryOutcome::rows(self.rows.clone()))
    }
}

/// An executor that sleeps, reports progress and records how many of its
/// runs overlapped.
#[derive(Debug, Clone)]
pub struct TrackingExecutor {
    delay: Duration,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    finished: Arc<Mutex<Vec<JobId>>>,
}

impl TrackingExecutor {
    /// Creates an executor that takes `delay` per run.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Highest number of runs observed at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Jobs whose runs finished, in completion order.
    pub fn finished(&self) -> Vec<JobId> {
        self.finished.lock().expect("lock").clone()
    }
}

#[async_trait]
impl QueryExecutor for TrackingExecutor {
    async fn run(&self, _table: &Table, job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let half = self.delay / 2;
        tokio::time::sleep(half).await;
        let progress = job.mark_progress(50, None);
        tokio::time::sleep(self.delay - half).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().expect("lock").push(job.id());
        progress?;
        Ok(QueryOutcome::rows(vec![vec![Value::Int(1)]]))
    }
}

/// A fake device session. Devices whose id starts with `down` refuse to
/// connect.
#[derive(Debug)]
pub struct DeviceSession {
    /// Device id.
    pub device: String,
    /// Connections opened before this one, across the pool.
    pub serial: usize,
}

/// A pool of [`DeviceSession`]s that counts how many it opened.
pub fn device_pool() -> Arc<ConnectionPool<DeviceSession>> {
    let opened = AtomicUsize::new(0);
    Arc::new(ConnectionPool::new(move |device| {
        if device.starts_with("down") {
            anyhow::bail!("{device} is not answering");
        }
        Ok(DeviceSession {
            device: device.to_string(),
            serial: opened.fetch_add(1, Ordering::SeqCst),
        })
    }))
}

/// A device table with `device` and `serial` columns, run by [`DEVICES`].
pub fn device_table(id: u64) -> Arc<Table> {
    Arc::new(
        Table::new(TableId::new(id), format!("sessions_{id}"), DEVICES)
            .column(Column::new(DEVICE).key().text())
            .column(Column::new("serial")),
    )
}

/// Builds job stores with the standard test executors registered.
#[derive(Debug, Clone)]
pub struct StoreFactory {
    config: JobStoreConfig,
    rows: RowsExecutor,
    tracking: TrackingExecutor,
    pool: Arc<ConnectionPool<DeviceSession>>,
}

impl Default for StoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreFactory {
    /// Creates a factory with default configuration, an empty
    /// [`RowsExecutor`] and a 20 ms [`TrackingExecutor`].
    pub fn new() -> Self {
        Self {
            config: JobStoreConfig::default(),
            rows: RowsExecutor::default(),
            tracking: TrackingExecutor::new(Duration::from_millis(20)),
            pool: device_pool(),
        }
    }

    /// Runs workers inline.
    #[must_use]
    pub fn inline(mut self) -> Self {
        self.config = self.config.inline();
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: JobStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `rows` as the [`ROWS`] executor.
    #[must_use]
    pub fn rows(mut self, rows: RowsExecutor) -> Self {
        self.rows = rows;
        self
    }

    /// Uses `tracking` as the [`TRACKING`] executor.
    #[must_use]
    pub fn tracking(mut self, tracking: TrackingExecutor) -> Self {
        self.tracking = tracking;
        self
    }

    /// Shares `pool` with the [`DEVICES`] executor.
    #[must_use]
    pub fn pool(mut self, pool: Arc<ConnectionPool<DeviceSession>>) -> Self {
        self.pool = pool;
        self
    }

    /// Returns the registry the store will use.
    pub fn executors(&self) -> ExecutorRegistry {
        let devices = PooledExecutor::new(Arc::clone(&self.pool), |session: &DeviceSession, _, _| {
            Ok(QueryOutcome::rows(vec![vec![
                Value::from(session.device.as_str()),
                Value::Int(i64::try_from(session.serial)?),
            ]]))
        });
        ExecutorRegistry::new()
            .with(ROWS, self.rows.clone())
            .with(TRACKING, self.tracking.clone())
            .with(EMPTY, EmptyExecutor)
            .with(FAILING, FailingExecutor::new("device offline"))
            .with(DEVICES, devices)
    }

    /// Builds the store.
    pub fn build(self) -> JobStore {
        JobStore::with_config(self.executors(), self.config).expect("valid store config")
    }
}
