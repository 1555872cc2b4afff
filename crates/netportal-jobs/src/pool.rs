//! Lazily created, shared connections keyed by device.
//!
//! Query executors receive a pool at construction and ask it for a
//! connection per device. The first request for a device builds the
//! connection with the pool's factory; later requests share it until the
//! entry is cleared. [`PooledExecutor`] is the stock executor built this
//! way: it picks the device from a criterion and runs a query function
//! against the pooled connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::executor::{ExecutorError, QueryExecutor, QueryOutcome};
use crate::store::Job;
use crate::table::Table;
use crate::value::Value;

/// Criterion naming the device a [`PooledExecutor`] queries by default.
pub const DEVICE: &str = "device";

/// Builds a connection for a device id.
pub type ConnectionFactory<C> = dyn Fn(&str) -> anyhow::Result<C> + Send + Sync;

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("connection pool lock poisoned")
}

/// A pool of connections keyed by device id.
pub struct ConnectionPool<C> {
    connections: Mutex<HashMap<String, Arc<C>>>,
    factory: Box<ConnectionFactory<C>>,
}

impl<C> ConnectionPool<C> {
    /// Creates an empty pool that builds connections with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<C> + Send + Sync + 'static,
    {
        Self {
            connections: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Returns the connection for `device`, creating it on first use.
    ///
    /// The pool lock is held while the factory runs, so concurrent first
    /// requests for the same device build one connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`] if the factory fails.
    pub fn get(&self, device: &str) -> Result<Arc<C>> {
        let mut connections = self.connections.lock().map_err(poison_err)?;
        if let Some(conn) = connections.get(device) {
            return Ok(Arc::clone(conn));
        }
        let conn = (self.factory)(device).map_err(|e| Error::Executor {
            message: format!("cannot connect to '{device}': {e:#}"),
        })?;
        let conn = Arc::new(conn);
        connections.insert(device.to_string(), Arc::clone(&conn));
        info!(device, "opened device connection");
        Ok(conn)
    }

    /// Drops the connection for `device`, or every connection when `None`.
    /// Callers already holding a connection keep it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn clear(&self, device: Option<&str>) -> Result<()> {
        let mut connections = self.connections.lock().map_err(poison_err)?;
        match device {
            Some(device) => {
                connections.remove(device);
                debug!(device, "cleared device connection");
            }
            None => {
                connections.clear();
                debug!("cleared all device connections");
            }
        }
        Ok(())
    }

    /// Returns the number of open connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.connections.lock().map_err(poison_err)?.len())
    }

    /// Returns true if no connection is open.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self.len().unwrap_or_default();
        f.debug_struct("ConnectionPool")
            .field("open", &open)
            .finish_non_exhaustive()
    }
}

/// Runs a query against a device connection.
pub type DeviceQuery<C> =
    dyn Fn(&C, &Table, &Criteria) -> anyhow::Result<QueryOutcome> + Send + Sync;

/// An executor that queries the device named in the job's criteria over a
/// shared [`ConnectionPool`].
pub struct PooledExecutor<C> {
    pool: Arc<ConnectionPool<C>>,
    device_key: String,
    query: Box<DeviceQuery<C>>,
}

impl<C> PooledExecutor<C> {
    /// Creates an executor reading the device id from [`DEVICE`].
    pub fn new<F>(pool: Arc<ConnectionPool<C>>, query: F) -> Self
    where
        F: Fn(&C, &Table, &Criteria) -> anyhow::Result<QueryOutcome> + Send + Sync + 'static,
    {
        Self {
            pool,
            device_key: DEVICE.to_string(),
            query: Box::new(query),
        }
    }

    /// Reads the device id from `key` instead.
    #[must_use]
    pub fn device_key(mut self, key: impl Into<String>) -> Self {
        self.device_key = key.into();
        self
    }

    /// The pool connections come from.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }
}

impl<C> fmt::Debug for PooledExecutor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledExecutor")
            .field("pool", &self.pool)
            .field("device_key", &self.device_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> QueryExecutor for PooledExecutor<C> {
    async fn run(&self, table: &Table, job: &Job) -> std::result::Result<QueryOutcome, ExecutorError> {
        let criteria = job.criteria()?;
        let device = criteria
            .get(&self.device_key)
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::new(format!("no '{}' in criteria", self.device_key)))?
            .to_string();
        let conn = self.pool.get(&device)?;
        debug!(job_id = %job.id(), %device, "querying device");
        Ok((self.query)(&conn, table, &criteria)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct Conn {
        device: String,
    }

    fn pool(opened: Arc<AtomicUsize>) -> ConnectionPool<Conn> {
        ConnectionPool::new(move |device| {
            if device == "offline" {
                anyhow::bail!("host unreachable");
            }
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(Conn {
                device: device.to_string(),
            })
        })
    }

    #[test]
    fn connections_are_shared_per_device() {
        let opened = Arc::new(AtomicUsize::new(0));
        let pool = pool(Arc::clone(&opened));
        let a1 = pool.get("a").unwrap();
        let a2 = pool.get("a").unwrap();
        let b = pool.get("b").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(b.device, "b");
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len().unwrap(), 2);
    }

    #[test]
    fn clearing_one_device_keeps_others() {
        let opened = Arc::new(AtomicUsize::new(0));
        let pool = pool(Arc::clone(&opened));
        let a = pool.get("a").unwrap();
        pool.get("b").unwrap();

        pool.clear(Some("a")).unwrap();
        assert_eq!(pool.len().unwrap(), 1);
        assert_eq!(a.device, "a");
        let a_again = pool.get("a").unwrap();
        assert!(!Arc::ptr_eq(&a, &a_again));
        assert_eq!(opened.load(Ordering::SeqCst), 3);

        pool.clear(None).unwrap();
        assert!(pool.is_empty().unwrap());
    }

    fn device_store(pool: Arc<ConnectionPool<Conn>>) -> crate::store::JobStore {
        use crate::config::JobStoreConfig;
        use crate::executor::ExecutorRegistry;
        use crate::store::{InMemoryResultStore, JobStore};

        let executor = PooledExecutor::new(pool, |conn: &Conn, _table, _criteria| {
            Ok(QueryOutcome::rows(vec![vec![Value::from(conn.device.as_str())]]))
        });
        JobStore::with_result_store(
            ExecutorRegistry::new().with("device", executor),
            JobStoreConfig::default().inline(),
            Arc::new(InMemoryResultStore::new()),
        )
    }

    fn device_table() -> Arc<Table> {
        use crate::table::Column;
        use netportal_core::TableId;

        Arc::new(
            Table::new(TableId::new(1), "interfaces", "device")
                .column(Column::new("device").key().text()),
        )
    }

    #[tokio::test]
    async fn pooled_executor_shares_device_connections() {
        let opened = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(pool(Arc::clone(&opened)));
        let store = device_store(Arc::clone(&pool));

        for port in 1..=3 {
            let criteria = Criteria::new().with(DEVICE, "sh1").with("port", port);
            let job = store.create(device_table(), criteria).unwrap();
            job.start().await.unwrap();
            assert_eq!(job.values().unwrap(), vec![vec![Value::from("sh1")]]);
        }
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn pooled_executor_reports_connection_failures() {
        let pool = Arc::new(pool(Arc::new(AtomicUsize::new(0))));
        let store = device_store(pool);

        let offline = store
            .create(device_table(), Criteria::new().with(DEVICE, "offline"))
            .unwrap();
        offline.start().await.unwrap();
        assert_eq!(offline.status().unwrap(), crate::job::JobStatus::Error);
        assert!(offline.message().unwrap().contains("host unreachable"));

        let unnamed = store.create(device_table(), Criteria::new()).unwrap();
        unnamed.start().await.unwrap();
        assert!(unnamed.message().unwrap().contains("no 'device' in criteria"));
    }

    #[test]
    fn factory_errors_are_not_cached() {
        let pool = pool(Arc::new(AtomicUsize::new(0)));
        let err = pool.get("offline").unwrap_err();
        assert!(err.to_string().contains("host unreachable"));
        assert!(pool.is_empty().unwrap());
    }
}
