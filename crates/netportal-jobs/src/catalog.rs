//! Read-only access to configured tables.

use std::collections::HashMap;
use std::sync::Arc;

use netportal_core::TableId;

use crate::error::{Error, Result};
use crate::executor::ExecutorRegistry;
use crate::table::Table;

/// Source of table definitions.
///
/// The engine never mutates tables; implementations are loaded once and
/// shared.
pub trait TableCatalog: Send + Sync {
    /// Looks up a table by ID.
    fn table(&self, id: TableId) -> Option<Arc<Table>>;

    /// Looks up a table by name.
    fn table_by_name(&self, name: &str) -> Option<Arc<Table>>;

    /// Returns every table.
    fn tables(&self) -> Vec<Arc<Table>>;
}

/// A catalog held in memory, populated at configuration-load time.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    by_id: HashMap<TableId, Arc<Table>>,
    by_name: HashMap<String, TableId>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds a table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the table is invalid or its ID or
    /// name is already taken.
    pub fn insert(&mut self, table: Table) -> Result<Arc<Table>> {
        table.validate()?;
        if self.by_id.contains_key(&table.id()) {
            return Err(Error::configuration(format!(
                "table id {} is already defined",
                table.id()
            )));
        }
        if self.by_name.contains_key(table.name()) {
            return Err(Error::configuration(format!(
                "table name '{}' is already defined",
                table.name()
            )));
        }
        let table = Arc::new(table);
        self.by_name.insert(table.name().to_string(), table.id());
        self.by_id.insert(table.id(), Arc::clone(&table));
        Ok(table)
    }

    /// Checks that every table's executor capability is registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first unresolved table.
    pub fn validate_executors(&self, registry: &ExecutorRegistry) -> Result<()> {
        let mut tables: Vec<&Arc<Table>> = self.by_id.values().collect();
        tables.sort_by_key(|t| t.id());
        for table in tables {
            if !registry.contains(table.executor()) {
                return Err(Error::configuration(format!(
                    "table '{}' uses unregistered executor '{}'",
                    table.name(),
                    table.executor()
                )));
            }
        }
        Ok(())
    }
}

impl TableCatalog for InMemoryCatalog {
    fn table(&self, id: TableId) -> Option<Arc<Table>> {
        self.by_id.get(&id).cloned()
    }

    fn table_by_name(&self, name: &str) -> Option<Arc<Table>> {
        self.by_name.get(name).and_then(|id| self.table(*id))
    }

    fn tables(&self) -> Vec<Arc<Table>> {
        let mut tables: Vec<Arc<Table>> = self.by_id.values().cloned().collect();
        tables.sort_by_key(|t| t.id());
        tables
    }
}
