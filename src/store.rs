//! The tabular store boundary.
//!
//! The engine consumes a narrow, blocking interface: declarative queries that
//! return snapshots, staged bulk writes, and statement execution. Nothing
//! here assumes a particular SQL dialect beyond equality joins, MIN/MAX, and
//! a VARIANT-like semi-structured type for audit payloads.

use std::fmt;

use anyhow::{Result, ensure};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

pub trait TabularStore {
    /// Runs a query and materializes the full result set.
    fn query(&self, sql: &str) -> Result<Snapshot>;

    /// Bulk-writes a snapshot into `destination`. With `overwrite` set, any
    /// previous content of the destination is replaced, never appended to.
    fn stage_write(&self, snapshot: &Snapshot, destination: &str, overwrite: bool) -> Result<()>;

    /// Executes a statement and returns the number of affected rows.
    fn execute(&self, sql: &str) -> Result<u64>;

    /// Identity the store attributes writes to.
    fn current_user(&self) -> Result<String>;

    /// The store's clock; the engine stamps time store-side, callers may use
    /// this to present staleness.
    fn current_server_time(&self) -> Result<NaiveDateTime>;
}

/// Fully qualified `database.schema.table` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        TableRef {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parses a `DATABASE.SCHEMA.TABLE` string.
    pub fn parse(qualified: &str) -> Result<Self> {
        let parts: Vec<&str> = qualified.split('.').collect();
        ensure!(
            parts.len() == 3 && parts.iter().all(|p| !p.trim().is_empty()),
            "Table reference '{qualified}' must have the form DATABASE.SCHEMA.TABLE"
        );
        Ok(TableRef::new(
            parts[0].trim(),
            parts[1].trim(),
            parts[2].trim(),
        ))
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }

    /// Another table in the same database and schema.
    pub fn sibling(&self, table: &str) -> TableRef {
        TableRef::new(self.database.clone(), self.schema.clone(), table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}
