//! Staged, key-matched write-back of accepted changes.
//!
//! Changed cells are regrouped into per-row partial records, staged into a
//! transient table (overwritten on every call, never appended), and applied
//! with a single `merge into … when matched then update set` statement. The
//! lock column, when configured, is stamped with the store's clock inside
//! that same statement so a reader never observes new values beside a stale
//! lock timestamp. Audit records flow through the same staging pattern into
//! the append-only pending-approval table, which is created on first use.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{debug, info};

use crate::{
    changelog::ChangeLogRecord,
    data::{Value, store_column_name},
    diff::{ChangedCell, key_index},
    snapshot::Snapshot,
    store::{TableRef, TabularStore},
};

pub const DEFAULT_STAGE_TABLE: &str = "TABLEDIT_BASE_CHANGES";
pub const DEFAULT_PENDING_TABLE: &str = "TABLEDIT_PENDING_CHANGES";
pub const DEFAULT_PENDING_STAGE_TABLE: &str = "TABLEDIT_PENDING_STAGE";

/// Write-back destination and key layout, in display naming.
#[derive(Debug, Clone, PartialEq)]
pub struct WritebackConfig {
    pub table: TableRef,
    pub pk_columns: Vec<String>,
    pub lock_column: Option<String>,
    pub order_by: Option<String>,
    pub stage_table: String,
    pub pending_table: String,
    pub pending_stage_table: String,
}

impl WritebackConfig {
    pub fn new(table: TableRef, pk_columns: Vec<String>) -> Self {
        WritebackConfig {
            table,
            pk_columns,
            lock_column: None,
            order_by: None,
            stage_table: DEFAULT_STAGE_TABLE.to_string(),
            pending_table: DEFAULT_PENDING_TABLE.to_string(),
            pending_stage_table: DEFAULT_PENDING_STAGE_TABLE.to_string(),
        }
    }

    pub fn with_lock_column(mut self, column: impl Into<String>) -> Self {
        self.lock_column = Some(column.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn pk_store_names(&self) -> Vec<String> {
        self.pk_columns.iter().map(|c| store_column_name(c)).collect()
    }

    pub fn lock_store_name(&self) -> Option<String> {
        self.lock_column.as_deref().map(store_column_name)
    }

    pub fn stage_ref(&self) -> TableRef {
        self.table.sibling(&self.stage_table)
    }

    pub fn pending_ref(&self) -> TableRef {
        self.table.sibling(&self.pending_table)
    }

    pub fn pending_stage_ref(&self) -> TableRef {
        self.table.sibling(&self.pending_stage_table)
    }
}

/// Display names of the distinct changed columns, in snapshot column order,
/// with key and lock columns excluded.
pub fn update_columns(
    config: &WritebackConfig,
    cells: &[ChangedCell],
    original: &Snapshot,
) -> Vec<String> {
    let changed: Vec<&str> = cells.iter().map(|c| c.column.as_str()).unique().collect();
    original
        .columns()
        .iter()
        .filter(|column| changed.contains(&column.as_str()))
        .filter(|column| !config.pk_columns.iter().any(|pk| pk == *column))
        .filter(|column| config.lock_column.as_deref() != Some(column.as_str()))
        .cloned()
        .collect()
}

/// Builds the key-matched update statement over the staged partial rows.
/// Key columns and the lock column never appear in the set list; the lock
/// column is stamped from the store clock in the same statement.
pub fn build_merge_sql(config: &WritebackConfig, update_cols: &[String]) -> String {
    let pk_store = config.pk_store_names();
    let lock_store = config.lock_store_name();

    let on_clause = pk_store
        .iter()
        .map(|c| format!("prd.{c} = src.{c}"))
        .join(" and ");

    let mut set_entries: Vec<String> = update_cols
        .iter()
        .map(|c| store_column_name(c))
        .filter(|c| !pk_store.contains(c))
        .filter(|c| lock_store.as_deref() != Some(c.as_str()))
        .map(|c| format!("prd.{c} = src.{c}"))
        .collect();
    if let Some(lock) = &lock_store {
        set_entries.push(format!("prd.{lock} = current_timestamp()"));
    }
    let set_clause = set_entries.join(",\n  ");

    format!(
        "merge into {target} prd\nusing {stage} src\non {on_clause}\nwhen matched then update set\n  {set_clause}",
        target = config.table.qualified(),
        stage = config.stage_ref().qualified(),
    )
}

pub fn build_pending_table_ddl(config: &WritebackConfig) -> String {
    let pk_defs = config
        .pk_store_names()
        .iter()
        .map(|c| format!("    {c} VARCHAR"))
        .join(",\n");
    format!(
        "create table if not exists {pending} (\n{pk_defs},\n    column_name STRING,\n    old_value VARIANT,\n    new_value VARIANT,\n    changed_by STRING,\n    changed_at TIMESTAMP_NTZ default current_timestamp(),\n    approval_status STRING default 'PENDING'\n)",
        pending = config.pending_ref().qualified(),
    )
}

pub fn build_pending_insert_sql(config: &WritebackConfig) -> String {
    let pk_store = config.pk_store_names();
    let insert_cols = pk_store
        .iter()
        .cloned()
        .chain(["column_name", "old_value", "new_value", "changed_by"].map(String::from))
        .join(",\n    ");
    let select_cols = pk_store
        .iter()
        .cloned()
        .chain(
            [
                "column_name",
                "to_variant(old_value)",
                "to_variant(new_value)",
                "current_user()",
            ]
            .map(String::from),
        )
        .join(",\n    ");
    format!(
        "insert into {pending} (\n    {insert_cols}\n)\nselect\n    {select_cols}\nfrom {stage}",
        pending = config.pending_ref().qualified(),
        stage = config.pending_stage_ref().qualified(),
    )
}

/// Applies accepted changes to the live table. Returns the affected row
/// count; zero changed cells (or an empty set list) is a no-op that never
/// touches the store.
pub fn merge_changes(
    store: &dyn TabularStore,
    config: &WritebackConfig,
    cells: &[ChangedCell],
    original: &Snapshot,
) -> Result<u64> {
    if cells.is_empty() {
        return Ok(0);
    }
    let update_cols = update_columns(config, cells, original);
    if update_cols.is_empty() {
        return Ok(0);
    }

    let staged = build_stage_snapshot(config, cells, &update_cols, original)?;
    let stage_ref = config.stage_ref();
    store
        .stage_write(&staged, &stage_ref.qualified(), true)
        .with_context(|| format!("Staging {} changed row(s) into {stage_ref}", staged.row_count()))?;

    let sql = build_merge_sql(config, &update_cols);
    debug!("Merge statement:\n{sql}");
    let affected = store
        .execute(&sql)
        .with_context(|| format!("Merging staged changes into {}", config.table))?;
    info!(
        "Merged {} row(s) across {} column(s) into {}",
        affected,
        update_cols.len(),
        config.table
    );
    Ok(affected)
}

/// Regroups changed cells into per-row partial records. The staged columns
/// are the key columns plus every distinct changed column; cells a given row
/// did not change are filled from the original so one statement can carry
/// per-row deltas.
fn build_stage_snapshot(
    config: &WritebackConfig,
    cells: &[ChangedCell],
    update_cols: &[String],
    original: &Snapshot,
) -> Result<Snapshot> {
    let original_by_key = key_index(original, &config.pk_columns)
        .map_err(|err| anyhow::anyhow!("Staging changed rows: {err}"))?;
    let pk_indices: Vec<usize> = config
        .pk_columns
        .iter()
        .map(|c| original.column_index(c).expect("key columns were resolved"))
        .collect();
    let update_indices: Vec<usize> = update_cols
        .iter()
        .map(|c| original.column_index(c).expect("update columns come from the snapshot"))
        .collect();

    let columns = config
        .pk_store_names()
        .into_iter()
        .chain(update_cols.iter().map(|c| store_column_name(c)))
        .collect::<Vec<_>>();
    let mut staged = Snapshot::empty(columns);

    // Original row index -> (changed column -> new value), rows kept in
    // first-appearance order.
    let mut row_order: Vec<usize> = Vec::new();
    let mut staged_values: BTreeMap<(usize, &str), Option<Value>> = BTreeMap::new();
    for cell in cells {
        let key: Vec<Option<String>> = cell
            .key
            .iter()
            .map(|(_, value)| crate::diff::key_token(value.as_ref()))
            .collect();
        let Some(&orig_idx) = original_by_key.get(&key) else {
            continue;
        };
        if !row_order.contains(&orig_idx) {
            row_order.push(orig_idx);
        }
        staged_values.insert((orig_idx, cell.column.as_str()), cell.new.clone());
    }

    for &orig_idx in &row_order {
        let orig_row = &original.rows()[orig_idx];
        let mut row: Vec<Option<Value>> = pk_indices
            .iter()
            .map(|&idx| orig_row[idx].clone())
            .collect();
        for (update_col, &col_idx) in update_cols.iter().zip(&update_indices) {
            row.push(match staged_values.get(&(orig_idx, update_col.as_str())) {
                Some(value) => value.clone(),
                None => orig_row[col_idx].clone(),
            });
        }
        staged.push_row(row)?;
    }
    Ok(staged)
}

/// Persists audit records into the pending-approval table, creating it on
/// first use. No-op on empty input.
pub fn log_pending_changes(
    store: &dyn TabularStore,
    config: &WritebackConfig,
    records: &[ChangeLogRecord],
) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let pk_store = config.pk_store_names();
    let columns = pk_store
        .iter()
        .cloned()
        .chain(["column_name", "old_value", "new_value"].map(String::from))
        .collect::<Vec<_>>();
    let mut staged = Snapshot::empty(columns);
    for record in records {
        let mut row: Vec<Option<Value>> = pk_store
            .iter()
            .map(|pk| {
                record
                    .key
                    .iter()
                    .find(|(column, _)| column == pk)
                    .and_then(|(_, value)| value.as_ref())
                    // Pending-table key columns are VARCHAR.
                    .map(|value| Value::Text(value.as_display()))
            })
            .collect();
        row.push(Some(Value::Text(record.column_name.clone())));
        row.push(record.old_value.clone());
        row.push(record.new_value.clone());
        staged.push_row(row)?;
    }

    let stage_ref = config.pending_stage_ref();
    store
        .stage_write(&staged, &stage_ref.qualified(), true)
        .with_context(|| format!("Staging {} audit record(s) into {stage_ref}", records.len()))?;

    store
        .execute(&build_pending_table_ddl(config))
        .with_context(|| format!("Ensuring pending table {}", config.pending_ref()))?;

    let inserted = store
        .execute(&build_pending_insert_sql(config))
        .with_context(|| format!("Inserting audit records into {}", config.pending_ref()))?;
    info!(
        "Queued {} change record(s) for approval in {}",
        inserted,
        config.pending_ref()
    );
    Ok(inserted)
}
