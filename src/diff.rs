//! Cell-level change detection between an edited snapshot and its original.
//!
//! Rows are joined on primary-key tuples; comparison skips the key columns
//! (never user-editable) and the optional lock column (always stamped by the
//! store at merge time). Output order is deterministic: edited row order,
//! then snapshot column order.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::{
    data::{Value, values_equal},
    snapshot::Snapshot,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeMismatch {
    #[error("edited snapshot has {edited} column(s), original has {original}")]
    ColumnCount { edited: usize, original: usize },
    #[error(
        "column {position} is '{found}' in the edited snapshot but '{expected}' in the original"
    )]
    ColumnName {
        position: usize,
        found: String,
        expected: String,
    },
    #[error("key column '{column}' is missing from the snapshot")]
    MissingKeyColumn { column: String },
}

/// One (row, column) pair whose value differs between snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedCell {
    /// Row index in the edited snapshot; detection metadata, not identity.
    pub row: usize,
    /// Primary-key values (display column names), copied from the original.
    pub key: Vec<(String, Option<Value>)>,
    /// Display name of the changed column.
    pub column: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Canonical join token for one cell of a primary-key tuple. Numeric values
/// normalize representation so `1` and `1.0` key the same row.
pub(crate) fn key_token(value: Option<&Value>) -> Option<String> {
    value.map(|v| match v {
        Value::Decimal(d) => d.normalize().to_string(),
        other => other.as_display(),
    })
}

/// Maps each row's primary-key tuple to its row index. The first occurrence
/// wins if keys are not unique.
pub fn key_index(
    snapshot: &Snapshot,
    pk_columns: &[String],
) -> Result<BTreeMap<Vec<Option<String>>, usize>, ShapeMismatch> {
    let pk_indices = resolve_columns(snapshot, pk_columns)?;
    let mut index = BTreeMap::new();
    for (row_idx, row) in snapshot.rows().iter().enumerate() {
        let key: Vec<Option<String>> = pk_indices
            .iter()
            .map(|&idx| key_token(row[idx].as_ref()))
            .collect();
        index.entry(key).or_insert(row_idx);
    }
    Ok(index)
}

fn resolve_columns(
    snapshot: &Snapshot,
    columns: &[String],
) -> Result<Vec<usize>, ShapeMismatch> {
    columns
        .iter()
        .map(|name| {
            snapshot
                .column_index(name)
                .ok_or_else(|| ShapeMismatch::MissingKeyColumn {
                    column: name.clone(),
                })
        })
        .collect()
}

/// Diffs `edited` against `original` cell by cell on shared primary keys.
///
/// Both snapshots must carry the identical column set in the identical order;
/// anything else is a precondition violation surfaced as [`ShapeMismatch`],
/// never silently ignored. Rows with no changed cells contribute nothing.
pub fn detect_changes(
    edited: &Snapshot,
    original: &Snapshot,
    pk_columns: &[String],
    lock_column: Option<&str>,
) -> Result<Vec<ChangedCell>, ShapeMismatch> {
    ensure_same_columns(edited, original)?;

    let pk_indices = resolve_columns(edited, pk_columns)?;
    let original_by_key = key_index(original, pk_columns)?;

    let compared: Vec<(usize, &String)> = edited
        .columns()
        .iter()
        .enumerate()
        .filter(|(idx, name)| {
            !pk_indices.contains(idx) && lock_column.is_none_or(|lock| lock != name.as_str())
        })
        .collect();

    let mut changes = Vec::new();
    for (row_idx, row) in edited.rows().iter().enumerate() {
        let key: Vec<Option<String>> = pk_indices
            .iter()
            .map(|&idx| key_token(row[idx].as_ref()))
            .collect();
        let Some(&orig_idx) = original_by_key.get(&key) else {
            continue;
        };
        let orig_row = &original.rows()[orig_idx];

        let mut key_values: Option<Vec<(String, Option<Value>)>> = None;
        for &(col_idx, ref column) in &compared {
            let old = orig_row[col_idx].as_ref();
            let new = row[col_idx].as_ref();
            if values_equal(new, old) {
                continue;
            }
            let key_values = key_values.get_or_insert_with(|| {
                pk_columns
                    .iter()
                    .zip(&pk_indices)
                    .map(|(name, &idx)| (name.clone(), orig_row[idx].clone()))
                    .collect()
            });
            changes.push(ChangedCell {
                row: row_idx,
                key: key_values.clone(),
                column: (*column).clone(),
                old: old.cloned(),
                new: new.cloned(),
            });
        }
    }
    Ok(changes)
}

fn ensure_same_columns(edited: &Snapshot, original: &Snapshot) -> Result<(), ShapeMismatch> {
    if edited.columns().len() != original.columns().len() {
        return Err(ShapeMismatch::ColumnCount {
            edited: edited.columns().len(),
            original: original.columns().len(),
        });
    }
    for (position, (found, expected)) in edited
        .columns()
        .iter()
        .zip(original.columns())
        .enumerate()
    {
        if found != expected {
            return Err(ShapeMismatch::ColumnName {
                position: position + 1,
                found: found.clone(),
                expected: expected.clone(),
            });
        }
    }
    Ok(())
}
