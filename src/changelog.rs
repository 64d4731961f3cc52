//! Field-level audit records for the pending-approval queue.
//!
//! One record per changed cell: a row with three changed columns produces
//! three records, which keeps every audit entry attributable to a single
//! field instead of a whole-row blob. Records are append-only once persisted;
//! later approval-workflow updates happen outside this crate.

use serde::Serialize;

use crate::{
    data::{Value, store_column_name},
    diff::ChangedCell,
};

pub const PENDING_STATUS: &str = "PENDING";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogRecord {
    /// Primary-key values in store-native column naming.
    pub key: Vec<(String, Option<Value>)>,
    /// Store-native name of the changed column.
    pub column_name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Filled by the store with the acting identity at insert time.
    pub changed_by: Option<String>,
    pub approval_status: String,
}

/// Converts changed cells into pending audit records. Key values were copied
/// from the original snapshot when the cells were detected.
pub fn build_change_log(cells: &[ChangedCell]) -> Vec<ChangeLogRecord> {
    cells
        .iter()
        .map(|cell| ChangeLogRecord {
            key: cell
                .key
                .iter()
                .map(|(column, value)| (store_column_name(column), value.clone()))
                .collect(),
            column_name: store_column_name(&cell.column),
            old_value: cell.old.clone(),
            new_value: cell.new.clone(),
            changed_by: None,
            approval_status: PENDING_STATUS.to_string(),
        })
        .collect()
}
