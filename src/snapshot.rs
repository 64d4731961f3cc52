//! In-memory tabular snapshots.
//!
//! A [`Snapshot`] is an ordered copy of a dataset at a point in time: a column
//! list plus rows of optional [`Value`] cells. Snapshots are deep-copied via
//! `Clone` when an edit session starts, so the original comparison baseline
//! never shares storage with the live data.

use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use encoding_rs::Encoding;

use crate::{
    data::{Value, display_column_name, parse_cell, store_column_name},
    io_utils,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    columns: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

impl Snapshot {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<Value>>>) -> Result<Self> {
        for (idx, row) in rows.iter().enumerate() {
            ensure!(
                row.len() == columns.len(),
                "Row {} has {} cell(s) but the snapshot has {} column(s)",
                idx + 1,
                row.len(),
                columns.len()
            );
        }
        Ok(Snapshot { columns, rows })
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Snapshot {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[Vec<Option<Value>>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column)).and_then(Option::as_ref)
    }

    pub fn push_row(&mut self, row: Vec<Option<Value>>) -> Result<()> {
        ensure!(
            row.len() == self.columns.len(),
            "Row has {} cell(s) but the snapshot has {} column(s)",
            row.len(),
            self.columns.len()
        );
        self.rows.push(row);
        Ok(())
    }

    /// Replaces one cell, addressed by row index and column name.
    pub fn set_value(&mut self, row: usize, column: &str, value: Option<Value>) -> Result<()> {
        let Some(col_idx) = self.column_index(column) else {
            bail!("Unknown column '{column}'");
        };
        let row_count = self.rows.len();
        let Some(cells) = self.rows.get_mut(row) else {
            bail!("Row {row} is out of range ({row_count} row(s))");
        };
        cells[col_idx] = value;
        Ok(())
    }

    /// Iterates one column's cells in row order.
    pub fn column_values(&self, column: usize) -> impl Iterator<Item = Option<&Value>> {
        self.rows.iter().map(move |row| row.get(column).and_then(Option::as_ref))
    }

    /// Renames every column from store-native form to display form.
    pub fn into_display_names(mut self) -> Snapshot {
        for column in &mut self.columns {
            *column = display_column_name(column);
        }
        self
    }

    /// Renames every column from display form to store-native form.
    pub fn into_store_names(mut self) -> Snapshot {
        for column in &mut self.columns {
            *column = store_column_name(column);
        }
        self
    }

    /// Keeps only the rows for which `keep` returns true.
    pub fn retain_rows(&self, mut keep: impl FnMut(usize, &[Option<Value>]) -> bool) -> Snapshot {
        let rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(idx, row)| keep(*idx, row))
            .map(|(_, row)| row.clone())
            .collect();
        Snapshot {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Reads a headered CSV file into an untagged snapshot.
    pub fn read_csv(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Snapshot> {
        let mut reader = io_utils::open_csv_reader(path, delimiter, encoding)?;
        let columns = reader
            .headers()
            .with_context(|| format!("Reading headers from {path:?}"))?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();
        let mut snapshot = Snapshot::empty(columns);
        for (idx, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Reading row {} of {path:?}", idx + 1))?;
            let row = record.iter().map(parse_cell).collect::<Vec<_>>();
            snapshot
                .push_row(row)
                .with_context(|| format!("Row {} of {path:?}", idx + 1))?;
        }
        Ok(snapshot)
    }

    /// Writes the snapshot as CSV; `None` routes to stdout.
    pub fn write_csv(&self, path: Option<&Path>, delimiter: u8) -> Result<()> {
        let mut writer = io_utils::open_csv_writer(path, delimiter)?;
        writer
            .write_record(&self.columns)
            .context("Writing CSV headers")?;
        for row in &self.rows {
            let rendered = row
                .iter()
                .map(|cell| cell.as_ref().map(Value::as_display).unwrap_or_default())
                .collect::<Vec<_>>();
            writer.write_record(&rendered).context("Writing CSV row")?;
        }
        writer.flush().context("Flushing CSV output")?;
        Ok(())
    }
}
