//! Store-declared column constraints.
//!
//! Constraints are fetched from the store's `information_schema.columns` and
//! cached only briefly: store-side schema can change between sessions, so a
//! validation pass must never run against stale limits. Constraint sets can
//! also be loaded from YAML files, which is how the CLI drives validation
//! without a live store.

use std::{
    fs::File,
    io::BufReader,
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    snapshot::Snapshot,
    store::{TableRef, TabularStore},
};

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Char,
    Numeric,
    Other,
}

/// Per-column limits, keyed by the store-native column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConstraint {
    pub column_name: String,
    pub kind: DataKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

/// Classifies a store-declared type token. Length-limited text types contain
/// CHAR/TEXT/STRING; exact numerics are the NUMBER family; everything else is
/// unvalidated.
pub fn classify_data_type(data_type: &str) -> DataKind {
    let token = data_type.trim().to_uppercase();
    let base = token.split('(').next().unwrap_or("").trim().to_string();
    if base.contains("CHAR") || base.contains("TEXT") || base.contains("STRING") {
        return DataKind::Char;
    }
    match base.as_str() {
        "NUMBER" | "DECIMAL" | "NUMERIC" | "FIXED" => DataKind::Numeric,
        _ => DataKind::Other,
    }
}

/// YAML-persisted constraint set for offline validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub columns: Vec<ColumnConstraint>,
}

impl ConstraintSet {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening constraint file {path:?}"))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).context("Parsing constraint YAML")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating constraint file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing constraint YAML")
    }
}

pub fn schema_metadata_sql(table: &TableRef) -> String {
    format!(
        "select\n    column_name,\n    data_type,\n    character_maximum_length,\n    numeric_precision,\n    numeric_scale\nfrom {database}.information_schema.columns\nwhere table_schema = '{schema}'\n  and table_name = '{table_name}'",
        database = table.database,
        schema = table.schema,
        table_name = table.table,
    )
}

/// Short-lived cache over the store's declared column constraints.
#[derive(Debug)]
pub struct SchemaCatalog {
    ttl: Duration,
    cached: Option<(Instant, Vec<ColumnConstraint>)>,
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        SchemaCatalog::new(DEFAULT_CATALOG_TTL)
    }
}

impl SchemaCatalog {
    pub fn new(ttl: Duration) -> Self {
        SchemaCatalog { ttl, cached: None }
    }

    /// Returns the table's constraints, refetching once the cache expires.
    /// A table with no declared columns yields an empty set, which the
    /// validator treats as unconstrained.
    pub fn constraints(
        &mut self,
        store: &dyn TabularStore,
        table: &TableRef,
    ) -> Result<Vec<ColumnConstraint>> {
        if let Some((fetched_at, constraints)) = &self.cached
            && fetched_at.elapsed() < self.ttl
        {
            return Ok(constraints.clone());
        }
        let fetched = fetch_constraints(store, table)?;
        self.cached = Some((Instant::now(), fetched.clone()));
        Ok(fetched)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

fn fetch_constraints(store: &dyn TabularStore, table: &TableRef) -> Result<Vec<ColumnConstraint>> {
    let metadata = store
        .query(&schema_metadata_sql(table))
        .with_context(|| format!("Fetching schema metadata for {table}"))?;
    parse_metadata(&metadata)
}

fn parse_metadata(metadata: &Snapshot) -> Result<Vec<ColumnConstraint>> {
    if metadata.is_empty() {
        return Ok(Vec::new());
    }
    let col = |name: &str| -> Result<usize> {
        metadata
            .columns()
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("Schema metadata is missing the '{name}' column"))
    };
    let name_idx = col("column_name")?;
    let type_idx = col("data_type")?;
    let length_idx = col("character_maximum_length")?;
    let precision_idx = col("numeric_precision")?;
    let scale_idx = col("numeric_scale")?;

    metadata
        .rows()
        .iter()
        .map(|row| {
            let column_name = match row[name_idx].as_ref() {
                Some(value) => value.as_display(),
                None => return Err(anyhow!("Schema metadata row has a null column_name")),
            };
            let data_type = row[type_idx]
                .as_ref()
                .map(Value::as_display)
                .unwrap_or_default();
            Ok(ColumnConstraint {
                column_name,
                kind: classify_data_type(&data_type),
                max_length: cell_as_u32(row[length_idx].as_ref()),
                precision: cell_as_u32(row[precision_idx].as_ref()),
                scale: cell_as_u32(row[scale_idx].as_ref()),
            })
        })
        .collect()
}

fn cell_as_u32(cell: Option<&Value>) -> Option<u32> {
    let decimal = cell?.as_decimal()?;
    u32::try_from(decimal.trunc().mantissa()).ok()
}
