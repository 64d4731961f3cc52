#![allow(dead_code)]

//! In-memory tabular store test double.
//!
//! `MemoryStore` holds tables as snapshots keyed by their qualified name and
//! applies the engine's staged-merge, pending-insert, and create-table
//! statements structurally, so integration tests can observe real round-trip
//! behavior without a live warehouse.

use std::cell::RefCell;
use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime};

use tabledit::data::{Value, values_equal};
use tabledit::snapshot::Snapshot;
use tabledit::store::TabularStore;

pub struct MemoryStore {
    tables: RefCell<BTreeMap<String, Snapshot>>,
    /// Table name → schema metadata rows served for information_schema queries.
    metadata: BTreeMap<String, Snapshot>,
    user: String,
    clock: NaiveDateTime,
    executed: RefCell<Vec<String>>,
    staged: RefCell<Vec<(String, usize)>>,
}

impl MemoryStore {
    pub fn new(user: &str, clock: NaiveDateTime) -> Self {
        MemoryStore {
            tables: RefCell::new(BTreeMap::new()),
            metadata: BTreeMap::new(),
            user: user.to_string(),
            clock,
            executed: RefCell::new(Vec::new()),
            staged: RefCell::new(Vec::new()),
        }
    }

    pub fn default_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    pub fn with_table(mut self, qualified: &str, snapshot: Snapshot) -> Self {
        self.tables
            .get_mut()
            .insert(qualified.to_uppercase(), snapshot);
        self
    }

    /// Registers schema metadata rows `(column_name, data_type, max_length,
    /// precision, scale)` served when the engine asks for the table's
    /// constraints.
    pub fn with_metadata(
        mut self,
        table_name: &str,
        rows: Vec<(&str, &str, Option<i64>, Option<i64>, Option<i64>)>,
    ) -> Self {
        let columns = vec![
            "COLUMN_NAME".to_string(),
            "DATA_TYPE".to_string(),
            "CHARACTER_MAXIMUM_LENGTH".to_string(),
            "NUMERIC_PRECISION".to_string(),
            "NUMERIC_SCALE".to_string(),
        ];
        let mut snapshot = Snapshot::empty(columns);
        for (name, data_type, max_length, precision, scale) in rows {
            snapshot
                .push_row(vec![
                    Some(Value::Text(name.to_string())),
                    Some(Value::Text(data_type.to_string())),
                    max_length.map(Value::Integer),
                    precision.map(Value::Integer),
                    scale.map(Value::Integer),
                ])
                .expect("metadata row");
        }
        self.metadata.insert(table_name.to_uppercase(), snapshot);
        self
    }

    pub fn table(&self, qualified: &str) -> Option<Snapshot> {
        self.tables.borrow().get(&qualified.to_uppercase()).cloned()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    pub fn staged(&self) -> Vec<(String, usize)> {
        self.staged.borrow().clone()
    }

    pub fn clock(&self) -> NaiveDateTime {
        self.clock
    }

    fn apply_merge(&self, sql: &str) -> Result<u64> {
        let target = word_after(sql, "merge into ").context("merge target")?;
        let stage = word_after(sql, "using ").context("merge stage")?;
        let on_clause = between(sql, "\non ", "\nwhen matched").context("merge on clause")?;
        let set_clause = after(sql, "update set\n").context("merge set clause")?;

        let key_columns: Vec<String> = on_clause
            .split(" and ")
            .map(|pair| {
                let left = pair.split('=').next().unwrap_or("").trim();
                left.trim_start_matches("prd.").to_string()
            })
            .collect();
        let assignments: Vec<(String, String)> = set_clause
            .split(',')
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (left, right) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Malformed set entry '{entry}'"))?;
                Ok((
                    left.trim().trim_start_matches("prd.").to_string(),
                    right.trim().to_string(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let staged = self
            .table(&stage)
            .ok_or_else(|| anyhow!("Stage table '{stage}' was never written"))?;
        let mut tables = self.tables.borrow_mut();
        let target_table = tables
            .get_mut(&target.to_uppercase())
            .ok_or_else(|| anyhow!("Unknown merge target '{target}'"))?;

        let mut matched = 0u64;
        let target_columns = target_table.columns().to_vec();
        for stage_row in staged.rows() {
            for row_idx in 0..target_table.row_count() {
                let is_match = key_columns.iter().all(|key| {
                    let stage_idx = column_position(staged.columns(), key);
                    let target_idx = column_position(&target_columns, key);
                    match (stage_idx, target_idx) {
                        (Some(s), Some(t)) => values_equal(
                            stage_row[s].as_ref(),
                            target_table.rows()[row_idx][t].as_ref(),
                        ),
                        _ => false,
                    }
                });
                if !is_match {
                    continue;
                }
                matched += 1;
                for (column, expr) in &assignments {
                    let value = if expr == "current_timestamp()" {
                        Some(Value::Timestamp(self.clock))
                    } else {
                        let source = expr.trim_start_matches("src.");
                        let stage_idx = column_position(staged.columns(), source)
                            .ok_or_else(|| anyhow!("Stage column '{source}' missing"))?;
                        stage_row[stage_idx].clone()
                    };
                    let target_name = target_columns
                        .iter()
                        .find(|c| c.eq_ignore_ascii_case(column))
                        .ok_or_else(|| anyhow!("Target column '{column}' missing"))?
                        .clone();
                    target_table.set_value(row_idx, &target_name, value)?;
                }
            }
        }
        Ok(matched)
    }

    fn apply_create(&self, sql: &str) -> Result<u64> {
        let name = word_after(sql, "create table if not exists ").context("table name")?;
        let mut tables = self.tables.borrow_mut();
        if tables.contains_key(&name.to_uppercase()) {
            return Ok(0);
        }
        let inner = between_balanced(sql).context("column definitions")?;
        let columns: Vec<String> = inner
            .lines()
            .map(|line| line.trim().trim_end_matches(','))
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_whitespace().next())
            .map(|token| token.to_string())
            .collect();
        tables.insert(name.to_uppercase(), Snapshot::empty(columns));
        Ok(0)
    }

    fn apply_insert(&self, sql: &str) -> Result<u64> {
        let target = word_after(sql, "insert into ").context("insert target")?;
        let insert_cols = between(sql, "(", ")")
            .context("insert columns")?
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>();
        let select_clause = between(sql, "select\n", "\nfrom ").context("select clause")?;
        let select_exprs = select_clause
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect::<Vec<_>>();
        let stage = word_after(sql, "\nfrom ").context("insert source")?;

        let staged = self
            .table(&stage)
            .ok_or_else(|| anyhow!("Stage table '{stage}' was never written"))?;
        let mut tables = self.tables.borrow_mut();
        let target_table = tables
            .get_mut(&target.to_uppercase())
            .ok_or_else(|| anyhow!("Unknown insert target '{target}'"))?;
        let target_columns = target_table.columns().to_vec();

        let mut inserted = 0u64;
        for stage_row in staged.rows() {
            let mut row: Vec<Option<Value>> = vec![None; target_columns.len()];
            for (insert_col, expr) in insert_cols.iter().zip(&select_exprs) {
                let value = if expr == "current_user()" {
                    Some(Value::Text(self.user.clone()))
                } else {
                    let source = expr
                        .trim_start_matches("to_variant(")
                        .trim_end_matches(')');
                    let stage_idx = column_position(staged.columns(), source)
                        .ok_or_else(|| anyhow!("Stage column '{source}' missing"))?;
                    stage_row[stage_idx].clone()
                };
                let target_idx = column_position(&target_columns, insert_col)
                    .ok_or_else(|| anyhow!("Insert column '{insert_col}' missing"))?;
                row[target_idx] = value;
            }
            // Column defaults declared on the pending table.
            if let Some(idx) = column_position(&target_columns, "changed_at")
                && row[idx].is_none()
            {
                row[idx] = Some(Value::Timestamp(self.clock));
            }
            if let Some(idx) = column_position(&target_columns, "approval_status")
                && row[idx].is_none()
            {
                row[idx] = Some(Value::Text("PENDING".to_string()));
            }
            target_table.push_row(row)?;
            inserted += 1;
        }
        Ok(inserted)
    }
}

impl TabularStore for MemoryStore {
    fn query(&self, sql: &str) -> Result<Snapshot> {
        if sql.contains("information_schema.columns") {
            let table_name = between(sql, "table_name = '", "'").context("metadata table name")?;
            return Ok(self
                .metadata
                .get(&table_name.to_uppercase())
                .cloned()
                .unwrap_or_else(|| {
                    Snapshot::empty(vec![
                        "COLUMN_NAME".to_string(),
                        "DATA_TYPE".to_string(),
                        "CHARACTER_MAXIMUM_LENGTH".to_string(),
                        "NUMERIC_PRECISION".to_string(),
                        "NUMERIC_SCALE".to_string(),
                    ])
                }));
        }
        if let Some(rest) = sql.strip_prefix("select * from ") {
            let name = rest.split(" order by").next().unwrap_or(rest).trim();
            return self
                .table(name)
                .ok_or_else(|| anyhow!("Unknown table '{name}'"));
        }
        bail!("Unsupported query: {sql}")
    }

    fn stage_write(&self, snapshot: &Snapshot, destination: &str, overwrite: bool) -> Result<()> {
        if !overwrite {
            bail!("MemoryStore only supports overwriting staged writes");
        }
        self.staged
            .borrow_mut()
            .push((destination.to_string(), snapshot.row_count()));
        self.tables
            .borrow_mut()
            .insert(destination.to_uppercase(), snapshot.clone());
        Ok(())
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.executed.borrow_mut().push(sql.to_string());
        if sql.starts_with("merge into ") {
            return self.apply_merge(sql);
        }
        if sql.starts_with("create table if not exists ") {
            return self.apply_create(sql);
        }
        if sql.starts_with("insert into ") {
            return self.apply_insert(sql);
        }
        bail!("Unsupported statement: {sql}")
    }

    fn current_user(&self) -> Result<String> {
        Ok(self.user.clone())
    }

    fn current_server_time(&self) -> Result<NaiveDateTime> {
        Ok(self.clock)
    }
}

fn column_position(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c.eq_ignore_ascii_case(name))
}

fn word_after(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let word = rest[..end].trim();
    (!word.is_empty()).then(|| word.to_string())
}

fn between<'a>(text: &'a str, start_marker: &str, end_marker: &str) -> Option<&'a str> {
    let start = text.find(start_marker)? + start_marker.len();
    let rest = &text[start..];
    let end = rest.find(end_marker)?;
    Some(&rest[..end])
}

fn after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    Some(&text[start..])
}

/// Inner text of the outermost parenthesized block.
fn between_balanced(text: &str) -> Option<&str> {
    let start = text.find('(')?;
    let end = text.rfind(')')?;
    (end > start).then(|| &text[start + 1..end])
}
