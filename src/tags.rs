//! Semantic column tagging.
//!
//! After every load, [`annotate`] scans the snapshot once and produces a
//! [`TagRegistry`]: per-column semantic types plus stable date bounds that
//! downstream filters use as defaults (decoupled from "today"). The registry
//! is an explicit value threaded through callers, rebuilt wholesale on each
//! load and read-only afterwards.
//!
//! Temporal classification is all-or-nothing: a column is converted to dates
//! or timestamps only when every non-null value parses under one strict
//! format. A single unparseable value leaves the whole column as text.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::{
    data::{Value, parse_strict_date, parse_strict_timestamp},
    snapshot::Snapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Numeric,
    Text,
    Boolean,
    Date,
    Timestamp,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Numeric => "numeric",
            SemanticType::Text => "text",
            SemanticType::Boolean => "boolean",
            SemanticType::Date => "date",
            SemanticType::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnTag {
    pub semantic: SemanticType,
    /// Earliest observed date; filter widgets use this as a stable lower bound.
    pub min_date: Option<NaiveDate>,
    /// Latest observed date; stable upper bound for filters.
    pub max_date: Option<NaiveDate>,
}

impl ColumnTag {
    fn plain(semantic: SemanticType) -> Self {
        ColumnTag {
            semantic,
            min_date: None,
            max_date: None,
        }
    }

    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.min_date, self.max_date) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }
}

/// Column name → tag, rebuilt fully on every load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagRegistry {
    tags: BTreeMap<String, ColumnTag>,
}

impl TagRegistry {
    pub fn get(&self, column: &str) -> Option<&ColumnTag> {
        self.tags.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ColumnTag)> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Re-applies this registry's temporal typing to another snapshot with
    /// the same columns, cell by cell. Edited snapshots come back from the
    /// editor as text; conforming them makes cell comparison type-aware.
    /// Cells that fail to parse are left as-is.
    pub fn conform(&self, snapshot: Snapshot) -> Snapshot {
        let mut snapshot = snapshot;
        for (column, tag) in &self.tags {
            let semantic = tag.semantic;
            if semantic != SemanticType::Date && semantic != SemanticType::Timestamp {
                continue;
            }
            let Some(col_idx) = snapshot.column_index(column) else {
                continue;
            };
            let converted: Vec<Option<Value>> = snapshot
                .column_values(col_idx)
                .map(|cell| match cell {
                    Some(Value::Text(raw)) => Some(convert_text(raw, semantic)),
                    other => other.cloned(),
                })
                .collect();
            for (row, value) in converted.into_iter().enumerate() {
                let _ = snapshot.set_value(row, column, value);
            }
        }
        snapshot
    }
}

fn convert_text(raw: &str, semantic: SemanticType) -> Value {
    match semantic {
        SemanticType::Timestamp => match parse_strict_timestamp(raw) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Text(raw.to_string()),
        },
        SemanticType::Date => match parse_strict_date(raw) {
            Some(d) => Value::Date(d),
            None => Value::Text(raw.to_string()),
        },
        _ => Value::Text(raw.to_string()),
    }
}

/// Scans a freshly loaded snapshot, converts temporal text columns in place,
/// and returns the typed snapshot together with its tag registry.
pub fn annotate(snapshot: Snapshot) -> (Snapshot, TagRegistry) {
    let mut snapshot = snapshot;
    let mut tags = BTreeMap::new();

    let columns: Vec<String> = snapshot.columns().to_vec();
    for (col_idx, column) in columns.iter().enumerate() {
        match classify_column(&snapshot, col_idx) {
            Classification::Numeric => {
                tags.insert(column.clone(), ColumnTag::plain(SemanticType::Numeric));
            }
            Classification::Boolean => {
                tags.insert(column.clone(), ColumnTag::plain(SemanticType::Boolean));
            }
            Classification::Text => {
                tags.insert(column.clone(), ColumnTag::plain(SemanticType::Text));
            }
            Classification::Temporal(parsed) => {
                let tag = apply_temporal(&mut snapshot, column, parsed);
                tags.insert(column.clone(), tag);
            }
        }
    }

    (snapshot, TagRegistry { tags })
}

enum Classification {
    Numeric,
    Boolean,
    Text,
    /// Every non-null value parsed; positions of nulls are preserved.
    Temporal(Vec<Option<NaiveDateTime>>),
}

fn classify_column(snapshot: &Snapshot, col_idx: usize) -> Classification {
    let mut saw_numeric = false;
    let mut saw_boolean = false;
    let mut saw_temporal = false;
    let mut saw_text = false;
    for cell in snapshot.column_values(col_idx) {
        match cell {
            None => {}
            Some(Value::Integer(_)) | Some(Value::Decimal(_)) => saw_numeric = true,
            Some(Value::Boolean(_)) => saw_boolean = true,
            Some(Value::Date(_)) | Some(Value::Timestamp(_)) => saw_temporal = true,
            Some(Value::Text(_)) => saw_text = true,
        }
    }
    // Numeric and boolean columns are exempt from temporal parsing entirely.
    if saw_numeric && !saw_boolean && !saw_temporal && !saw_text {
        return Classification::Numeric;
    }
    if saw_boolean && !saw_numeric && !saw_temporal && !saw_text {
        return Classification::Boolean;
    }
    // Stores may hand back typed temporal columns; keep their typing.
    if saw_temporal && !saw_numeric && !saw_boolean && !saw_text {
        let parsed = snapshot
            .column_values(col_idx)
            .map(|cell| match cell {
                Some(Value::Timestamp(ts)) => Some(*ts),
                Some(Value::Date(d)) => Some(d.and_time(NaiveTime::MIN)),
                _ => None,
            })
            .collect();
        return Classification::Temporal(parsed);
    }
    if saw_numeric || saw_boolean || saw_temporal {
        return Classification::Text;
    }

    match parse_temporal_column(snapshot, col_idx) {
        Some(parsed) => Classification::Temporal(parsed),
        None => Classification::Text,
    }
}

/// Tries the strict timestamp format over every non-null value; if any value
/// fails, retries the whole column with the strict date format. Returns None
/// unless one format covers the column completely.
fn parse_temporal_column(snapshot: &Snapshot, col_idx: usize) -> Option<Vec<Option<NaiveDateTime>>> {
    let texts: Vec<Option<&str>> = snapshot
        .column_values(col_idx)
        .map(|cell| match cell {
            None => Some(None),
            Some(Value::Text(raw)) => Some(Some(raw.as_str())),
            Some(_) => None,
        })
        .collect::<Option<Vec<_>>>()?;

    if texts.iter().all(|t| t.is_none()) {
        return None;
    }

    let with = |parse: fn(&str) -> Option<NaiveDateTime>| -> Option<Vec<Option<NaiveDateTime>>> {
        texts
            .iter()
            .map(|cell| match cell {
                None => Some(None),
                Some(raw) => parse(raw).map(Some),
            })
            .collect()
    };

    with(parse_strict_timestamp).or_else(|| {
        with(|raw| parse_strict_date(raw).map(|d| d.and_time(NaiveTime::MIN)))
    })
}

fn apply_temporal(
    snapshot: &mut Snapshot,
    column: &str,
    parsed: Vec<Option<NaiveDateTime>>,
) -> ColumnTag {
    let instants: Vec<NaiveDateTime> = parsed.iter().filter_map(|p| *p).collect();
    let min_date = instants.iter().map(|ts| ts.date()).min();
    let max_date = instants.iter().map(|ts| ts.date()).max();
    let all_midnight = instants.iter().all(|ts| ts.time() == NaiveTime::MIN);

    let semantic = if all_midnight {
        SemanticType::Date
    } else {
        SemanticType::Timestamp
    };
    for (row, instant) in parsed.into_iter().enumerate() {
        let value = instant.map(|ts| {
            if all_midnight {
                Value::Date(ts.date())
            } else {
                Value::Timestamp(ts)
            }
        });
        let _ = snapshot.set_value(row, column, value);
    }

    ColumnTag {
        semantic,
        min_date,
        max_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn column_of(values: &[&str]) -> Snapshot {
        let rows = values
            .iter()
            .map(|v| vec![crate::data::parse_cell(v)])
            .collect();
        Snapshot::new(vec!["When".to_string()], rows).unwrap()
    }

    #[test]
    fn all_midnight_timestamps_downgrade_to_date() {
        let snapshot = column_of(&[
            "2024-01-01 00:00:00+0000",
            "2024-01-03 00:00:00+0000",
            "",
        ]);
        let (typed, tags) = annotate(snapshot);
        let tag = tags.get("When").unwrap();
        assert_eq!(tag.semantic, SemanticType::Date);
        assert_eq!(
            typed.cell(0, 0),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
        );
        assert!(typed.cell(2, 0).is_none());
        assert_eq!(
            tag.date_bounds(),
            Some((
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
            ))
        );
    }

    #[test]
    fn a_single_non_midnight_value_keeps_timestamp_typing() {
        let snapshot = column_of(&["2024-01-01 00:00:00+0000", "2024-01-02 08:15:00+0000"]);
        let (typed, tags) = annotate(snapshot);
        assert_eq!(tags.get("When").unwrap().semantic, SemanticType::Timestamp);
        assert!(matches!(typed.cell(1, 0), Some(Value::Timestamp(_))));
    }

    #[test]
    fn one_unparseable_value_rejects_the_whole_column() {
        let snapshot = column_of(&["2024-01-01", "2024-01-02", "not a date"]);
        let (typed, tags) = annotate(snapshot);
        assert_eq!(tags.get("When").unwrap().semantic, SemanticType::Text);
        assert_eq!(
            typed.cell(0, 0),
            Some(&Value::Text("2024-01-01".to_string()))
        );
    }

    #[test]
    fn date_only_fallback_applies_when_timestamps_fail() {
        let snapshot = column_of(&["2024-01-01", "2024-02-01"]);
        let (_, tags) = annotate(snapshot);
        assert_eq!(tags.get("When").unwrap().semantic, SemanticType::Date);
    }

    #[test]
    fn numeric_columns_are_exempt_from_temporal_parsing() {
        let rows = vec![
            vec![crate::data::parse_cell("20240101")],
            vec![crate::data::parse_cell("20240102")],
        ];
        let snapshot = Snapshot::new(vec!["Code".to_string()], rows).unwrap();
        let (_, tags) = annotate(snapshot);
        assert_eq!(tags.get("Code").unwrap().semantic, SemanticType::Numeric);
    }

    #[test]
    fn conform_retypes_edited_text_cells() {
        let base = column_of(&["2024-01-01", "2024-01-02"]);
        let (_, tags) = annotate(base);

        let edited = column_of(&["2024-01-05", "garbage"]);
        let conformed = tags.conform(edited);
        assert_eq!(
            conformed.cell(0, 0),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()))
        );
        assert_eq!(
            conformed.cell(1, 0),
            Some(&Value::Text("garbage".to_string()))
        );
    }
}
