//! Value-level row filters over a tagged snapshot.
//!
//! The widget layer stays outside this crate; what lives here is the filter
//! state and its predicate semantics. Text and boolean filters are equality
//! matches with an "all rows" neutral default; temporal filters are inclusive
//! date ranges defaulted to the column's tagged bounds, and a range still at
//! its default bounds is skipped entirely so an untouched filter never hides
//! rows.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
    data::{Value, parse_strict_date, parse_strict_timestamp},
    snapshot::Snapshot,
    tags::{SemanticType, TagRegistry},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    /// Text column → selected value; `None` means "All".
    pub text: BTreeMap<String, Option<String>>,
    /// Boolean column → selected value; `None` means "All".
    pub boolean: BTreeMap<String, Option<bool>>,
    /// Temporal column → inclusive date range.
    pub date_range: BTreeMap<String, (NaiveDate, NaiveDate)>,
}

impl FilterSet {
    /// Neutral filters for every taggable column: text and boolean columns
    /// match all rows, temporal columns span their tagged bounds.
    pub fn defaults(snapshot: &Snapshot, tags: &TagRegistry) -> Self {
        let mut filters = FilterSet::default();
        for column in snapshot.columns() {
            let Some(tag) = tags.get(column) else {
                continue;
            };
            match tag.semantic {
                SemanticType::Text => {
                    filters.text.insert(column.clone(), None);
                }
                SemanticType::Boolean => {
                    filters.boolean.insert(column.clone(), None);
                }
                SemanticType::Date | SemanticType::Timestamp => {
                    if let Some(bounds) = tag.date_bounds() {
                        filters.date_range.insert(column.clone(), bounds);
                    }
                }
                SemanticType::Numeric => {}
            }
        }
        filters
    }

    /// Restores every filter to its neutral default.
    pub fn reset(&mut self, snapshot: &Snapshot, tags: &TagRegistry) {
        *self = FilterSet::defaults(snapshot, tags);
    }

    /// Applies the filters and returns the surviving rows.
    pub fn apply(&self, snapshot: &Snapshot, tags: &TagRegistry) -> Snapshot {
        let mut result = snapshot.clone();

        for (column, selected) in &self.text {
            let Some(value) = selected else { continue };
            let Some(col_idx) = result.column_index(column) else {
                continue;
            };
            result = result.retain_rows(|_, row| {
                matches!(row[col_idx].as_ref(), Some(Value::Text(s)) if s == value)
            });
        }

        for (column, selected) in &self.boolean {
            let Some(value) = selected else { continue };
            let Some(col_idx) = result.column_index(column) else {
                continue;
            };
            result = result.retain_rows(|_, row| {
                matches!(row[col_idx].as_ref(), Some(Value::Boolean(b)) if b == value)
            });
        }

        for (column, range) in &self.date_range {
            let Some(col_idx) = result.column_index(column) else {
                continue;
            };
            // An untouched range (still at the tagged bounds) filters nothing.
            if let Some(tag) = tags.get(column)
                && tag.date_bounds() == Some(*range)
            {
                continue;
            }
            if result.column_values(col_idx).all(|cell| cell.is_none()) {
                continue;
            }
            let (start, end) = *range;
            result = result.retain_rows(|_, row| {
                match cell_date(row[col_idx].as_ref()) {
                    Some(date) => date >= start && date <= end,
                    None => false,
                }
            });
        }

        result
    }
}

fn cell_date(cell: Option<&Value>) -> Option<NaiveDate> {
    match cell? {
        Value::Date(d) => Some(*d),
        Value::Timestamp(ts) => Some(ts.date()),
        Value::Text(raw) => parse_strict_date(raw)
            .or_else(|| parse_strict_timestamp(raw).map(|ts| ts.date())),
        _ => None,
    }
}
