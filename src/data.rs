//! Cell value model and the display/store naming contract.
//!
//! Every cell in a [`crate::snapshot::Snapshot`] is an `Option<Value>` where
//! `None` represents null. Comparison across snapshots goes through
//! [`values_equal`], which normalizes representation differences (integer vs
//! decimal, date vs midnight timestamp) instead of comparing rendered strings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Strict timestamp format accepted when classifying temporal columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";
/// Strict date-only fallback format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Numeric reading of the value, if it has one.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Representation-insensitive equality: numerics compare by value across
    /// the Integer/Decimal variants, a Date equals a Timestamp at midnight of
    /// that date, everything else must match variant and payload.
    pub fn eq_normalized(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Date(d), Value::Timestamp(ts)) | (Value::Timestamp(ts), Value::Date(d)) => {
                d.and_time(NaiveTime::MIN) == *ts
            }
            _ => match (self.as_decimal(), other.as_decimal()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Null-aware normalized cell comparison: null equals null, nothing else.
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(left), Some(right)) => left.eq_normalized(right),
        _ => false,
    }
}

/// Parses one raw cell as loaded from a CSV snapshot.
///
/// Empty text is null. Integers and plain decimal literals become numeric
/// variants, `true`/`false` become booleans, and everything else stays text.
/// Temporal typing is decided column-wide by the tagger, never per cell here.
pub fn parse_cell(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    if looks_like_integer(raw)
        && let Ok(parsed) = raw.parse::<i64>()
    {
        return Some(Value::Integer(parsed));
    }
    if raw.contains('.')
        && let Ok(parsed) = Decimal::from_str(raw)
    {
        return Some(Value::Decimal(parsed));
    }
    if raw.eq_ignore_ascii_case("true") {
        return Some(Value::Boolean(true));
    }
    if raw.eq_ignore_ascii_case("false") {
        return Some(Value::Boolean(false));
    }
    Some(Value::Text(raw.to_string()))
}

fn looks_like_integer(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    // Zero-padded identifiers such as "007" stay text.
    digits.len() == 1 || !digits.starts_with('0')
}

/// Parses a value with the strict timestamp format, normalizing to UTC.
pub fn parse_strict_timestamp(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
}

/// Parses a value with the strict date-only format.
pub fn parse_strict_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

/// Renders a display column name in store-native form: uppercase, spaces
/// replaced by underscores. This is the sole naming contract at the UI/store
/// boundary.
pub fn store_column_name(display: &str) -> String {
    display.to_uppercase().replace(' ', "_")
}

/// Inverse of [`store_column_name`]: underscore-separated store names become
/// space-separated words, each capitalized, with the token `id` rendered `ID`.
pub fn display_column_name(store: &str) -> String {
    store
        .split('_')
        .map(|word| {
            if word.eq_ignore_ascii_case("id") {
                "ID".to_string()
            } else {
                capitalize(word)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
    }
}
