//! Constraint validation of changed cells.
//!
//! A pure pass over the changed-cell set: every violation is collected (not
//! fail-fast) so the user can fix all problems in one save attempt, but any
//! non-empty result is a hard stop for the caller; nothing is partially
//! applied. Numeric limits are checked on exact decimals, never floats.

use std::collections::BTreeMap;
use std::str::FromStr;

use itertools::Itertools;
use rust_decimal::Decimal;

use crate::{
    catalog::{ColumnConstraint, DataKind},
    data::{Value, store_column_name},
    diff::ChangedCell,
};

/// Checks each changed column's new values against the declared constraints
/// and returns human-readable violation messages.
///
/// Columns are visited in first-appearance order and each column stops at its
/// first offending row, so a column with many bad rows reports one sample.
/// Columns absent from `constraints`, or of an unvalidated kind, pass.
pub fn validate_changes(cells: &[ChangedCell], constraints: &[ColumnConstraint]) -> Vec<String> {
    if cells.is_empty() || constraints.is_empty() {
        return Vec::new();
    }

    let by_store_name: BTreeMap<&str, &ColumnConstraint> = constraints
        .iter()
        .map(|c| (c.column_name.as_str(), c))
        .collect();

    let mut errors = Vec::new();
    for column in cells.iter().map(|c| c.column.as_str()).unique() {
        let store_name = store_column_name(column);
        let Some(constraint) = by_store_name.get(store_name.as_str()) else {
            continue;
        };
        let new_values = cells
            .iter()
            .filter(|c| c.column == column)
            .filter_map(|c| c.new.as_ref());
        match constraint.kind {
            DataKind::Char => {
                if let Some(max_length) = constraint.max_length
                    && let Some(message) = first_length_violation(column, max_length, new_values)
                {
                    errors.push(message);
                }
            }
            DataKind::Numeric => {
                if let Some(precision) = constraint.precision {
                    let scale = constraint.scale.unwrap_or(0);
                    if let Some(message) =
                        first_numeric_violation(column, precision, scale, new_values)
                    {
                        errors.push(message);
                    }
                }
            }
            DataKind::Other => {}
        }
    }
    errors
}

fn first_length_violation<'a>(
    column: &str,
    max_length: u32,
    new_values: impl Iterator<Item = &'a Value>,
) -> Option<String> {
    for value in new_values {
        let rendered = value.as_display();
        if rendered.chars().count() > max_length as usize {
            return Some(format!(
                "{column}: max length is {max_length}, received '{rendered}'"
            ));
        }
    }
    None
}

fn first_numeric_violation<'a>(
    column: &str,
    precision: u32,
    scale: u32,
    new_values: impl Iterator<Item = &'a Value>,
) -> Option<String> {
    for value in new_values {
        let rendered = value.as_display();
        let Some(decimal) = exact_decimal(value) else {
            return Some(format!(
                "{column}: value '{rendered}' is not a valid NUMBER({precision},{scale})"
            ));
        };
        let decimal = decimal.abs();

        let frac_digits = decimal.scale();
        let mantissa_digits = decimal.mantissa().unsigned_abs().to_string().len() as u32;
        let int_digits = mantissa_digits.saturating_sub(frac_digits);
        let total_digits = int_digits + frac_digits;
        let max_int_digits = precision.saturating_sub(scale);

        if frac_digits > scale {
            return Some(format!(
                "{column}: value '{rendered}' has scale {frac_digits} but max is {scale}"
            ));
        }
        if int_digits > max_int_digits || total_digits > precision {
            return Some(format!(
                "{column}: value '{rendered}' exceeds NUMBER({precision},{scale})"
            ));
        }
    }
    None
}

/// Exact decimal reading of a new value. Text is parsed as a plain or
/// scientific literal; non-numeric variants have no decimal form.
fn exact_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Integer(_) | Value::Decimal(_) => value.as_decimal(),
        Value::Text(raw) => {
            let trimmed = raw.trim();
            Decimal::from_str(trimmed)
                .ok()
                .or_else(|| Decimal::from_scientific(trimmed).ok())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(column: &str, new: Option<Value>) -> ChangedCell {
        ChangedCell {
            row: 0,
            key: vec![("Order ID".to_string(), Some(Value::Integer(1)))],
            column: column.to_string(),
            old: None,
            new,
        }
    }

    fn char_constraint(name: &str, max_length: u32) -> ColumnConstraint {
        ColumnConstraint {
            column_name: name.to_string(),
            kind: DataKind::Char,
            max_length: Some(max_length),
            precision: None,
            scale: None,
        }
    }

    fn number_constraint(name: &str, precision: u32, scale: u32) -> ColumnConstraint {
        ColumnConstraint {
            column_name: name.to_string(),
            kind: DataKind::Numeric,
            max_length: None,
            precision: Some(precision),
            scale: Some(scale),
        }
    }

    #[test]
    fn overlong_text_cites_column_limit_and_sample() {
        let cells = vec![changed(
            "Order Status",
            Some(Value::Text("AB".to_string())),
        )];
        let errors = validate_changes(&cells, &[char_constraint("ORDER_STATUS", 1)]);
        assert_eq!(
            errors,
            vec!["Order Status: max length is 1, received 'AB'".to_string()]
        );
    }

    #[test]
    fn one_sample_per_column_even_with_many_offenders() {
        let cells = vec![
            changed("Order Status", Some(Value::Text("AB".to_string()))),
            changed("Order Status", Some(Value::Text("CDE".to_string()))),
        ];
        let errors = validate_changes(&cells, &[char_constraint("ORDER_STATUS", 1)]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'AB'"));
    }

    #[test]
    fn scale_overflow_is_reported_before_precision() {
        let cells = vec![changed("Amount", crate::data::parse_cell("1.234"))];
        let errors = validate_changes(&cells, &[number_constraint("AMOUNT", 10, 2)]);
        assert_eq!(
            errors,
            vec!["Amount: value '1.234' has scale 3 but max is 2".to_string()]
        );
    }

    #[test]
    fn values_within_bounds_pass() {
        let cells = vec![
            changed("Amount", crate::data::parse_cell("12.34")),
            changed("Amount", Some(Value::Integer(99_999_999))),
        ];
        let errors = validate_changes(&cells, &[number_constraint("AMOUNT", 10, 2)]);
        assert!(errors.is_empty());
    }

    #[test]
    fn too_many_integer_digits_overflow_the_precision() {
        let cells = vec![changed("Amount", crate::data::parse_cell("123456789.00"))];
        let errors = validate_changes(&cells, &[number_constraint("AMOUNT", 10, 2)]);
        assert_eq!(
            errors,
            vec!["Amount: value '123456789.00' exceeds NUMBER(10,2)".to_string()]
        );
    }

    #[test]
    fn unparseable_numeric_text_is_a_conversion_violation() {
        let cells = vec![changed("Amount", Some(Value::Text("abc".to_string())))];
        let errors = validate_changes(&cells, &[number_constraint("AMOUNT", 10, 2)]);
        assert_eq!(
            errors,
            vec!["Amount: value 'abc' is not a valid NUMBER(10,2)".to_string()]
        );
    }

    #[test]
    fn unconstrained_columns_pass_through() {
        let cells = vec![changed("Notes", Some(Value::Text("anything at all".to_string())))];
        let errors = validate_changes(&cells, &[char_constraint("ORDER_STATUS", 1)]);
        assert!(errors.is_empty());
    }

    #[test]
    fn null_new_values_are_never_validated() {
        let cells = vec![changed("Order Status", None), changed("Amount", None)];
        let errors = validate_changes(
            &cells,
            &[
                char_constraint("ORDER_STATUS", 1),
                number_constraint("AMOUNT", 10, 2),
            ],
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn validation_does_not_mutate_its_input() {
        let cells = vec![changed("Amount", crate::data::parse_cell("1.234"))];
        let before = cells.clone();
        let _ = validate_changes(&cells, &[number_constraint("AMOUNT", 10, 2)]);
        assert_eq!(cells, before);
    }
}
