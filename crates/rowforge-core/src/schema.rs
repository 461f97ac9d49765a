//! Target schema fields and row validation
//!
//! A template owns an ordered list of [`TargetSchemaField`] definitions.
//! The row validator checks a transformed value set against every schema
//! field, not just the fields an incoming document supplied, because merge
//! means a row can have required fields already satisfied by a prior
//! document.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::row::is_empty_value;
use crate::transform::value_to_string;

/// Data type of a target field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free text
    String,
    /// Numeric value (integers and decimals)
    Number,
    /// Calendar date
    Date,
    /// True/false
    Boolean,
    /// Monetary amount; accepts currency symbols and thousands separators
    Currency,
    /// JSON array
    Array,
}

/// Constraint set applied after the type check passes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    /// Regex the string representation must match
    #[serde(default)]
    pub pattern: Option<String>,

    /// Minimum numeric value (number/currency fields)
    #[serde(default)]
    pub min: Option<f64>,

    /// Maximum numeric value (number/currency fields)
    #[serde(default)]
    pub max: Option<f64>,

    /// Minimum string length
    #[serde(default)]
    pub min_length: Option<usize>,

    /// Maximum string length
    #[serde(default)]
    pub max_length: Option<usize>,

    /// Closed set of allowed values (string representations)
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

/// One field definition of a target template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSchemaField {
    /// Field name (the target of mapping rules)
    pub name: String,

    /// Expected data type
    pub data_type: FieldType,

    /// Whether a row must carry a value for this field
    #[serde(default)]
    pub is_required: bool,

    /// Optional constraints
    #[serde(default)]
    pub validation: Option<FieldValidation>,
}

/// Validate a row's field values against a schema.
///
/// Returns one error message per failing field; an empty map means the row
/// is valid. Per field the checks run in order: required, type coercion,
/// then constraints (pattern, length bounds, numeric range, allowed set).
/// The first violation wins.
pub fn validate_row(
    field_values: &Map<String, Value>,
    schema: &[TargetSchemaField],
) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();

    for field in schema {
        let value = field_values.get(&field.name);

        if is_empty_value(value) {
            if field.is_required {
                errors.insert(field.name.clone(), "required field is missing".to_string());
            }
            continue;
        }
        let Some(value) = value else { continue };

        if let Err(message) = check_type(value, field.data_type) {
            errors.insert(field.name.clone(), message);
            continue;
        }

        if let Some(validation) = &field.validation
            && let Err(message) = check_constraints(value, field.data_type, validation)
        {
            errors.insert(field.name.clone(), message);
        }
    }

    errors
}

fn check_type(value: &Value, data_type: FieldType) -> Result<(), String> {
    match data_type {
        FieldType::String => match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
            _ => Err("expected a text value".to_string()),
        },
        FieldType::Number => numeric_value(value, false)
            .map(|_| ())
            .ok_or_else(|| format!("'{}' is not a number", value_to_string(value))),
        FieldType::Currency => numeric_value(value, true)
            .map(|_| ())
            .ok_or_else(|| format!("'{}' is not a currency amount", value_to_string(value))),
        FieldType::Date => {
            let text = value_to_string(value);
            if parse_date(&text).is_some() {
                Ok(())
            } else {
                Err(format!("'{}' is not a recognized date", text))
            }
        }
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            Value::String(s) => {
                let folded = s.trim().to_ascii_lowercase();
                if matches!(folded.as_str(), "true" | "false" | "yes" | "no" | "1" | "0") {
                    Ok(())
                } else {
                    Err(format!("'{}' is not a boolean", s))
                }
            }
            Value::Number(n) => {
                if n.as_i64() == Some(0) || n.as_i64() == Some(1) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not a boolean", n))
                }
            }
            _ => Err("expected a boolean value".to_string()),
        },
        FieldType::Array => {
            if value.is_array() {
                Ok(())
            } else {
                Err("expected an array value".to_string())
            }
        }
    }
}

fn check_constraints(
    value: &Value,
    data_type: FieldType,
    validation: &FieldValidation,
) -> Result<(), String> {
    let text = value_to_string(value);

    if let Some(pattern) = &validation.pattern {
        let re = regex::Regex::new(pattern)
            .map_err(|_| format!("invalid validation pattern '{}'", pattern))?;
        if !re.is_match(&text) {
            return Err(format!("'{}' does not match pattern '{}'", text, pattern));
        }
    }

    if let Some(min_length) = validation.min_length
        && text.chars().count() < min_length
    {
        return Err(format!("shorter than minimum length {}", min_length));
    }
    if let Some(max_length) = validation.max_length
        && text.chars().count() > max_length
    {
        return Err(format!("longer than maximum length {}", max_length));
    }

    if validation.min.is_some() || validation.max.is_some() {
        let lenient = data_type == FieldType::Currency;
        if let Some(number) = numeric_value(value, lenient) {
            if let Some(min) = validation.min
                && number < min
            {
                return Err(format!("{} is below minimum {}", number, min));
            }
            if let Some(max) = validation.max
                && number > max
            {
                return Err(format!("{} is above maximum {}", number, max));
            }
        }
    }

    if !validation.allowed_values.is_empty() && !validation.allowed_values.contains(&text) {
        return Err(format!(
            "'{}' is not one of the allowed values [{}]",
            text,
            validation.allowed_values.join(", ")
        ));
    }

    Ok(())
}

fn numeric_value(value: &Value, strip_currency: bool) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let cleaned: String = if strip_currency {
                trimmed
                    .chars()
                    .filter(|c| !matches!(c, '$' | '€' | '£' | ','))
                    .collect()
            } else {
                trimmed.to_string()
            };
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse().ok()
            }
        }
        _ => None,
    }
}

/// Accepted date shapes: RFC 3339, ISO `YYYY-MM-DD`, `DD/MM/YYYY`,
/// `MM/DD/YYYY`.
fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}
