//! Transform executor
//!
//! Applies one mapping rule to the source values pulled from a document.
//! Pure and side-effect free: no I/O, no shared state. `Ok(None)` means
//! "no value to write for this target field", which is distinct from a
//! null or empty-string output.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};
use crate::formula;
use crate::rules::{LookupEntry, MappingRule, TransformKind};

/// Execute a rule against its source values.
///
/// `sources` is aligned positionally with `rule.source_fields`; fields the
/// document did not supply are `Value::Null`. `row_ctx` is the document's
/// full extracted field map, used to resolve FORMULA and CUSTOM
/// placeholders that reference fields outside the rule's source list.
pub fn execute(
    rule: &MappingRule,
    sources: &[Value],
    row_ctx: &Map<String, Value>,
) -> Result<Option<Value>> {
    match &rule.transform {
        TransformKind::Direct => Ok(direct(sources)),
        TransformKind::Concat { separator } => concat(rule, sources, separator),
        TransformKind::Split { delimiter, index } => Ok(split(sources, delimiter, *index)),
        TransformKind::Lookup {
            table,
            case_sensitive,
            default_value,
        } => Ok(lookup(sources, table, *case_sensitive, default_value)),
        TransformKind::Formula { expression } => formula_transform(expression, row_ctx).map(Some),
        TransformKind::Custom { expression } => {
            custom(rule, expression, sources, row_ctx).map(Some)
        }
    }
}

/// Render a JSON value the way it appears in a cell: strings unquoted,
/// null as empty.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn direct(sources: &[Value]) -> Option<Value> {
    match sources.first() {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.clone()),
    }
}

fn concat(rule: &MappingRule, sources: &[Value], separator: &str) -> Result<Option<Value>> {
    // Arity is enforced at config validation; a short source list here
    // means the rule bypassed validation.
    if sources.len() < 2 {
        return Err(Error::ConfigInvalid {
            message: format!(
                "CONCAT rule for '{}' requires at least 2 source fields",
                rule.target_field
            ),
        });
    }
    let joined = sources
        .iter()
        .map(value_to_string)
        .collect::<Vec<_>>()
        .join(separator);
    Ok(Some(Value::String(joined)))
}

fn split(sources: &[Value], delimiter: &str, index: usize) -> Option<Value> {
    let source = sources.first()?;
    if source.is_null() {
        return None;
    }
    let text = value_to_string(source);
    let token = text
        .split(delimiter)
        .nth(index)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    Some(Value::String(token))
}

fn lookup(
    sources: &[Value],
    table: &[LookupEntry],
    case_sensitive: bool,
    default_value: &str,
) -> Option<Value> {
    let source = sources.first()?;
    if source.is_null() {
        return None;
    }
    let key = value_to_string(source);
    let found = table.iter().find(|entry| {
        if case_sensitive {
            entry.key == key
        } else {
            entry.key.eq_ignore_ascii_case(&key)
        }
    });
    let value = found
        .map(|entry| entry.value.clone())
        .unwrap_or_else(|| default_value.to_string());
    Some(Value::String(value))
}

fn formula_transform(expression: &str, row_ctx: &Map<String, Value>) -> Result<Value> {
    let mut vars = HashMap::new();
    for name in formula::placeholders(expression)? {
        let value = row_ctx.get(&name).unwrap_or(&Value::Null);
        let number = coerce_number(value).ok_or_else(|| Error::Transform {
            transform: "FORMULA".to_string(),
            message: format!(
                "field '{}' value {:?} is not numeric",
                name,
                value_to_string(value)
            ),
        })?;
        vars.insert(name, number);
    }
    let result = formula::eval(expression, &vars)?;
    Ok(number_value(result))
}

/// Coerce a field value to f64 for formula evaluation. Strings are parsed
/// after stripping currency symbols and thousands separators.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '$' | '€' | '£' | ','))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse().ok()
            }
        }
        _ => None,
    }
}

/// Integral results render as JSON integers to avoid `3.0` artifacts in
/// downstream concatenations and exports.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn custom(
    rule: &MappingRule,
    expression: &str,
    sources: &[Value],
    row_ctx: &Map<String, Value>,
) -> Result<Value> {
    let mut output = String::new();
    let mut rest = expression;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| Error::Transform {
            transform: "CUSTOM".to_string(),
            message: format!("unterminated ${{...}} token in '{}'", expression),
        })?;
        let name = &after[..end];

        // Resolve first against the rule's declared sources, then against
        // the full document context.
        let position = rule.source_fields.iter().position(|f| f == name);
        let value = match position.and_then(|i| sources.get(i)) {
            Some(v) if !v.is_null() => Some(v),
            _ => row_ctx.get(name).filter(|v| !v.is_null()),
        };
        let value = value.ok_or_else(|| Error::Transform {
            transform: "CUSTOM".to_string(),
            message: format!("no value for field '{}'", name),
        })?;
        output.push_str(&value_to_string(value));
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(Value::String(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(sources: &[&str], target: &str, transform: TransformKind) -> MappingRule {
        MappingRule {
            source_fields: sources.iter().map(|s| s.to_string()).collect(),
            target_field: target.to_string(),
            transform,
            order: 0,
            is_required: false,
            priority: 0,
        }
    }

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_direct_copies_first_source() {
        let r = rule(&["inv_no"], "invoiceNumber", TransformKind::Direct);
        let result = execute(&r, &[json!("INV-001")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("INV-001")));
    }

    #[test]
    fn test_direct_absent_source_yields_none() {
        let r = rule(&["inv_no"], "invoiceNumber", TransformKind::Direct);
        assert_eq!(execute(&r, &[Value::Null], &Map::new()).unwrap(), None);
        assert_eq!(execute(&r, &[], &Map::new()).unwrap(), None);
    }

    #[test]
    fn test_direct_preserves_non_string_values() {
        let r = rule(&["total"], "total", TransformKind::Direct);
        let result = execute(&r, &[json!(42.5)], &Map::new()).unwrap();
        assert_eq!(result, Some(json!(42.5)));
    }

    #[test]
    fn test_concat_joins_with_separator() {
        let r = rule(
            &["first", "last"],
            "name",
            TransformKind::Concat {
                separator: ", ".to_string(),
            },
        );
        let result = execute(&r, &[json!("Doe"), json!("Jane")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("Doe, Jane")));
    }

    #[test]
    fn test_concat_null_source_joins_as_empty() {
        let r = rule(
            &["a", "b"],
            "t",
            TransformKind::Concat {
                separator: "-".to_string(),
            },
        );
        let result = execute(&r, &[json!("x"), Value::Null], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("x-")));
    }

    #[test]
    fn test_concat_single_source_is_config_error() {
        let r = rule(
            &["only"],
            "t",
            TransformKind::Concat {
                separator: " ".to_string(),
            },
        );
        let err = execute(&r, &[json!("x")], &Map::new()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn test_split_takes_trimmed_token() {
        let r = rule(
            &["address"],
            "city",
            TransformKind::Split {
                delimiter: ",".to_string(),
                index: 1,
            },
        );
        let result = execute(&r, &[json!("12 Main St, Springfield , IL")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("Springfield")));
    }

    #[test]
    fn test_split_out_of_range_yields_empty_string() {
        let r = rule(
            &["address"],
            "zip",
            TransformKind::Split {
                delimiter: ",".to_string(),
                index: 9,
            },
        );
        let result = execute(&r, &[json!("only one part")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("")));
    }

    #[test]
    fn test_lookup_hit() {
        let r = rule(
            &["country"],
            "countryName",
            TransformKind::Lookup {
                table: vec![LookupEntry {
                    key: "US".to_string(),
                    value: "USA".to_string(),
                }],
                case_sensitive: true,
                default_value: String::new(),
            },
        );
        let result = execute(&r, &[json!("US")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("USA")));
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let r = rule(
            &["country"],
            "countryName",
            TransformKind::Lookup {
                table: vec![LookupEntry {
                    key: "US".to_string(),
                    value: "USA".to_string(),
                }],
                case_sensitive: false,
                default_value: String::new(),
            },
        );
        let result = execute(&r, &[json!("us")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("USA")));
    }

    #[test]
    fn test_lookup_miss_uses_default() {
        let r = rule(
            &["country"],
            "countryName",
            TransformKind::Lookup {
                table: vec![LookupEntry {
                    key: "US".to_string(),
                    value: "USA".to_string(),
                }],
                case_sensitive: true,
                default_value: "Unknown".to_string(),
            },
        );
        let result = execute(&r, &[json!("FR")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("Unknown")));
        // Case-sensitive by default: "us" != "US"
        let result = execute(&r, &[json!("us")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("Unknown")));
    }

    #[test]
    fn test_formula_evaluates_against_context() {
        let r = rule(
            &["quantity"],
            "lineTotal",
            TransformKind::Formula {
                expression: "{quantity} * {unitPrice}".to_string(),
            },
        );
        let ctx = ctx(json!({"quantity": 3, "unitPrice": "9.50"}));
        let result = execute(&r, &[json!(3)], &ctx).unwrap();
        assert_eq!(result, Some(json!(28.5)));
    }

    #[test]
    fn test_formula_integral_result_is_integer() {
        let r = rule(
            &["a"],
            "t",
            TransformKind::Formula {
                expression: "{a} + {b}".to_string(),
            },
        );
        let ctx = ctx(json!({"a": 1, "b": 2}));
        assert_eq!(execute(&r, &[json!(1)], &ctx).unwrap(), Some(json!(3)));
    }

    #[test]
    fn test_formula_strips_currency_symbols() {
        let r = rule(
            &["amount"],
            "t",
            TransformKind::Formula {
                expression: "{amount} * 2".to_string(),
            },
        );
        let ctx = ctx(json!({"amount": "$1,250.50"}));
        assert_eq!(execute(&r, &[json!(0)], &ctx).unwrap(), Some(json!(2501)));
    }

    #[test]
    fn test_formula_non_numeric_field_is_transform_error() {
        let r = rule(
            &["a"],
            "t",
            TransformKind::Formula {
                expression: "{a} + 1".to_string(),
            },
        );
        let ctx = ctx(json!({"a": "not a number"}));
        let err = execute(&r, &[json!("not a number")], &ctx).unwrap_err();
        assert_eq!(err.code(), "TRANSFORM_FAILED");
    }

    #[test]
    fn test_custom_substitutes_tokens() {
        let r = rule(
            &["number"],
            "reference",
            TransformKind::Custom {
                expression: "INV-${number}/${year}".to_string(),
            },
        );
        let ctx = ctx(json!({"number": "0042", "year": 2026}));
        let result = execute(&r, &[json!("0042")], &ctx).unwrap();
        assert_eq!(result, Some(json!("INV-0042/2026")));
    }

    #[test]
    fn test_custom_unknown_token_is_transform_error() {
        let r = rule(
            &["number"],
            "reference",
            TransformKind::Custom {
                expression: "${nowhere}".to_string(),
            },
        );
        let err = execute(&r, &[json!("x")], &Map::new()).unwrap_err();
        assert_eq!(err.code(), "TRANSFORM_FAILED");
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_custom_without_tokens_is_literal() {
        let r = rule(
            &["a"],
            "t",
            TransformKind::Custom {
                expression: "fixed value".to_string(),
            },
        );
        let result = execute(&r, &[json!("ignored")], &Map::new()).unwrap();
        assert_eq!(result, Some(json!("fixed value")));
    }
}
