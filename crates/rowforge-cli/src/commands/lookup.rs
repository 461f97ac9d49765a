//! Import a CSV lookup table as a LOOKUP rule snippet

use std::collections::HashSet;

use anyhow::{Context, Result};

use rowforge_core::rules::{LookupEntry, MappingRule, TransformKind};

/// Run the lookup import command, printing the YAML rule to stdout.
#[allow(clippy::too_many_arguments)]
pub async fn import(
    csv_path: &str,
    source: &str,
    target: &str,
    key_column: &str,
    value_column: &str,
    case_insensitive: bool,
    default: Option<&str>,
) -> Result<()> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path))?;

    let headers = reader.headers().context("Failed to read CSV headers")?;
    let key_idx = headers
        .iter()
        .position(|h| h == key_column)
        .with_context(|| format!("CSV has no '{}' column", key_column))?;
    let value_idx = headers
        .iter()
        .position(|h| h == value_column)
        .with_context(|| format!("CSV has no '{}' column", value_column))?;

    let mut table = Vec::new();
    let mut seen = HashSet::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Invalid CSV row {}", row_no + 2))?;
        let key = record
            .get(key_idx)
            .with_context(|| format!("Row {} is missing the key column", row_no + 2))?
            .trim()
            .to_string();
        let value = record
            .get(value_idx)
            .with_context(|| format!("Row {} is missing the value column", row_no + 2))?
            .trim()
            .to_string();
        if key.is_empty() {
            anyhow::bail!("Row {} has an empty key", row_no + 2);
        }
        let folded = if case_insensitive {
            key.to_ascii_lowercase()
        } else {
            key.clone()
        };
        if !seen.insert(folded) {
            anyhow::bail!("Duplicate lookup key '{}' on row {}", key, row_no + 2);
        }
        table.push(LookupEntry { key, value });
    }
    if table.is_empty() {
        anyhow::bail!("CSV contains no lookup entries");
    }
    tracing::info!("Imported {} lookup entries from {}", table.len(), csv_path);

    let rule = MappingRule {
        source_fields: vec![source.to_string()],
        target_field: target.to_string(),
        transform: TransformKind::Lookup {
            table,
            case_sensitive: !case_insensitive,
            default_value: default.unwrap_or_default().to_string(),
        },
        order: 0,
        is_required: false,
        priority: 0,
    };
    rule.validate()
        .context("Imported table produced an invalid rule")?;

    // Snippet goes to stdout so it can be pasted into a config file
    println!("{}", serde_yaml::to_string(&vec![rule])?);
    Ok(())
}
