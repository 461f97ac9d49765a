//! Output rows and row-key derivation
//!
//! A row is one logical output record inside a template instance. Multiple
//! source documents can merge into the same row when they share a row key
//! (the business key extracted from a configurable source field).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Validation outcome of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    /// Zero field errors across the target schema
    Valid,
    /// At least one field error
    Invalid,
}

/// One logical output record within a template instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Row identifier
    pub id: String,

    /// Business key the row is merged on
    pub row_key: String,

    /// Target field values
    pub field_values: Map<String, Value>,

    /// Documents that contributed to this row
    pub source_document_ids: BTreeSet<String>,

    /// Per-field validation errors; `None` when the row is valid
    pub validation_errors: Option<BTreeMap<String, String>>,

    /// Validation status
    pub status: RowStatus,

    /// Insertion-ordered position, stable once assigned
    pub row_index: usize,
}

impl Row {
    /// Create an empty row at the given position.
    pub fn new(row_key: impl Into<String>, row_index: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            row_key: row_key.into(),
            field_values: Map::new(),
            source_document_ids: BTreeSet::new(),
            validation_errors: None,
            status: RowStatus::Valid,
            row_index,
        }
    }

    /// Merge incoming field values into this row.
    ///
    /// An incoming value only overwrites an existing field when the
    /// existing value is null or an empty string; populated fields are
    /// never silently replaced.
    pub fn merge_fields(&mut self, incoming: &Map<String, Value>) {
        for (field, value) in incoming {
            if is_empty_value(self.field_values.get(field)) {
                self.field_values.insert(field.clone(), value.clone());
            }
        }
    }

    /// Record a validation outcome, setting status accordingly.
    pub fn set_validation(&mut self, errors: BTreeMap<String, String>) {
        if errors.is_empty() {
            self.validation_errors = None;
            self.status = RowStatus::Valid;
        } else {
            self.validation_errors = Some(errors);
            self.status = RowStatus::Invalid;
        }
    }
}

/// Whether a field slot counts as empty for merge and required-field
/// purposes: absent, JSON null, or an empty/whitespace-only string.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Extract the row key from a document's fields, if present and non-empty.
pub fn row_key_from(extracted: &Map<String, Value>, row_key_field: &str) -> Option<String> {
    let value = extracted.get(row_key_field)?;
    if is_empty_value(Some(value)) {
        return None;
    }
    Some(crate::transform::value_to_string(value).trim().to_string())
}

/// Fallback key for documents without a business key: epoch milliseconds
/// plus a short random suffix, unique enough that two keyless documents
/// never merge into the same row.
pub fn generated_row_key() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("gen-{}-{}", millis, &suffix[..8])
}
