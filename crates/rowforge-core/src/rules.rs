//! Mapping rule and configuration model
//!
//! A `MappingRule` maps one or more source document fields onto a single
//! target template field through a typed transform. Rules live inside
//! `MappingConfig` containers bound to one of three override scopes:
//!
//! - `GLOBAL`: applies to every document matched against the template
//! - `COMPANY`: applies to one company's documents
//! - `FORMAT`: applies to one document format of one company
//!
//! Higher scopes fully replace lower-scope rules for the same target field
//! during resolution (see [`crate::resolver`]).
//!
//! # Example
//!
//! ```yaml
//! id: cfg-global
//! name: Invoice defaults
//! scope: GLOBAL
//! templateId: tpl-invoice
//! rules:
//!   - sourceFields: [inv_no]
//!     targetField: invoiceNumber
//!     transformType: DIRECT
//!   - sourceFields: [first_name, last_name]
//!     targetField: contactName
//!     transformType: CONCAT
//!     transformParams:
//!       separator: " "
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::formula;

/// One key/value pair of a LOOKUP substitution table.
///
/// Tables are stored as ordered entries rather than a map so that duplicate
/// keys survive deserialization and can be rejected at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    /// Lookup key matched against the source value
    pub key: String,
    /// Replacement value
    pub value: String,
}

/// Per-field transform, tagged by kind with kind-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transformType", content = "transformParams")]
pub enum TransformKind {
    /// Copy the first source value unchanged
    #[serde(rename = "DIRECT")]
    Direct,

    /// Join all source values with a separator
    #[serde(rename = "CONCAT")]
    Concat {
        /// Separator between joined values
        #[serde(default = "default_separator")]
        separator: String,
    },

    /// Split the first source value and take one token
    #[serde(rename = "SPLIT")]
    Split {
        /// Delimiter to split on
        delimiter: String,
        /// 0-based token index; out of range yields an empty string
        #[serde(default)]
        index: usize,
    },

    /// Substitute the source value through a translation table
    #[serde(rename = "LOOKUP")]
    Lookup {
        /// Translation table entries (keys must be unique)
        table: Vec<LookupEntry>,
        /// Whether key matching is case-sensitive
        #[serde(default = "default_true", rename = "caseSensitive")]
        case_sensitive: bool,
        /// Value used when the key is not in the table
        #[serde(default, rename = "defaultValue")]
        default_value: String,
    },

    /// Arithmetic expression over `{fieldName}` placeholders
    #[serde(rename = "FORMULA")]
    Formula {
        /// Expression in the [`crate::formula`] grammar
        expression: String,
    },

    /// Restricted `${fieldName}` template substitution
    #[serde(rename = "CUSTOM")]
    Custom {
        /// Template with `${fieldName}` tokens
        expression: String,
    },
}

fn default_separator() -> String {
    " ".to_string()
}

fn default_true() -> bool {
    true
}

impl TransformKind {
    /// Kind name as stored (`DIRECT`, `CONCAT`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "DIRECT",
            Self::Concat { .. } => "CONCAT",
            Self::Split { .. } => "SPLIT",
            Self::Lookup { .. } => "LOOKUP",
            Self::Formula { .. } => "FORMULA",
            Self::Custom { .. } => "CUSTOM",
        }
    }
}

/// One source→target transformation directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    /// Source document fields, in order (at least one; CONCAT needs two)
    pub source_fields: Vec<String>,

    /// Target template field this rule populates
    pub target_field: String,

    /// Transform applied to the source values
    #[serde(flatten)]
    pub transform: TransformKind,

    /// Execution and tie-break precedence within a resolved rule set
    #[serde(default)]
    pub order: i32,

    /// Whether the target field must receive a value
    #[serde(default)]
    pub is_required: bool,

    /// Same-tier ordering between configs (higher wins)
    #[serde(default)]
    pub priority: i32,
}

impl MappingRule {
    /// Check the rule's structural parameters.
    ///
    /// Called when a configuration is created or updated, before any
    /// matching run may use it. Execution assumes a validated rule.
    pub fn validate(&self) -> Result<()> {
        if self.target_field.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                message: "rule has an empty target field".to_string(),
            });
        }
        if self.source_fields.is_empty()
            || self.source_fields.iter().any(|f| f.trim().is_empty())
        {
            return Err(Error::ConfigInvalid {
                message: format!(
                    "rule for '{}' must name at least one non-empty source field",
                    self.target_field
                ),
            });
        }

        match &self.transform {
            TransformKind::Direct => Ok(()),
            TransformKind::Concat { .. } => {
                if self.source_fields.len() < 2 {
                    return Err(Error::ConfigInvalid {
                        message: format!(
                            "CONCAT rule for '{}' requires at least 2 source fields, got {}",
                            self.target_field,
                            self.source_fields.len()
                        ),
                    });
                }
                Ok(())
            }
            TransformKind::Split { delimiter, .. } => {
                if delimiter.is_empty() {
                    return Err(Error::ConfigInvalid {
                        message: format!(
                            "SPLIT rule for '{}' has an empty delimiter",
                            self.target_field
                        ),
                    });
                }
                Ok(())
            }
            TransformKind::Lookup {
                table,
                case_sensitive,
                ..
            } => {
                let mut seen = HashSet::new();
                for entry in table {
                    let key = if *case_sensitive {
                        entry.key.clone()
                    } else {
                        entry.key.to_lowercase()
                    };
                    if !seen.insert(key) {
                        return Err(Error::ConfigInvalid {
                            message: format!(
                                "LOOKUP rule for '{}' has duplicate key '{}'",
                                self.target_field, entry.key
                            ),
                        });
                    }
                }
                Ok(())
            }
            TransformKind::Formula { expression } => formula::validate(expression),
            TransformKind::Custom { expression } => validate_custom_expression(expression),
        }
    }
}

/// Check that every `${...}` token in a CUSTOM expression is a well-formed
/// field name.
fn validate_custom_expression(expression: &str) -> Result<()> {
    let mut rest = expression;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(Error::ConfigInvalid {
                message: format!("unterminated ${{...}} token in '{}'", expression),
            });
        };
        let name = &after[..end];
        let well_formed = !name.is_empty()
            && !name.chars().next().is_some_and(|c| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !well_formed {
            return Err(Error::ConfigInvalid {
                message: format!("invalid field name '{}' in '{}'", name, expression),
            });
        }
        rest = &after[end + 1..];
    }
    Ok(())
}

/// Override scope of a mapping configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigScope {
    /// Applies to every document of the template
    Global,
    /// Applies to one company
    Company,
    /// Applies to one document format of one company
    Format,
}

impl ConfigScope {
    /// Precedence rank: FORMAT(3) > COMPANY(2) > GLOBAL(1)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Global => 1,
            Self::Company => 2,
            Self::Format => 3,
        }
    }
}

/// A named container of mapping rules bound to one scope.
///
/// Read-only from the matching engine's perspective; authored and mutated
/// only through the configuration store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    /// Configuration identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Override scope
    pub scope: ConfigScope,

    /// Template this configuration belongs to
    pub template_id: String,

    /// Company binding (required for COMPANY and FORMAT scope)
    #[serde(default)]
    pub company_id: Option<String>,

    /// Document format binding (required for FORMAT scope)
    #[serde(default)]
    pub document_format_id: Option<String>,

    /// Rules in this configuration
    #[serde(default)]
    pub rules: Vec<MappingRule>,

    /// Tie-break between configs of the same scope (higher wins)
    #[serde(default)]
    pub priority: i32,

    /// Soft-delete flag; inactive configs never contribute to resolution
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl MappingConfig {
    /// Validate scope bindings and every contained rule.
    pub fn validate(&self) -> Result<()> {
        match self.scope {
            ConfigScope::Global => {}
            ConfigScope::Company => {
                if self.company_id.is_none() {
                    return Err(Error::ConfigInvalid {
                        message: format!("COMPANY config '{}' is missing companyId", self.id),
                    });
                }
            }
            ConfigScope::Format => {
                if self.company_id.is_none() || self.document_format_id.is_none() {
                    return Err(Error::ConfigInvalid {
                        message: format!(
                            "FORMAT config '{}' requires both companyId and documentFormatId",
                            self.id
                        ),
                    });
                }
            }
        }

        let mut targets = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !targets.insert(rule.target_field.as_str()) {
                return Err(Error::ConfigInvalid {
                    message: format!(
                        "config '{}' maps target field '{}' more than once",
                        self.id, rule.target_field
                    ),
                });
            }
        }
        Ok(())
    }

    /// Whether this config applies to the given (company, format) pair.
    pub fn applies_to(&self, company_id: Option<&str>, format_id: Option<&str>) -> bool {
        match self.scope {
            ConfigScope::Global => true,
            ConfigScope::Company => self.company_id.as_deref() == company_id,
            ConfigScope::Format => {
                self.company_id.as_deref() == company_id
                    && self.document_format_id.as_deref() == format_id
            }
        }
    }
}
