//! Tier-merge resolution of mapping configurations
//!
//! Candidates from all three scopes merge into one flat rule set: iterate
//! from the lowest scope rank to the highest, inserting each rule into a
//! map keyed by target field. A later insertion replaces the whole earlier
//! rule for that key: the highest tier wins, and replacement is always
//! whole-rule, never a field-level parameter merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rules::{MappingConfig, MappingRule};
use crate::schema::TargetSchemaField;

/// The merged, ordered rule set for one (template, company, format) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMappingConfig {
    /// Template the rules apply to
    pub template_id: String,

    /// Company the resolution was performed for
    pub company_id: Option<String>,

    /// Document format the resolution was performed for
    pub document_format_id: Option<String>,

    /// Flattened rules, sorted by `order`; target fields are unique
    pub rules: Vec<MappingRule>,

    /// Ids of the configs that contributed, lowest tier first
    pub resolved_from: Vec<String>,
}

/// Merge candidate configurations into a resolved rule set.
///
/// Inactive and non-applicable configs are filtered out here even when the
/// store query has already pre-filtered them. Within one scope
/// rank, candidates merge in ascending `priority` order so the highest
/// priority config inserts last and wins; equal priorities fall back to
/// config id order to keep resolution deterministic.
pub fn merge_configs(
    template_id: &str,
    company_id: Option<&str>,
    format_id: Option<&str>,
    configs: &[MappingConfig],
) -> ResolvedMappingConfig {
    let mut candidates: Vec<&MappingConfig> = configs
        .iter()
        .filter(|c| {
            c.is_active && c.template_id == template_id && c.applies_to(company_id, format_id)
        })
        .collect();
    candidates.sort_by(|a, b| {
        a.scope
            .rank()
            .cmp(&b.scope.rank())
            .then(a.priority.cmp(&b.priority))
            .then(a.id.cmp(&b.id))
    });

    let mut merged: BTreeMap<&str, &MappingRule> = BTreeMap::new();
    let mut resolved_from = Vec::with_capacity(candidates.len());
    for config in &candidates {
        resolved_from.push(config.id.clone());
        for rule in &config.rules {
            merged.insert(rule.target_field.as_str(), rule);
        }
    }

    let mut rules: Vec<MappingRule> = merged.into_values().cloned().collect();
    rules.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.target_field.cmp(&b.target_field))
    });

    tracing::debug!(
        template_id,
        configs = resolved_from.len(),
        rules = rules.len(),
        "resolved mapping configuration"
    );

    ResolvedMappingConfig {
        template_id: template_id.to_string(),
        company_id: company_id.map(str::to_string),
        document_format_id: format_id.map(str::to_string),
        rules,
        resolved_from,
    }
}

/// Per-rule parameter error found during mapping validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleError {
    /// Target field of the offending rule
    pub target_field: String,
    /// What is wrong with it
    pub message: String,
}

/// Result of checking a resolved rule set against a target schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingValidation {
    /// Schema-required fields no rule populates
    pub missing_required: Vec<String>,
    /// Structurally invalid rules
    pub rule_errors: Vec<RuleError>,
}

impl MappingValidation {
    /// Whether the mapping is fit to run.
    pub fn is_valid(&self) -> bool {
        self.missing_required.is_empty() && self.rule_errors.is_empty()
    }
}

/// Check that a resolved rule set covers every schema-required field and
/// that each rule's transform parameters are individually well-formed.
/// Run before allowing a matching run.
pub fn validate_mapping(
    resolved: &ResolvedMappingConfig,
    schema: &[TargetSchemaField],
) -> MappingValidation {
    let missing_required = schema
        .iter()
        .filter(|field| field.is_required)
        .filter(|field| !resolved.rules.iter().any(|r| r.target_field == field.name))
        .map(|field| field.name.clone())
        .collect();

    let rule_errors = resolved
        .rules
        .iter()
        .filter_map(|rule| {
            rule.validate().err().map(|err| RuleError {
                target_field: rule.target_field.clone(),
                message: err.to_string(),
            })
        })
        .collect();

    MappingValidation {
        missing_required,
        rule_errors,
    }
}
