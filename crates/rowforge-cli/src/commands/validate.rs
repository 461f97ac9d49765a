//! Validate mapping configurations command

use anyhow::{Context, Result};

use rowforge_core::resolver::{merge_configs, validate_mapping};

use crate::project::Project;

/// Run the validate command
pub async fn run(config_path: &str, company: Option<&str>, format: Option<&str>) -> Result<()> {
    tracing::info!("Validating project: {}", config_path);

    let project = Project::load(config_path).context("Failed to load project")?;
    tracing::info!("✓ Project: {}", project.file.name);
    tracing::info!("✓ Template: {}", project.file.template_id);
    tracing::info!("✓ Schema fields: {}", project.schema.len());

    let mut failed = false;
    for config in &project.configs {
        match config.validate() {
            Ok(()) => tracing::info!("✓ Config '{}' is valid", config.id),
            Err(err) => {
                tracing::error!("✗ Config '{}': {}", config.id, err);
                failed = true;
            }
        }
    }

    let resolved = merge_configs(
        &project.file.template_id,
        company,
        format,
        &project.configs,
    );
    tracing::info!(
        "✓ Resolved {} rule(s) from {} config(s)",
        resolved.rules.len(),
        resolved.resolved_from.len()
    );

    let validation = validate_mapping(&resolved, &project.schema);
    for field in &validation.missing_required {
        tracing::error!("✗ Required field '{}' has no mapping rule", field);
        failed = true;
    }
    for rule_error in &validation.rule_errors {
        tracing::error!(
            "✗ Rule for '{}': {}",
            rule_error.target_field,
            rule_error.message
        );
        failed = true;
    }

    if failed {
        anyhow::bail!("Validation failed");
    }
    tracing::info!("✓ Mapping configuration is valid");
    Ok(())
}
