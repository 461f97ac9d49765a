//! Preview a matching run command

use std::sync::Arc;

use anyhow::{Context, Result};

use rowforge_engine::engine::{MatchOptions, MatchingEngine};
use rowforge_engine::store::memory::MemoryStore;

use crate::project::Project;

/// Run the preview command
pub async fn run(
    config_path: &str,
    documents_path: Option<&str>,
    company: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    let project = Project::load(config_path).context("Failed to load project")?;
    let documents = project
        .load_documents(documents_path)
        .context("Failed to load documents")?;
    if documents.is_empty() {
        anyhow::bail!("No documents to preview");
    }
    tracing::info!(
        "Previewing {} document(s) against template '{}'",
        documents.len(),
        project.file.template_id
    );

    let store = Arc::new(MemoryStore::new());
    store.insert_template_fields(&project.file.template_id, project.schema.clone());
    for config in project.configs.iter().cloned() {
        store.insert_config(config);
    }
    let document_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
    for document in documents {
        store.insert_document(document);
    }

    let engine = MatchingEngine::from_shared(store);
    let preview = engine
        .preview_match(
            &document_ids,
            &project.file.template_id,
            MatchOptions {
                company_id: company.map(str::to_string),
                format_id: format.map(str::to_string),
                row_key_field: project.file.row_key_field.clone(),
                ..MatchOptions::default()
            },
        )
        .await
        .context("Preview failed")?;

    let valid = preview
        .rows
        .iter()
        .filter(|r| r.validation_errors.is_none())
        .count();
    tracing::info!(
        "Produced {} candidate row(s), {} valid",
        preview.rows.len(),
        valid
    );

    // Rows go to stdout so the output can be piped
    println!("{}", serde_json::to_string_pretty(&preview.rows)?);

    for result in &preview.results {
        if let Some(errors) = &result.errors {
            for (field, message) in errors {
                tracing::warn!(
                    "Document '{}' field '{}': {}",
                    result.document_id,
                    field,
                    message
                );
            }
        }
    }
    Ok(())
}
