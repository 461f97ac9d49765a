//! Initialize a new Rowforge project

use anyhow::Result;
use std::fs;
use std::path::Path;

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    // Create directory if it doesn't exist
    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }

    // Get absolute path for deriving name
    let abs_path = project_dir.canonicalize()?;

    // Derive project name from directory name if not provided
    let project_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine project name from path"))?,
    };

    // Check if already initialized
    if project_dir.join("rowforge.yaml").exists() {
        anyhow::bail!(
            "Directory '{}' already contains a rowforge.yaml",
            project_dir.display()
        );
    }

    tracing::info!("Creating new Rowforge project: {}", project_name);

    // Create directory structure
    fs::create_dir_all(project_dir.join("schemas"))?;
    fs::create_dir_all(project_dir.join("configs"))?;
    fs::create_dir_all(project_dir.join("data"))?;

    // Create rowforge.yaml
    let config = format!(
        r#"# Rowforge Project Configuration
name: {project_name}
templateId: invoice
schema: schemas/invoice.yaml
configs: configs
documents: data/documents.jsonl
rowKeyField: invoiceNumber
"#
    );
    fs::write(project_dir.join("rowforge.yaml"), config)?;

    // Create example target schema
    let schema = r#"# Target schema for the invoice template
- name: invoiceNumber
  dataType: string
  isRequired: true
- name: vendor
  dataType: string
  isRequired: true
- name: invoiceDate
  dataType: date
- name: total
  dataType: currency
  validation:
    min: 0
"#;
    fs::write(project_dir.join("schemas/invoice.yaml"), schema)?;

    // Create example global mapping config
    let global_config = r#"# Global mapping configuration
id: global-invoice
name: Global invoice mapping
scope: GLOBAL
templateId: invoice
rules:
  - sourceFields: [invoiceNumber]
    targetField: invoiceNumber
    transformType: DIRECT
    order: 0
    isRequired: true

  - sourceFields: [vendorName]
    targetField: vendor
    transformType: DIRECT
    order: 1
    isRequired: true

  - sourceFields: [invoiceDate]
    targetField: invoiceDate
    transformType: DIRECT
    order: 2

  - sourceFields: [netAmount, taxAmount]
    targetField: total
    transformType: FORMULA
    transformParams:
      expression: "{netAmount} + {taxAmount}"
    order: 3
"#;
    fs::write(project_dir.join("configs/global.yaml"), global_config)?;

    // Create sample documents
    let sample_data = r#"{"id": "doc-1", "extractedFields": {"invoiceNumber": "INV-001", "vendorName": "Acme Corp", "invoiceDate": "2026-01-15", "netAmount": "100.00", "taxAmount": "19.00"}}
{"id": "doc-2", "extractedFields": {"invoiceNumber": "INV-001", "poNumber": "PO-7781"}}
{"id": "doc-3", "extractedFields": {"invoiceNumber": "INV-002", "vendorName": "Globex", "invoiceDate": "2026-01-17", "netAmount": "42.50", "taxAmount": "8.08"}}
"#;
    fs::write(project_dir.join("data/documents.jsonl"), sample_data)?;

    // Create .gitignore
    let gitignore = r#"# Rowforge local data
.rowforge/

# IDE
.idea/
.vscode/
*.swp
"#;
    fs::write(project_dir.join(".gitignore"), gitignore)?;

    tracing::info!(
        "✓ Created project '{}' at {}",
        project_name,
        abs_path.display()
    );
    tracing::info!("");
    tracing::info!("Next steps:");
    if path != "." {
        tracing::info!("  cd {}", project_dir.display());
    }
    tracing::info!("  rowforge validate    # Check mapping configurations");
    tracing::info!("  rowforge preview     # Preview a matching run");

    Ok(())
}
