//! Project file loading
//!
//! A project is a `rowforge.yaml` pointing at a target schema, a directory
//! of mapping configuration YAMLs, and a JSONL file of sample documents.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use rowforge_core::rules::MappingConfig;
use rowforge_core::schema::TargetSchemaField;
use rowforge_engine::ExtractedDocument;

/// Contents of `rowforge.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    /// Project name
    pub name: String,
    /// Template the project maps into
    pub template_id: String,
    /// Target schema YAML path, relative to the project file
    pub schema: String,
    /// Directory of mapping config YAMLs, relative to the project file
    pub configs: String,
    /// Sample documents JSONL path, relative to the project file
    pub documents: String,
    /// Source field the row key is extracted from
    #[serde(default = "default_row_key_field")]
    pub row_key_field: String,
}

fn default_row_key_field() -> String {
    "invoiceNumber".to_string()
}

/// A loaded project: the file plus everything it points at
pub struct Project {
    /// Parsed project file
    pub file: ProjectFile,
    /// Directory the project file lives in
    pub root: PathBuf,
    /// Target schema fields
    pub schema: Vec<TargetSchemaField>,
    /// Mapping configurations, one per YAML file
    pub configs: Vec<MappingConfig>,
}

impl Project {
    /// Load the project file and everything it references.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = Path::new(config_path);
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file {}", path.display()))?;
        let file: ProjectFile =
            serde_yaml::from_str(&raw).context("Failed to parse project file")?;
        let root = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let schema_path = root.join(&file.schema);
        let schema_raw = fs::read_to_string(&schema_path)
            .with_context(|| format!("Failed to read schema {}", schema_path.display()))?;
        let schema: Vec<TargetSchemaField> =
            serde_yaml::from_str(&schema_raw).context("Failed to parse target schema")?;

        let configs = load_configs(&root.join(&file.configs))?;

        Ok(Self {
            file,
            root,
            schema,
            configs,
        })
    }

    /// Load the sample documents, or an override path when given.
    pub fn load_documents(&self, override_path: Option<&str>) -> Result<Vec<ExtractedDocument>> {
        let path = match override_path {
            Some(p) => PathBuf::from(p),
            None => self.root.join(&self.file.documents),
        };
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read documents {}", path.display()))?;

        let mut documents = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let document: ExtractedDocument = serde_json::from_str(line)
                .with_context(|| format!("Invalid document on line {}", line_no + 1))?;
            documents.push(document);
        }
        Ok(documents)
    }
}

/// Load every `.yaml`/`.yml` under a directory as a mapping config.
fn load_configs(dir: &Path) -> Result<Vec<MappingConfig>> {
    let mut configs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to scan {}", dir.display()))?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !entry.file_type().is_file() || !is_yaml {
            continue;
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: MappingConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        configs.push(config);
    }
    Ok(configs)
}
