//! Store traits and shared store types
//!
//! The engine talks to three external collaborators through these seams:
//! the configuration store, the document store, and the template/instance
//! store. Implementations: [`memory::MemoryStore`] for tests and local
//! development, [`postgres::PgStore`] for production.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rowforge_core::instance::{InstanceStatus, TemplateInstance};
use rowforge_core::row::Row;
use rowforge_core::rules::MappingConfig;
use rowforge_core::schema::TargetSchemaField;

use crate::error::Result;

pub mod memory;
pub mod postgres;

/// A document's extracted key/value fields, as produced by the upstream
/// extraction pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    /// Document identifier
    pub id: String,
    /// Extracted field map
    pub extracted_fields: Map<String, Value>,
}

/// Aggregate row counters of an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStats {
    /// Total persisted rows
    pub row_count: u64,
    /// Rows with status VALID
    pub valid_row_count: u64,
    /// Rows with status INVALID
    pub error_row_count: u64,
}

/// Read/write access to mapping configurations.
///
/// Mutations never touch the resolver cache directly; the engine-level
/// wrappers invalidate it per template (see [`crate::resolver`]).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Active configurations applicable to the triple: GLOBAL configs of
    /// the template, COMPANY configs matching `company_id`, FORMAT configs
    /// matching both ids.
    async fn list_configs(
        &self,
        template_id: &str,
        company_id: Option<&str>,
        format_id: Option<&str>,
    ) -> Result<Vec<MappingConfig>>;

    /// Persist a new configuration.
    async fn create_config(&self, config: MappingConfig) -> Result<()>;

    /// Replace an existing configuration.
    async fn update_config(&self, config: MappingConfig) -> Result<()>;

    /// Soft-delete: set `is_active = false`. Returns the template id the
    /// config belonged to.
    async fn soft_delete(&self, config_id: &str) -> Result<String>;

    /// Hard-delete (administrators only). Returns the template id the
    /// config belonged to.
    async fn hard_delete(&self, config_id: &str) -> Result<String>;
}

/// Read access to extracted documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the extracted field maps for all requested ids in one query.
    /// Fails with [`crate::Error::DocumentsNotFound`] listing every
    /// missing id rather than silently omitting them.
    async fn load_documents(&self, ids: &[String]) -> Result<Vec<ExtractedDocument>>;
}

/// Read/write access to templates, instances, and rows
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Load an instance by id.
    async fn get_instance(&self, instance_id: &str) -> Result<TemplateInstance>;

    /// Persist a status change. The caller is responsible for checking the
    /// transition against the state machine.
    async fn update_status(&self, instance_id: &str, status: InstanceStatus) -> Result<()>;

    /// Field definitions of a template.
    async fn get_template_fields(&self, template_id: &str) -> Result<Vec<TargetSchemaField>>;

    /// All rows of an instance, ordered by row index.
    async fn list_rows(&self, instance_id: &str) -> Result<Vec<Row>>;

    /// Upsert a batch of rows inside one atomic transaction. Either every
    /// row in the batch becomes durable or none does.
    async fn apply_batch(&self, instance_id: &str, rows: Vec<Row>) -> Result<()>;

    /// Insert a single row.
    async fn add_row(&self, instance_id: &str, row: Row) -> Result<()>;

    /// Replace a single row.
    async fn update_row(&self, instance_id: &str, row: Row) -> Result<()>;

    /// Delete a single row.
    async fn delete_row(&self, instance_id: &str, row_id: &str) -> Result<()>;

    /// Recompute and persist the instance's aggregate counters from its
    /// rows in one grouped query. Idempotent, safe to re-run after partial
    /// failures.
    async fn recompute_statistics(&self, instance_id: &str) -> Result<InstanceStats>;
}
