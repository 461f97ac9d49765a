//! In-memory store for tests and local development
//!
//! A single [`MemoryStore`] implements all three store traits behind one
//! mutex. Batch application is trivially atomic: the mutex is held for the
//! whole batch and the failure hook fires before any row is written.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use rowforge_core::instance::{InstanceStatus, TemplateInstance};
use rowforge_core::row::{Row, RowStatus};
use rowforge_core::rules::MappingConfig;
use rowforge_core::schema::TargetSchemaField;

use crate::error::{Error, Result};
use crate::store::{ConfigStore, DocumentStore, ExtractedDocument, InstanceStore, InstanceStats};

#[derive(Default)]
struct Inner {
    configs: HashMap<String, MappingConfig>,
    documents: HashMap<String, ExtractedDocument>,
    instances: HashMap<String, TemplateInstance>,
    template_fields: HashMap<String, Vec<TargetSchemaField>>,
    rows: HashMap<String, Vec<Row>>,
    batch_writes_seen: u32,
    fail_batch_write_at: Option<u32>,
}

/// In-process store backing all three store traits
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document.
    pub fn insert_document(&self, document: ExtractedDocument) {
        let mut inner = self.inner.lock().unwrap();
        inner.documents.insert(document.id.clone(), document);
    }

    /// Seed an instance.
    pub fn insert_instance(&self, instance: TemplateInstance) {
        let mut inner = self.inner.lock().unwrap();
        inner.instances.insert(instance.id.clone(), instance);
    }

    /// Seed a template's field definitions.
    pub fn insert_template_fields(&self, template_id: &str, fields: Vec<TargetSchemaField>) {
        let mut inner = self.inner.lock().unwrap();
        inner.template_fields.insert(template_id.to_string(), fields);
    }

    /// Seed a configuration without going through the engine wrapper.
    pub fn insert_config(&self, config: MappingConfig) {
        let mut inner = self.inner.lock().unwrap();
        inner.configs.insert(config.id.clone(), config);
    }

    /// Make the `nth` batch write (0-based, counted across the store's
    /// lifetime) fail, for partial-failure tests.
    pub fn fail_batch_write_at(&self, nth: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_batch_write_at = Some(nth);
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn list_configs(
        &self,
        template_id: &str,
        company_id: Option<&str>,
        format_id: Option<&str>,
    ) -> Result<Vec<MappingConfig>> {
        let inner = self.inner.lock().unwrap();
        let mut configs: Vec<MappingConfig> = inner
            .configs
            .values()
            .filter(|c| {
                c.is_active
                    && c.template_id == template_id
                    && c.applies_to(company_id, format_id)
            })
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(configs)
    }

    async fn create_config(&self, config: MappingConfig) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.configs.insert(config.id.clone(), config);
        Ok(())
    }

    async fn update_config(&self, config: MappingConfig) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.configs.contains_key(&config.id) {
            return Err(Error::NotFound {
                kind: "config",
                id: config.id,
            });
        }
        inner.configs.insert(config.id.clone(), config);
        Ok(())
    }

    async fn soft_delete(&self, config_id: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let config = inner.configs.get_mut(config_id).ok_or(Error::NotFound {
            kind: "config",
            id: config_id.to_string(),
        })?;
        config.is_active = false;
        Ok(config.template_id.clone())
    }

    async fn hard_delete(&self, config_id: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let config = inner.configs.remove(config_id).ok_or(Error::NotFound {
            kind: "config",
            id: config_id.to_string(),
        })?;
        Ok(config.template_id)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_documents(&self, ids: &[String]) -> Result<Vec<ExtractedDocument>> {
        let inner = self.inner.lock().unwrap();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !inner.documents.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::DocumentsNotFound { missing });
        }
        Ok(ids
            .iter()
            .map(|id| inner.documents[id].clone())
            .collect())
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get_instance(&self, instance_id: &str) -> Result<TemplateInstance> {
        let inner = self.inner.lock().unwrap();
        inner
            .instances
            .get(instance_id)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })
    }

    async fn update_status(&self, instance_id: &str, status: InstanceStatus) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let instance = inner.instances.get_mut(instance_id).ok_or(Error::NotFound {
            kind: "instance",
            id: instance_id.to_string(),
        })?;
        instance.status = status;
        instance.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_template_fields(&self, template_id: &str) -> Result<Vec<TargetSchemaField>> {
        let inner = self.inner.lock().unwrap();
        inner
            .template_fields
            .get(template_id)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "template",
                id: template_id.to_string(),
            })
    }

    async fn list_rows(&self, instance_id: &str) -> Result<Vec<Row>> {
        let inner = self.inner.lock().unwrap();
        let mut rows = inner.rows.get(instance_id).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.row_index);
        Ok(rows)
    }

    async fn apply_batch(&self, instance_id: &str, rows: Vec<Row>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let call = inner.batch_writes_seen;
        inner.batch_writes_seen += 1;
        if inner.fail_batch_write_at == Some(call) {
            return Err(Error::Persistence(sqlx::Error::Protocol(
                "injected batch write failure".to_string(),
            )));
        }
        let stored = inner.rows.entry(instance_id.to_string()).or_default();
        for row in rows {
            match stored.iter_mut().find(|r| r.id == row.id) {
                Some(existing) => *existing = row,
                None => stored.push(row),
            }
        }
        Ok(())
    }

    async fn add_row(&self, instance_id: &str, row: Row) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.rows.entry(instance_id.to_string()).or_default().push(row);
        Ok(())
    }

    async fn update_row(&self, instance_id: &str, row: Row) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.rows.entry(instance_id.to_string()).or_default();
        let existing = rows.iter_mut().find(|r| r.id == row.id).ok_or(Error::NotFound {
            kind: "row",
            id: row.id.clone(),
        })?;
        *existing = row;
        Ok(())
    }

    async fn delete_row(&self, instance_id: &str, row_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.rows.entry(instance_id.to_string()).or_default();
        let before = rows.len();
        rows.retain(|r| r.id != row_id);
        if rows.len() == before {
            return Err(Error::NotFound {
                kind: "row",
                id: row_id.to_string(),
            });
        }
        Ok(())
    }

    async fn recompute_statistics(&self, instance_id: &str) -> Result<InstanceStats> {
        let mut inner = self.inner.lock().unwrap();
        let stats = {
            let rows = inner.rows.get(instance_id).map(Vec::as_slice).unwrap_or(&[]);
            let valid = rows.iter().filter(|r| r.status == RowStatus::Valid).count() as u64;
            InstanceStats {
                row_count: rows.len() as u64,
                valid_row_count: valid,
                error_row_count: rows.len() as u64 - valid,
            }
        };
        let instance = inner.instances.get_mut(instance_id).ok_or(Error::NotFound {
            kind: "instance",
            id: instance_id.to_string(),
        })?;
        instance.row_count = stats.row_count;
        instance.valid_row_count = stats.valid_row_count;
        instance.error_row_count = stats.error_row_count;
        instance.updated_at = chrono::Utc::now();
        Ok(stats)
    }
}
