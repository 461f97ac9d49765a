//! The matching engine
//!
//! Orchestrates one matching run: load the instance, resolve rules once,
//! load every requested document, then process sequential batches. Each
//! batch persists through one atomic store transaction; one document's
//! failure is contained to its own result entry and never aborts the
//! batch. Aggregate counters are recomputed from the persisted rows after
//! the run, so they stay correct across partial failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rowforge_core::instance::InstanceStatus;
use rowforge_core::resolver::{MappingValidation, ResolvedMappingConfig, validate_mapping};
use rowforge_core::row::{Row, RowStatus, generated_row_key, row_key_from};
use rowforge_core::rules::{MappingConfig, TransformKind};
use rowforge_core::schema::{TargetSchemaField, validate_row};
use rowforge_core::transform;

use crate::error::Result;
use crate::resolver::RuleResolver;
use crate::store::{ConfigStore, DocumentStore, ExtractedDocument, InstanceStore};

/// Progress notification fired after each committed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 0-based index of the batch that just committed
    pub batch_index: usize,
    /// Documents processed so far, committed batches only
    pub processed: usize,
    /// Total documents in the call
    pub total: usize,
}

/// Callback invoked at batch boundaries (never intra-batch)
pub type ProgressFn = Box<dyn Fn(BatchProgress) + Send + Sync>;

/// Options for one matching call
pub struct MatchOptions {
    /// Company used for rule resolution
    pub company_id: Option<String>,
    /// Document format used for rule resolution
    pub format_id: Option<String>,
    /// Source field the row key is extracted from
    pub row_key_field: String,
    /// Documents per transactional batch
    pub batch_size: usize,
    /// Skip row validation (preview/bulk-load scenarios)
    pub skip_validation: bool,
    /// Optional progress callback
    pub on_batch: Option<ProgressFn>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            company_id: None,
            format_id: None,
            row_key_field: "invoiceNumber".to_string(),
            batch_size: 100,
            skip_validation: false,
            on_batch: None,
        }
    }
}

/// Outcome status of one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocStatus {
    /// The document's row validated cleanly
    Valid,
    /// The document's row carries validation errors
    Invalid,
    /// The document produced no durable row
    Error,
}

/// Per-document result entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMatchResult {
    /// Source document
    pub document_id: String,
    /// Row the document merged into, when one was produced
    pub row_id: Option<String>,
    /// Row key the document resolved to
    pub row_key: Option<String>,
    /// Outcome status
    pub status: DocStatus,
    /// Field errors (INVALID) or the failure description (ERROR)
    pub errors: Option<BTreeMap<String, String>>,
}

/// Result of a matching run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    /// One entry per requested document
    pub results: Vec<DocumentMatchResult>,
    /// Documents processed (equals the request size unless a batch aborted)
    pub total: usize,
    /// Documents whose row validated cleanly
    pub matched: usize,
    /// Documents whose row carries validation errors
    pub invalid: usize,
    /// Documents that produced no durable row
    pub errors: usize,
    /// Rows created by this run
    pub rows_created: usize,
    /// Pre-existing rows this run merged into
    pub rows_updated: usize,
    /// Index of the batch whose transaction failed, if any; later batches
    /// did not run, earlier batches remain durable
    pub aborted_batch: Option<usize>,
}

/// Result of a preview run (nothing persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    /// Candidate rows, in row-index order
    pub rows: Vec<Row>,
    /// One entry per requested document
    pub results: Vec<DocumentMatchResult>,
}

/// The matching engine, generic over its three store collaborators
pub struct MatchingEngine {
    configs: Arc<dyn ConfigStore>,
    documents: Arc<dyn DocumentStore>,
    instances: Arc<dyn InstanceStore>,
    resolver: RuleResolver,
}

impl MatchingEngine {
    /// Create an engine over separate store implementations.
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        documents: Arc<dyn DocumentStore>,
        instances: Arc<dyn InstanceStore>,
    ) -> Self {
        let resolver = RuleResolver::new(Arc::clone(&configs));
        Self {
            configs,
            documents,
            instances,
            resolver,
        }
    }

    /// Create an engine over one store implementing all three traits.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: ConfigStore + DocumentStore + InstanceStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    /// Override the resolver cache TTL (tests use a short one).
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.resolver = RuleResolver::with_ttl(Arc::clone(&self.configs), ttl);
        self
    }

    // ---- configuration authoring -------------------------------------

    /// Validate and persist a new mapping configuration.
    pub async fn create_config(&self, config: MappingConfig) -> Result<()> {
        config.validate()?;
        let template_id = config.template_id.clone();
        self.configs.create_config(config).await?;
        self.resolver.invalidate_template(&template_id);
        Ok(())
    }

    /// Validate and replace a mapping configuration.
    pub async fn update_config(&self, config: MappingConfig) -> Result<()> {
        config.validate()?;
        let template_id = config.template_id.clone();
        self.configs.update_config(config).await?;
        self.resolver.invalidate_template(&template_id);
        Ok(())
    }

    /// Soft-delete a configuration (sets `isActive = false`).
    pub async fn soft_delete_config(&self, config_id: &str) -> Result<()> {
        let template_id = self.configs.soft_delete(config_id).await?;
        self.resolver.invalidate_template(&template_id);
        Ok(())
    }

    /// Hard-delete a configuration (administrators only).
    pub async fn hard_delete_config(&self, config_id: &str) -> Result<()> {
        let template_id = self.configs.hard_delete(config_id).await?;
        self.resolver.invalidate_template(&template_id);
        Ok(())
    }

    // ---- row mutation (state-machine checked) ------------------------

    /// Add a row to an editable instance.
    pub async fn add_row(&self, instance_id: &str, mut row: Row) -> Result<Row> {
        let instance = self.instances.get_instance(instance_id).await?;
        if !instance.status.is_editable() {
            return Err(instance.status.invalid_state("add_row").into());
        }
        let existing = self.instances.list_rows(instance_id).await?;
        row.row_index = existing.iter().map(|r| r.row_index + 1).max().unwrap_or(0);

        let schema = self
            .instances
            .get_template_fields(&instance.template_id)
            .await?;
        row.set_validation(validate_row(&row.field_values, &schema));

        self.instances.add_row(instance_id, row.clone()).await?;
        self.instances.recompute_statistics(instance_id).await?;
        Ok(row)
    }

    /// Replace a row of an editable instance, revalidating it.
    pub async fn update_row(&self, instance_id: &str, mut row: Row) -> Result<Row> {
        let instance = self.instances.get_instance(instance_id).await?;
        if !instance.status.is_editable() {
            return Err(instance.status.invalid_state("update_row").into());
        }
        let schema = self
            .instances
            .get_template_fields(&instance.template_id)
            .await?;
        row.set_validation(validate_row(&row.field_values, &schema));

        self.instances.update_row(instance_id, row.clone()).await?;
        self.instances.recompute_statistics(instance_id).await?;
        Ok(row)
    }

    /// Delete a row of an editable instance.
    pub async fn delete_row(&self, instance_id: &str, row_id: &str) -> Result<()> {
        let instance = self.instances.get_instance(instance_id).await?;
        if !instance.status.is_editable() {
            return Err(instance.status.invalid_state("delete_row").into());
        }
        self.instances.delete_row(instance_id, row_id).await?;
        self.instances.recompute_statistics(instance_id).await?;
        Ok(())
    }

    /// Mark a completed instance as exported (terminal).
    pub async fn mark_exported(&self, instance_id: &str) -> Result<()> {
        let instance = self.instances.get_instance(instance_id).await?;
        let next = instance.status.transition(InstanceStatus::Exported)?;
        self.instances.update_status(instance_id, next).await?;
        Ok(())
    }

    // ---- matching ----------------------------------------------------

    /// Check that the resolved rule set for a triple covers the template's
    /// required fields and that every rule is well-formed. Run before
    /// allowing a matching run.
    pub async fn validate_mapping(
        &self,
        template_id: &str,
        company_id: Option<&str>,
        format_id: Option<&str>,
    ) -> Result<MappingValidation> {
        let resolved = self
            .resolver
            .resolve(template_id, company_id, format_id)
            .await?;
        let schema = self.instances.get_template_fields(template_id).await?;
        Ok(validate_mapping(&resolved, &schema))
    }

    /// Match documents into a template instance.
    ///
    /// Batches are sequential: batch N+1 does not start until batch N's
    /// transaction commits. A failed batch aborts the run but leaves
    /// earlier batches durable; the partial report marks the aborted
    /// batch and the instance ends in FAILED.
    pub async fn match_documents(
        &self,
        document_ids: &[String],
        instance_id: &str,
        options: MatchOptions,
    ) -> Result<MatchReport> {
        let instance = self.instances.get_instance(instance_id).await?;
        if !instance.status.can_match() {
            return Err(instance.status.invalid_state("match_documents").into());
        }

        // Resolve once for the whole call, never per document.
        let resolved = self
            .resolver
            .resolve(
                &instance.template_id,
                options.company_id.as_deref(),
                options.format_id.as_deref(),
            )
            .await?;
        let schema = self
            .instances
            .get_template_fields(&instance.template_id)
            .await?;

        // A missing document id is a caller contract violation and fails
        // the whole call before any state changes.
        let documents = self.documents.load_documents(document_ids).await?;

        self.instances
            .update_status(instance_id, instance.status.transition(InstanceStatus::Processing)?)
            .await?;

        tracing::info!(
            instance_id,
            documents = documents.len(),
            rules = resolved.rules.len(),
            batch_size = options.batch_size,
            "matching started"
        );

        let mut existing: HashMap<String, Row> = self
            .instances
            .list_rows(instance_id)
            .await?
            .into_iter()
            .map(|row| (row.row_key.clone(), row))
            .collect();
        let initial_keys: HashSet<String> = existing.keys().cloned().collect();
        let mut next_index = existing
            .values()
            .map(|r| r.row_index + 1)
            .max()
            .unwrap_or(0);

        let mut results: Vec<DocumentMatchResult> = Vec::with_capacity(documents.len());
        let mut aborted_batch = None;
        let batch_size = options.batch_size.max(1);

        for (batch_index, batch) in documents.chunks(batch_size).enumerate() {
            let mut staged: HashMap<String, Row> = HashMap::new();
            let mut outcomes = Vec::with_capacity(batch.len());

            for document in batch {
                let outcome = match process_document(
                    document,
                    &resolved,
                    &schema,
                    &options,
                    &existing,
                    &mut staged,
                    &mut next_index,
                ) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::warn!(
                            document_id = %document.id,
                            error = %err,
                            "document failed; continuing with the rest of the batch"
                        );
                        error_result(&document.id, err.to_string())
                    }
                };
                outcomes.push(outcome);
            }

            let mut batch_rows: Vec<Row> = staged.values().cloned().collect();
            batch_rows.sort_by_key(|r| r.row_index);

            if let Err(err) = self.instances.apply_batch(instance_id, batch_rows).await {
                tracing::error!(
                    instance_id,
                    batch_index,
                    error = %err,
                    "batch transaction failed; aborting remaining batches"
                );
                // Nothing from this batch is durable; its documents are
                // reported as errors and later batches never run.
                let message = err.to_string();
                results.extend(
                    outcomes
                        .into_iter()
                        .map(|o| error_result(&o.document_id, message.clone())),
                );
                aborted_batch = Some(batch_index);
                break;
            }

            for (key, row) in staged {
                existing.insert(key, row);
            }
            results.extend(outcomes);

            if let Some(on_batch) = &options.on_batch {
                on_batch(BatchProgress {
                    batch_index,
                    processed: results.len(),
                    total: documents.len(),
                });
            }
        }

        let stats = self.instances.recompute_statistics(instance_id).await?;

        let all_failed =
            !results.is_empty() && results.iter().all(|r| r.status == DocStatus::Error);
        let final_status = if aborted_batch.is_some() || all_failed {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Completed
        };
        self.instances.update_status(instance_id, final_status).await?;

        let final_keys: HashSet<&String> =
            results.iter().filter_map(|r| r.row_key.as_ref()).collect();
        let rows_created = final_keys
            .iter()
            .filter(|k| !initial_keys.contains(**k))
            .count();
        let rows_updated = final_keys
            .iter()
            .filter(|k| initial_keys.contains(**k))
            .count();

        tracing::info!(
            instance_id,
            total = results.len(),
            rows = stats.row_count,
            valid = stats.valid_row_count,
            status = %final_status,
            "matching finished"
        );

        Ok(MatchReport {
            total: results.len(),
            matched: results.iter().filter(|r| r.status == DocStatus::Valid).count(),
            invalid: results
                .iter()
                .filter(|r| r.status == DocStatus::Invalid)
                .count(),
            errors: results.iter().filter(|r| r.status == DocStatus::Error).count(),
            rows_created,
            rows_updated,
            aborted_batch,
            results,
        })
    }

    /// Run the transform + validate pipeline without persisting anything.
    /// Intended for configuration-testing UIs.
    pub async fn preview_match(
        &self,
        document_ids: &[String],
        template_id: &str,
        options: MatchOptions,
    ) -> Result<PreviewReport> {
        let resolved = self
            .resolver
            .resolve(
                template_id,
                options.company_id.as_deref(),
                options.format_id.as_deref(),
            )
            .await?;
        let schema = self.instances.get_template_fields(template_id).await?;
        let documents = self.documents.load_documents(document_ids).await?;

        let existing = HashMap::new();
        let mut staged: HashMap<String, Row> = HashMap::new();
        let mut next_index = 0;
        let mut results = Vec::with_capacity(documents.len());

        for document in &documents {
            let outcome = match process_document(
                document,
                &resolved,
                &schema,
                &options,
                &existing,
                &mut staged,
                &mut next_index,
            ) {
                Ok(outcome) => outcome,
                Err(err) => error_result(&document.id, err.to_string()),
            };
            results.push(outcome);
        }

        let mut rows: Vec<Row> = staged.into_values().collect();
        rows.sort_by_key(|r| r.row_index);
        Ok(PreviewReport { rows, results })
    }
}

fn error_result(document_id: &str, message: String) -> DocumentMatchResult {
    let mut errors = BTreeMap::new();
    errors.insert("error".to_string(), message);
    DocumentMatchResult {
        document_id: document_id.to_string(),
        row_id: None,
        row_key: None,
        status: DocStatus::Error,
        errors: Some(errors),
    }
}

/// Transform one document and merge it into its row.
///
/// Pure apart from the staging maps: no I/O. Per-field transform failures
/// are contained here. FORMULA and CUSTOM failures pass the raw source
/// value through unconverted when one exists; anything else leaves the
/// field absent. One bad field never costs the document's whole output.
fn process_document(
    document: &ExtractedDocument,
    resolved: &ResolvedMappingConfig,
    schema: &[TargetSchemaField],
    options: &MatchOptions,
    existing: &HashMap<String, Row>,
    staged: &mut HashMap<String, Row>,
    next_index: &mut usize,
) -> Result<DocumentMatchResult> {
    let row_key = row_key_from(&document.extracted_fields, &options.row_key_field)
        .unwrap_or_else(generated_row_key);

    let mut candidate = Map::new();
    for rule in &resolved.rules {
        let sources: Vec<Value> = rule
            .source_fields
            .iter()
            .map(|f| {
                document
                    .extracted_fields
                    .get(f)
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();

        match transform::execute(rule, &sources, &document.extracted_fields) {
            Ok(Some(value)) => {
                candidate.insert(rule.target_field.clone(), value);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    document_id = %document.id,
                    target_field = %rule.target_field,
                    error = %err,
                    "transform failed for one field; skipping it"
                );
                if let (
                    TransformKind::Formula { .. } | TransformKind::Custom { .. },
                    Some(raw),
                ) = (&rule.transform, sources.first())
                    && !raw.is_null()
                {
                    candidate.insert(rule.target_field.clone(), raw.clone());
                }
            }
        }
    }

    // Same-batch documents with the same key merge through the staged
    // row, in document order; otherwise start from the durable row.
    let mut row = staged
        .remove(&row_key)
        .or_else(|| existing.get(&row_key).cloned())
        .unwrap_or_else(|| {
            let row = Row::new(row_key.clone(), *next_index);
            *next_index += 1;
            row
        });

    row.merge_fields(&candidate);
    row.source_document_ids.insert(document.id.clone());
    if !options.skip_validation {
        row.set_validation(validate_row(&row.field_values, schema));
    }

    let result = DocumentMatchResult {
        document_id: document.id.clone(),
        row_id: Some(row.id.clone()),
        row_key: Some(row_key.clone()),
        status: match row.status {
            RowStatus::Valid => DocStatus::Valid,
            RowStatus::Invalid => DocStatus::Invalid,
        },
        errors: row.validation_errors.clone(),
    };
    staged.insert(row_key, row);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::MemoryStore;
    use std::sync::Mutex;
    use rowforge_core::instance::TemplateInstance;
    use rowforge_core::rules::{ConfigScope, MappingRule};
    use rowforge_core::schema::FieldType;
    use serde_json::json;

    fn field(name: &str, data_type: FieldType, is_required: bool) -> TargetSchemaField {
        TargetSchemaField {
            name: name.to_string(),
            data_type,
            is_required,
            validation: None,
        }
    }

    fn direct_rule(source: &str, target: &str, order: i32) -> MappingRule {
        MappingRule {
            source_fields: vec![source.to_string()],
            target_field: target.to_string(),
            transform: TransformKind::Direct,
            order,
            is_required: false,
            priority: 0,
        }
    }

    fn global_config(id: &str, template_id: &str, rules: Vec<MappingRule>) -> MappingConfig {
        MappingConfig {
            id: id.to_string(),
            name: id.to_string(),
            scope: ConfigScope::Global,
            template_id: template_id.to_string(),
            company_id: None,
            document_format_id: None,
            rules,
            priority: 0,
            is_active: true,
        }
    }

    fn doc(id: &str, fields: serde_json::Value) -> ExtractedDocument {
        ExtractedDocument {
            id: id.to_string(),
            extracted_fields: fields.as_object().unwrap().clone(),
        }
    }

    fn seeded_store() -> (Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let mut instance = TemplateInstance::new("tpl", "test run");
        instance.id = "inst-1".to_string();
        let instance_id = instance.id.clone();
        store.insert_instance(instance);
        store.insert_template_fields(
            "tpl",
            vec![
                field("invoiceNumber", FieldType::String, true),
                field("vendor", FieldType::String, false),
                field("total", FieldType::Currency, false),
            ],
        );
        store.insert_config(global_config(
            "cfg-global",
            "tpl",
            vec![
                direct_rule("invoiceNumber", "invoiceNumber", 0),
                direct_rule("vendorName", "vendor", 1),
                direct_rule("amount", "total", 2),
            ],
        ));
        (store, instance_id)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_two_documents_produce_two_rows() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc(
            "d1",
            json!({"invoiceNumber": "INV-1", "vendorName": "Acme", "amount": "100.00"}),
        ));
        store.insert_document(doc(
            "d2",
            json!({"invoiceNumber": "INV-2", "vendorName": "Globex", "amount": "42.50"}),
        ));
        let engine = MatchingEngine::from_shared(store.clone());

        let report = engine
            .match_documents(&ids(&["d1", "d2"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.matched, 2);
        assert_eq!(report.rows_created, 2);
        assert_eq!(report.rows_updated, 0);
        assert_eq!(report.aborted_batch, None);

        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_key, "INV-1");
        assert_eq!(rows[0].field_values["vendor"], "Acme");
        assert_eq!(rows[1].row_key, "INV-2");

        let instance = store.get_instance(&instance_id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert_eq!(instance.row_count, 2);
        assert_eq!(instance.valid_row_count, 2);
    }

    #[tokio::test]
    async fn test_same_key_documents_merge_if_empty() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc(
            "d1",
            json!({"invoiceNumber": "INV-1", "vendorName": "Acme"}),
        ));
        store.insert_document(doc(
            "d2",
            json!({"invoiceNumber": "INV-1", "vendorName": "Overwrite Attempt", "amount": "99"}),
        ));
        let engine = MatchingEngine::from_shared(store.clone());

        let report = engine
            .match_documents(&ids(&["d1", "d2"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.rows_created, 1);

        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        // First document's populated value survives; its gap is filled.
        assert_eq!(rows[0].field_values["vendor"], "Acme");
        assert_eq!(rows[0].field_values["total"], "99");
        assert_eq!(rows[0].source_document_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_rerun_merges_into_existing_rows() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc(
            "d1",
            json!({"invoiceNumber": "INV-1", "vendorName": "Acme"}),
        ));
        store.insert_document(doc("d2", json!({"invoiceNumber": "INV-1", "amount": "12"})));
        let engine = MatchingEngine::from_shared(store.clone());

        engine
            .match_documents(&ids(&["d1"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();
        let report = engine
            .match_documents(&ids(&["d2"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.rows_created, 0);
        assert_eq!(report.rows_updated, 1);
        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field_values["vendor"], "Acme");
        assert_eq!(rows[0].field_values["total"], "12");
    }

    #[tokio::test]
    async fn test_missing_document_fails_before_status_change() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc("d1", json!({"invoiceNumber": "INV-1"})));
        let engine = MatchingEngine::from_shared(store.clone());

        let err = engine
            .match_documents(&ids(&["d1", "ghost"]), &instance_id, MatchOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::DocumentsNotFound { missing } => {
                assert_eq!(missing, vec!["ghost".to_string()]);
            }
            other => panic!("expected DocumentsNotFound, got {:?}", other),
        }

        let instance = store.get_instance(&instance_id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Draft);
        assert!(store.list_rows(&instance_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_failure_keeps_earlier_batches_durable() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc("d1", json!({"invoiceNumber": "INV-1"})));
        store.insert_document(doc("d2", json!({"invoiceNumber": "INV-2"})));
        store.insert_document(doc("d3", json!({"invoiceNumber": "INV-3"})));
        store.fail_batch_write_at(1);
        let engine = MatchingEngine::from_shared(store.clone());

        let report = engine
            .match_documents(
                &ids(&["d1", "d2", "d3"]),
                &instance_id,
                MatchOptions {
                    batch_size: 1,
                    ..MatchOptions::default()
                },
            )
            .await
            .unwrap();

        // Batch 0 committed, batch 1 failed, batch 2 never ran.
        assert_eq!(report.aborted_batch, Some(1));
        assert_eq!(report.total, 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.results[1].status, DocStatus::Error);
        assert!(report.results[1].errors.is_some());

        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_key, "INV-1");

        let instance = store.get_instance(&instance_id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
        assert_eq!(instance.row_count, 1);
    }

    #[tokio::test]
    async fn test_progress_callback_fires_per_batch() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc("d1", json!({"invoiceNumber": "INV-1"})));
        store.insert_document(doc("d2", json!({"invoiceNumber": "INV-2"})));
        store.insert_document(doc("d3", json!({"invoiceNumber": "INV-3"})));
        let engine = MatchingEngine::from_shared(store.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine
            .match_documents(
                &ids(&["d1", "d2", "d3"]),
                &instance_id,
                MatchOptions {
                    batch_size: 2,
                    on_batch: Some(Box::new(move |p| sink.lock().unwrap().push(p))),
                    ..MatchOptions::default()
                },
            )
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], BatchProgress { batch_index: 0, processed: 2, total: 3 });
        assert_eq!(seen[1], BatchProgress { batch_index: 1, processed: 3, total: 3 });
    }

    #[tokio::test]
    async fn test_company_rule_replaces_global_for_same_target() {
        let (store, instance_id) = seeded_store();
        store.insert_config(MappingConfig {
            id: "cfg-acme".to_string(),
            name: "acme overrides".to_string(),
            scope: ConfigScope::Company,
            template_id: "tpl".to_string(),
            company_id: Some("acme".to_string()),
            document_format_id: None,
            rules: vec![direct_rule("acmeVendorCode", "vendor", 1)],
            priority: 0,
            is_active: true,
        });
        store.insert_document(doc(
            "d1",
            json!({"invoiceNumber": "INV-1", "vendorName": "ignored", "acmeVendorCode": "AC-7"}),
        ));
        let engine = MatchingEngine::from_shared(store.clone());

        engine
            .match_documents(
                &ids(&["d1"]),
                &instance_id,
                MatchOptions {
                    company_id: Some("acme".to_string()),
                    ..MatchOptions::default()
                },
            )
            .await
            .unwrap();

        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows[0].field_values["vendor"], "AC-7");
    }

    #[tokio::test]
    async fn test_invalid_row_is_persisted_with_errors() {
        let (store, instance_id) = seeded_store();
        // No invoiceNumber in the source, so the required target field is
        // empty and the row key falls back to a generated one.
        store.insert_document(doc("d1", json!({"vendorName": "Acme"})));
        let engine = MatchingEngine::from_shared(store.clone());

        let report = engine
            .match_documents(&ids(&["d1"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.invalid, 1);
        assert_eq!(report.matched, 0);
        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].row_key.starts_with("gen-"));
        assert!(
            rows[0]
                .validation_errors
                .as_ref()
                .unwrap()
                .contains_key("invoiceNumber")
        );

        let instance = store.get_instance(&instance_id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert_eq!(instance.error_row_count, 1);
    }

    #[tokio::test]
    async fn test_formula_failure_passes_raw_value_through() {
        let (store, instance_id) = seeded_store();
        // Higher config priority so the formula rule replaces the seeded
        // direct rule for "total".
        let mut config = global_config(
            "cfg-formula",
            "tpl",
            vec![MappingRule {
                source_fields: vec!["amount".to_string()],
                target_field: "total".to_string(),
                transform: TransformKind::Formula {
                    expression: "{amount} * 2".to_string(),
                },
                order: 1,
                is_required: false,
                priority: 5,
            }],
        );
        config.priority = 5;
        store.insert_config(config);
        store.insert_document(doc(
            "d1",
            json!({"invoiceNumber": "INV-1", "amount": "not a number"}),
        ));
        let engine = MatchingEngine::from_shared(store.clone());

        engine
            .match_documents(&ids(&["d1"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();

        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows[0].field_values["total"], "not a number");
    }

    #[tokio::test]
    async fn test_processing_instance_rejects_second_run() {
        let (store, instance_id) = seeded_store();
        store
            .update_status(&instance_id, InstanceStatus::Processing)
            .await
            .unwrap();
        store.insert_document(doc("d1", json!({"invoiceNumber": "INV-1"})));
        let engine = MatchingEngine::from_shared(store.clone());

        let err = engine
            .match_documents(&ids(&["d1"]), &instance_id, MatchOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("match_documents"));
        assert!(err.to_string().contains("PROCESSING"));
    }

    #[tokio::test]
    async fn test_exported_instance_rejects_row_mutation() {
        let (store, instance_id) = seeded_store();
        store
            .update_status(&instance_id, InstanceStatus::Exported)
            .await
            .unwrap();
        let engine = MatchingEngine::from_shared(store.clone());

        let err = engine
            .add_row(&instance_id, Row::new("K1", 0))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("add_row"));
        assert!(msg.contains("EXPORTED"));
        assert!(msg.contains("[]"));
    }

    #[tokio::test]
    async fn test_preview_persists_nothing() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc(
            "d1",
            json!({"invoiceNumber": "INV-1", "vendorName": "Acme"}),
        ));
        let engine = MatchingEngine::from_shared(store.clone());

        let preview = engine
            .preview_match(&ids(&["d1"]), "tpl", MatchOptions::default())
            .await
            .unwrap();

        assert_eq!(preview.rows.len(), 1);
        assert_eq!(preview.rows[0].field_values["vendor"], "Acme");
        assert_eq!(preview.results[0].status, DocStatus::Valid);

        assert!(store.list_rows(&instance_id).await.unwrap().is_empty());
        let instance = store.get_instance(&instance_id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Draft);
    }

    #[tokio::test]
    async fn test_create_config_invalidates_cached_resolution() {
        let (store, instance_id) = seeded_store();
        store.insert_document(doc(
            "d1",
            json!({"invoiceNumber": "INV-1", "poNumber": "PO-9"}),
        ));
        store.insert_document(doc(
            "d2",
            json!({"invoiceNumber": "INV-2", "poNumber": "PO-10"}),
        ));
        store.insert_template_fields(
            "tpl",
            vec![
                field("invoiceNumber", FieldType::String, true),
                field("vendor", FieldType::String, false),
                field("total", FieldType::Currency, false),
                field("purchaseOrder", FieldType::String, false),
            ],
        );
        let engine = MatchingEngine::from_shared(store.clone());

        engine
            .match_documents(&ids(&["d1"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();

        engine
            .create_config(global_config(
                "cfg-po",
                "tpl",
                vec![direct_rule("poNumber", "purchaseOrder", 3)],
            ))
            .await
            .unwrap();

        engine
            .match_documents(&ids(&["d2"]), &instance_id, MatchOptions::default())
            .await
            .unwrap();

        let rows = store.list_rows(&instance_id).await.unwrap();
        assert_eq!(rows[1].field_values["purchaseOrder"], "PO-10");
    }

    #[tokio::test]
    async fn test_create_config_rejects_invalid_rules() {
        let (store, _) = seeded_store();
        let engine = MatchingEngine::from_shared(store);

        let err = engine
            .create_config(global_config(
                "cfg-bad",
                "tpl",
                vec![MappingRule {
                    source_fields: vec![],
                    target_field: "vendor".to_string(),
                    transform: TransformKind::Direct,
                    order: 0,
                    is_required: false,
                    priority: 0,
                }],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[tokio::test]
    async fn test_validate_mapping_reports_uncovered_required_fields() {
        let (store, _) = seeded_store();
        store.insert_template_fields(
            "tpl",
            vec![
                field("invoiceNumber", FieldType::String, true),
                field("dueDate", FieldType::Date, true),
            ],
        );
        let engine = MatchingEngine::from_shared(store);

        let validation = engine.validate_mapping("tpl", None, None).await.unwrap();
        assert!(!validation.is_valid());
        assert_eq!(validation.missing_required, vec!["dueDate".to_string()]);
    }

    #[tokio::test]
    async fn test_mark_exported_requires_completed() {
        let (store, instance_id) = seeded_store();
        let engine = MatchingEngine::from_shared(store.clone());

        assert!(engine.mark_exported(&instance_id).await.is_err());

        store
            .update_status(&instance_id, InstanceStatus::Completed)
            .await
            .unwrap();
        engine.mark_exported(&instance_id).await.unwrap();
        let instance = store.get_instance(&instance_id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Exported);
    }
}
