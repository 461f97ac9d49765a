//! Postgres-backed store
//!
//! Scalar columns carry what queries filter and sort on; the full record
//! travels as a JSONB payload so the stored shape stays in lockstep with
//! the serde model. Batch writes run inside one transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Row as _};

use rowforge_core::instance::{InstanceStatus, TemplateInstance};
use rowforge_core::row::Row;
use rowforge_core::rules::MappingConfig;
use rowforge_core::schema::TargetSchemaField;

use crate::error::{Error, Result};
use crate::store::{ConfigStore, DocumentStore, ExtractedDocument, InstanceStore, InstanceStats};

/// Postgres store backing all three store traits
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Persistence(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}

fn parse_status(text: &str) -> Result<InstanceStatus> {
    serde_json::from_value(serde_json::Value::String(text.to_string())).map_err(Error::Payload)
}

fn instance_from_row(row: &sqlx::postgres::PgRow) -> Result<TemplateInstance> {
    Ok(TemplateInstance {
        id: row.try_get("id")?,
        template_id: row.try_get("template_id")?,
        name: row.try_get("name")?,
        status: parse_status(row.try_get::<String, _>("status")?.as_str())?,
        row_count: row.try_get::<i64, _>("row_count")? as u64,
        valid_row_count: row.try_get::<i64, _>("valid_row_count")? as u64,
        error_row_count: row.try_get::<i64, _>("error_row_count")? as u64,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn list_configs(
        &self,
        template_id: &str,
        company_id: Option<&str>,
        format_id: Option<&str>,
    ) -> Result<Vec<MappingConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM mapping_configs
            WHERE template_id = $1
              AND is_active
              AND (scope = 'GLOBAL'
                OR (scope = 'COMPANY' AND company_id = $2)
                OR (scope = 'FORMAT' AND company_id = $2 AND document_format_id = $3))
            ORDER BY id
            "#,
        )
        .bind(template_id)
        .bind(company_id)
        .bind(format_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                serde_json::from_value(payload).map_err(Error::Payload)
            })
            .collect()
    }

    async fn create_config(&self, config: MappingConfig) -> Result<()> {
        let payload = serde_json::to_value(&config)?;
        sqlx::query(
            r#"
            INSERT INTO mapping_configs
                (id, template_id, company_id, document_format_id, scope, priority, is_active, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&config.id)
        .bind(&config.template_id)
        .bind(&config.company_id)
        .bind(&config.document_format_id)
        .bind(scope_name(&config))
        .bind(config.priority)
        .bind(config.is_active)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_config(&self, config: MappingConfig) -> Result<()> {
        let payload = serde_json::to_value(&config)?;
        let result = sqlx::query(
            r#"
            UPDATE mapping_configs
            SET template_id = $2, company_id = $3, document_format_id = $4,
                scope = $5, priority = $6, is_active = $7, payload = $8
            WHERE id = $1
            "#,
        )
        .bind(&config.id)
        .bind(&config.template_id)
        .bind(&config.company_id)
        .bind(&config.document_format_id)
        .bind(scope_name(&config))
        .bind(config.priority)
        .bind(config.is_active)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                kind: "config",
                id: config.id,
            });
        }
        Ok(())
    }

    async fn soft_delete(&self, config_id: &str) -> Result<String> {
        let row = sqlx::query(
            r#"
            UPDATE mapping_configs
            SET is_active = FALSE,
                payload = jsonb_set(payload, '{isActive}', 'false')
            WHERE id = $1
            RETURNING template_id
            "#,
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound {
            kind: "config",
            id: config_id.to_string(),
        })?;
        Ok(row.try_get("template_id")?)
    }

    async fn hard_delete(&self, config_id: &str) -> Result<String> {
        let row = sqlx::query("DELETE FROM mapping_configs WHERE id = $1 RETURNING template_id")
            .bind(config_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound {
                kind: "config",
                id: config_id.to_string(),
            })?;
        Ok(row.try_get("template_id")?)
    }
}

fn scope_name(config: &MappingConfig) -> &'static str {
    match config.scope {
        rowforge_core::rules::ConfigScope::Global => "GLOBAL",
        rowforge_core::rules::ConfigScope::Company => "COMPANY",
        rowforge_core::rules::ConfigScope::Format => "FORMAT",
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn load_documents(&self, ids: &[String]) -> Result<Vec<ExtractedDocument>> {
        let rows = sqlx::query(
            "SELECT id, extracted_fields FROM documents WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let fields: serde_json::Value = row.try_get("extracted_fields")?;
            let extracted_fields = fields
                .as_object()
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    kind: "document",
                    id: id.clone(),
                })?;
            documents.push(ExtractedDocument {
                id,
                extracted_fields,
            });
        }

        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !documents.iter().any(|d| d.id == **id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::DocumentsNotFound { missing });
        }

        // Restore caller order; ANY($1) gives no ordering guarantee.
        documents.sort_by_key(|d| ids.iter().position(|id| *id == d.id));
        Ok(documents)
    }
}

#[async_trait]
impl InstanceStore for PgStore {
    async fn get_instance(&self, instance_id: &str) -> Result<TemplateInstance> {
        let row = sqlx::query("SELECT * FROM template_instances WHERE id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })?;
        instance_from_row(&row)
    }

    async fn update_status(&self, instance_id: &str, status: InstanceStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE template_instances SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(instance_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_template_fields(&self, template_id: &str) -> Result<Vec<TargetSchemaField>> {
        let rows = sqlx::query(
            "SELECT payload FROM template_fields WHERE template_id = $1 ORDER BY position",
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Err(Error::NotFound {
                kind: "template",
                id: template_id.to_string(),
            });
        }
        rows.iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                serde_json::from_value(payload).map_err(Error::Payload)
            })
            .collect()
    }

    async fn list_rows(&self, instance_id: &str) -> Result<Vec<Row>> {
        let rows = sqlx::query(
            "SELECT payload FROM instance_rows WHERE instance_id = $1 ORDER BY row_index",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                serde_json::from_value(payload).map_err(Error::Payload)
            })
            .collect()
    }

    async fn apply_batch(&self, instance_id: &str, rows: Vec<Row>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in &rows {
            let payload = serde_json::to_value(row)?;
            sqlx::query(
                r#"
                INSERT INTO instance_rows (id, instance_id, row_key, row_index, status, payload)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE
                SET row_key = EXCLUDED.row_key,
                    row_index = EXCLUDED.row_index,
                    status = EXCLUDED.status,
                    payload = EXCLUDED.payload
                "#,
            )
            .bind(&row.id)
            .bind(instance_id)
            .bind(&row.row_key)
            .bind(row.row_index as i64)
            .bind(status_name(row))
            .bind(payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn add_row(&self, instance_id: &str, row: Row) -> Result<()> {
        let payload = serde_json::to_value(&row)?;
        sqlx::query(
            r#"
            INSERT INTO instance_rows (id, instance_id, row_key, row_index, status, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&row.id)
        .bind(instance_id)
        .bind(&row.row_key)
        .bind(row.row_index as i64)
        .bind(status_name(&row))
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_row(&self, instance_id: &str, row: Row) -> Result<()> {
        let payload = serde_json::to_value(&row)?;
        let result = sqlx::query(
            r#"
            UPDATE instance_rows
            SET row_key = $3, row_index = $4, status = $5, payload = $6
            WHERE id = $1 AND instance_id = $2
            "#,
        )
        .bind(&row.id)
        .bind(instance_id)
        .bind(&row.row_key)
        .bind(row.row_index as i64)
        .bind(status_name(&row))
        .bind(payload)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                kind: "row",
                id: row.id,
            });
        }
        Ok(())
    }

    async fn delete_row(&self, instance_id: &str, row_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM instance_rows WHERE id = $1 AND instance_id = $2")
            .bind(row_id)
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                kind: "row",
                id: row_id.to_string(),
            });
        }
        Ok(())
    }

    async fn recompute_statistics(&self, instance_id: &str) -> Result<InstanceStats> {
        let row = sqlx::query(
            r#"
            UPDATE template_instances
            SET row_count = counted.total,
                valid_row_count = counted.valid,
                error_row_count = counted.total - counted.valid,
                updated_at = now()
            FROM (
                SELECT count(*) AS total,
                       count(*) FILTER (WHERE status = 'VALID') AS valid
                FROM instance_rows WHERE instance_id = $1
            ) AS counted
            WHERE id = $1
            RETURNING row_count, valid_row_count, error_row_count
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound {
            kind: "instance",
            id: instance_id.to_string(),
        })?;

        Ok(InstanceStats {
            row_count: row.try_get::<i64, _>("row_count")? as u64,
            valid_row_count: row.try_get::<i64, _>("valid_row_count")? as u64,
            error_row_count: row.try_get::<i64, _>("error_row_count")? as u64,
        })
    }
}

fn status_name(row: &Row) -> &'static str {
    match row.status {
        rowforge_core::row::RowStatus::Valid => "VALID",
        rowforge_core::row::RowStatus::Invalid => "INVALID",
    }
}
