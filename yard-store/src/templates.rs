use crate::error::{Result, StoreError};
use crate::{from_millis, to_millis, Store};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::instrument;
use yard_core::{Template, TemplateSource, TemplateStatus};

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    status: String,
    vmid: Option<i64>,
    node: Option<String>,
    base_ct_template: Option<String>,
    parent_template_id: Option<String>,
    tech_stacks: String,
    inherited_tech_stacks: String,
    is_default: bool,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TemplateRow> for Template {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> Result<Self> {
        let source = match (row.base_ct_template, row.parent_template_id) {
            (Some(base), None) => TemplateSource::base(base),
            (None, Some(parent)) => TemplateSource::parent(parent),
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "template {} must have exactly one of base or parent",
                    row.id
                )))
            }
        };

        let vmid = row
            .vmid
            .map(|v| {
                u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("vmid out of range: {v}")))
            })
            .transpose()?;

        Ok(Self {
            id: row.id,
            name: row.name,
            status: row.status.parse()?,
            vmid,
            node: row.node,
            source,
            tech_stacks: serde_json::from_str::<BTreeSet<String>>(&row.tech_stacks)?,
            inherited_tech_stacks: serde_json::from_str::<BTreeSet<String>>(
                &row.inherited_tech_stacks,
            )?,
            is_default: row.is_default,
            error_message: row.error_message,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

impl Store {
    /// Insert a fully built template record.
    #[instrument(skip(self, template), fields(template_id = %template.id, name = %template.name))]
    pub async fn insert_template(&self, template: &Template) -> Result<Template> {
        sqlx::query(
            r#"
            INSERT INTO templates (id, name, status, vmid, node, base_ct_template, parent_template_id,
                                   tech_stacks, inherited_tech_stacks, is_default, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(template.status.as_str())
        .bind(template.vmid.map(i64::from))
        .bind(&template.node)
        .bind(template.base_ct_template())
        .bind(template.parent_template_id())
        .bind(serde_json::to_string(&template.tech_stacks)?)
        .bind(serde_json::to_string(&template.inherited_tech_stacks)?)
        .bind(template.is_default)
        .bind(&template.error_message)
        .bind(to_millis(template.created_at))
        .bind(to_millis(template.updated_at))
        .execute(self.pool())
        .await?;

        self.get_template(&template.id).await
    }

    pub async fn get_template(&self, id: &str) -> Result<Template> {
        sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("Template", id))?
            .try_into()
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(Template::try_from).collect()
    }

    /// Templates cloned from `parent_id`.
    pub async fn child_templates(&self, parent_id: &str) -> Result<Vec<Template>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT * FROM templates WHERE parent_template_id = ? ORDER BY name",
        )
        .bind(parent_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(Template::try_from).collect()
    }

    pub async fn default_template(&self) -> Result<Option<Template>> {
        sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE is_default = 1 LIMIT 1")
            .fetch_optional(self.pool())
            .await?
            .map(Template::try_from)
            .transpose()
    }

    /// Move a template through the pipeline, recording or clearing its error.
    pub async fn set_template_status(
        &self,
        id: &str,
        status: TemplateStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE templates SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Template", id));
        }

        Ok(())
    }

    pub async fn set_template_host(
        &self,
        id: &str,
        vmid: Option<u32>,
        node: Option<&str>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE templates SET vmid = ?, node = ?, updated_at = ? WHERE id = ?")
                .bind(vmid.map(i64::from))
                .bind(node)
                .bind(to_millis(Utc::now()))
                .bind(id)
                .execute(self.pool())
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Template", id));
        }

        Ok(())
    }

    pub async fn set_template_stacks(&self, id: &str, tech_stacks: &BTreeSet<String>) -> Result<()> {
        let result =
            sqlx::query("UPDATE templates SET tech_stacks = ?, updated_at = ? WHERE id = ?")
                .bind(serde_json::to_string(tech_stacks)?)
                .bind(to_millis(Utc::now()))
                .bind(id)
                .execute(self.pool())
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Template", id));
        }

        Ok(())
    }

    /// Make `id` the only default template.
    #[instrument(skip(self))]
    pub async fn set_default_template(&self, id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE templates SET is_default = 0 WHERE is_default = 1")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("UPDATE templates SET is_default = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Template", id));
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_template(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Template", id));
        }

        Ok(())
    }
}
