use crate::error::{Result, StoreError};
use crate::{from_millis, to_millis, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub workspace_id: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OperationType {
    Deploy,
    Redeploy,
    Start,
    Restart,
    Shutdown,
    Destroy,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Deploy => "deploy",
            OperationType::Redeploy => "redeploy",
            OperationType::Start => "start",
            OperationType::Restart => "restart",
            OperationType::Shutdown => "shutdown",
            OperationType::Destroy => "destroy",
            OperationType::Delete => "delete",
        }
    }

    /// Operations that discard the container and whatever lives only inside it.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            OperationType::Redeploy | OperationType::Destroy | OperationType::Delete
        )
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    workspace_id: String,
    operation_type: OperationType,
    status: OperationStatus,
    started_at: i64,
    completed_at: Option<i64>,
    error: Option<String>,
}

impl TryFrom<OperationRow> for Operation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            operation_type: row.operation_type,
            status: row.status,
            started_at: from_millis(row.started_at)?,
            completed_at: row.completed_at.map(from_millis).transpose()?,
            error: row.error,
        })
    }
}

impl Store {
    /// Record an operation for tracking
    #[instrument(skip(self))]
    pub async fn record_operation(
        &self,
        workspace_id: &str,
        operation_type: OperationType,
        status: OperationStatus,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO operations (id, workspace_id, operation_type, status, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(operation_type)
        .bind(status)
        .bind(to_millis(Utc::now()))
        .execute(self.pool())
        .await?;

        Ok(id)
    }

    /// Mark an operation finished, successfully or not
    pub async fn complete_operation(
        &self,
        id: &str,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE operations SET status = ?, completed_at = ?, error = ? WHERE id = ?",
        )
        .bind(status)
        .bind(to_millis(Utc::now()))
        .bind(error)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Operation", id));
        }

        Ok(())
    }

    /// Get a single operation by ID
    pub async fn get_operation(&self, id: &str) -> Result<Operation> {
        let row = sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("Operation", id))?;

        row.try_into()
    }

    /// Get operations, newest first, optionally for one workspace
    pub async fn list_operations(&self, workspace_id: Option<&str>) -> Result<Vec<Operation>> {
        let rows = match workspace_id {
            Some(workspace_id) => {
                sqlx::query_as::<_, OperationRow>(
                    "SELECT * FROM operations WHERE workspace_id = ? ORDER BY started_at DESC, rowid DESC",
                )
                .bind(workspace_id)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, OperationRow>(
                    "SELECT * FROM operations ORDER BY started_at DESC, rowid DESC",
                )
                .fetch_all(self.pool())
                .await?
            }
        };

        rows.into_iter().map(Operation::try_from).collect()
    }
}
