use crate::error::{Result, StoreError};
use crate::{from_millis, to_millis, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use yard_core::{ContainerStatus, Workspace, WorkspaceStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkspace {
    pub repository_id: String,
    pub name: String,
    pub branch_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilters {
    pub repository_id: Option<String>,
    pub container_status: Option<ContainerStatus>,
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    repository_id: String,
    name: String,
    branch_name: String,
    status: String,
    container_id: Option<String>,
    container_status: String,
    container_ip: Option<String>,
    agent_connected_at: Option<i64>,
    has_uncommitted_changes: bool,
    last_activity_at: i64,
    created_at: i64,
}

impl TryFrom<WorkspaceRow> for Workspace {
    type Error = StoreError;

    fn try_from(row: WorkspaceRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            repository_id: row.repository_id,
            name: row.name,
            branch_name: row.branch_name,
            status: row.status.parse()?,
            container_id: row.container_id,
            container_status: row.container_status.parse()?,
            container_ip: row.container_ip,
            agent_connected_at: row.agent_connected_at.map(from_millis).transpose()?,
            has_uncommitted_changes: row.has_uncommitted_changes,
            last_activity_at: from_millis(row.last_activity_at)?,
            created_at: from_millis(row.created_at)?,
        })
    }
}

impl Store {
    /// Create a new workspace with no container
    #[instrument(skip(self, req), fields(repository_id = %req.repository_id, branch = %req.branch_name))]
    pub async fn create_workspace(&self, req: &NewWorkspace) -> Result<Workspace> {
        // Surface a missing repository as NotFound rather than a foreign key failure.
        self.get_repository(&req.repository_id).await?;

        let id = Uuid::new_v4().to_string();
        let now = to_millis(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO workspaces (id, repository_id, name, branch_name, status, container_status, last_activity_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.repository_id)
        .bind(&req.name)
        .bind(&req.branch_name)
        .bind(WorkspaceStatus::Active.as_str())
        .bind(ContainerStatus::None.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_workspace(&id).await
    }

    /// Get a single workspace by ID
    pub async fn get_workspace(&self, id: &str) -> Result<Workspace> {
        sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("Workspace", id))?
            .try_into()
    }

    /// List workspaces with optional filters
    pub async fn list_workspaces(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>> {
        let mut query = "SELECT * FROM workspaces WHERE 1=1".to_string();

        if filters.repository_id.is_some() {
            query.push_str(" AND repository_id = ?");
        }
        if filters.container_status.is_some() {
            query.push_str(" AND container_status = ?");
        }

        query.push_str(" ORDER BY created_at DESC, rowid DESC");

        let mut q = sqlx::query_as::<_, WorkspaceRow>(&query);

        if let Some(repository_id) = &filters.repository_id {
            q = q.bind(repository_id);
        }
        if let Some(status) = &filters.container_status {
            q = q.bind(status.as_str());
        }

        let rows = q.fetch_all(self.pool()).await?;

        rows.into_iter().map(Workspace::try_from).collect()
    }

    /// Persist the container-related fields of a workspace.
    pub async fn save_container_state(&self, workspace: &Workspace) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workspaces
             SET container_id = ?, container_status = ?, container_ip = ?, agent_connected_at = ?,
                 status = ?, last_activity_at = ?
             WHERE id = ?",
        )
        .bind(&workspace.container_id)
        .bind(workspace.container_status.as_str())
        .bind(&workspace.container_ip)
        .bind(workspace.agent_connected_at.map(to_millis))
        .bind(workspace.status.as_str())
        .bind(to_millis(Utc::now()))
        .bind(&workspace.id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Workspace", &workspace.id));
        }

        Ok(())
    }

    pub async fn set_uncommitted_changes(&self, id: &str, dirty: bool) -> Result<()> {
        let result = sqlx::query("UPDATE workspaces SET has_uncommitted_changes = ? WHERE id = ?")
            .bind(dirty)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Workspace", id));
        }

        Ok(())
    }

    /// Delete a workspace record
    #[instrument(skip(self))]
    pub async fn delete_workspace(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Workspace", id));
        }

        Ok(())
    }
}
