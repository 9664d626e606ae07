use crate::error::{Result, StoreError};
use crate::{from_millis, to_millis, Store};
use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;
use yard_core::{EnvMap, Repository};

#[derive(sqlx::FromRow)]
struct RepositoryRow {
    id: String,
    name: String,
    env: String,
    created_at: i64,
}

impl TryFrom<RepositoryRow> for Repository {
    type Error = StoreError;

    fn try_from(row: RepositoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            env: serde_json::from_str(&row.env)?,
            created_at: from_millis(row.created_at)?,
        })
    }
}

impl Store {
    #[instrument(skip(self, env))]
    pub async fn create_repository(&self, name: &str, env: &EnvMap) -> Result<Repository> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO repositories (id, name, env, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(serde_json::to_string(env)?)
            .bind(to_millis(Utc::now()))
            .execute(self.pool())
            .await?;

        self.get_repository(&id).await
    }

    pub async fn get_repository(&self, id: &str) -> Result<Repository> {
        sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("Repository", id))?
            .try_into()
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(Repository::try_from).collect()
    }

    /// The repository's stored environment configuration.
    pub async fn get_repository_env(&self, id: &str) -> Result<EnvMap> {
        Ok(self.get_repository(id).await?.env)
    }

    #[instrument(skip(self, env), fields(keys = env.len()))]
    pub async fn set_repository_env(&self, id: &str, env: &EnvMap) -> Result<()> {
        let result = sqlx::query("UPDATE repositories SET env = ? WHERE id = ?")
            .bind(serde_json::to_string(env)?)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Repository", id));
        }

        Ok(())
    }
}
