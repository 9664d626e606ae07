use crate::env::EnvMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source repository; workspaces are per-branch checkouts of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub name: String,
    /// Stored environment configuration copied into new workspaces.
    pub env: EnvMap,
    pub created_at: DateTime<Utc>,
}
