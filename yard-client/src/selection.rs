//! Persisted UI selection.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the user had selected when the client last ran. Every pointer is
/// only a hint until it has been checked against freshly fetched state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_group_id: Option<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self == &Selection::default()
    }

    /// Drop the workspace and everything scoped to it, keeping the repository.
    pub fn clear_workspace(&mut self) {
        self.workspace_id = None;
        self.tab_id = None;
        self.tab_group_id = None;
    }
}

/// JSON file holding the last [`Selection`].
#[derive(Debug, Clone)]
pub struct SelectionFile {
    path: PathBuf,
}

impl SelectionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty selection.
    pub fn load(&self) -> Result<Selection> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Selection::default()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|source| ClientError::SelectionFormat {
            path: self.path.clone(),
            source,
        })
    }

    /// Write atomically through a temporary file in the same directory.
    pub fn save(&self, selection: &Selection) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let json =
            serde_json::to_string_pretty(selection).map_err(|source| ClientError::SelectionFormat {
                path: self.path.clone(),
                source,
            })?;

        let mut temp_file = tempfile::Builder::new()
            .prefix(".selection-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        temp_file.write_all(json.as_bytes())?;
        temp_file.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), "selection saved");
        Ok(())
    }
}
