//! Environment configuration and the divergence check run before destructive operations.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type EnvMap = BTreeMap<String, String>;

/// Parse the contents of a `.env` file.
///
/// Accepts `KEY=VALUE`, an optional `export ` prefix, blank lines and `#`
/// comments. Single or double quotes around a value are stripped. Any other
/// line is an error: a snapshot that cannot be read must not be treated as empty.
pub fn parse_dotenv(contents: &str) -> Result<EnvMap> {
    let mut vars = EnvMap::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| CoreError::InvalidDotenvLine {
                line: index + 1,
                content: raw.to_string(),
            })?;

        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CoreError::InvalidDotenvLine {
                line: index + 1,
                content: raw.to_string(),
            });
        }

        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Render variables back into `.env` form, quoting values that need it.
pub fn render_dotenv(vars: &EnvMap) -> String {
    let mut out = String::new();
    for (key, value) in vars {
        let needs_quotes = value.is_empty()
            || value
                .chars()
                .any(|c| c.is_whitespace() || c == '#' || c == '\'' || c == '"');
        if needs_quotes && !value.contains('"') {
            out.push_str(&format!("{key}=\"{value}\"\n"));
        } else if needs_quotes {
            out.push_str(&format!("{key}='{value}'\n"));
        } else {
            out.push_str(&format!("{key}={value}\n"));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedValue {
    pub stored: String,
    pub live: String,
}

/// Divergence between a workspace's live `.env` and its repository's stored configuration.
///
/// `added` holds keys only the live snapshot has, `removed` keys only the
/// repository has, and `changed` keys whose values differ.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarDiff {
    pub added: EnvMap,
    pub removed: EnvMap,
    pub changed: BTreeMap<String, ChangedValue>,
}

impl EnvVarDiff {
    pub fn compute(live: &EnvMap, stored: &EnvMap) -> Self {
        let mut diff = EnvVarDiff::default();

        for (key, live_value) in live {
            match stored.get(key) {
                None => {
                    diff.added.insert(key.clone(), live_value.clone());
                }
                Some(stored_value) if stored_value != live_value => {
                    diff.changed.insert(
                        key.clone(),
                        ChangedValue {
                            stored: stored_value.clone(),
                            live: live_value.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }

        for (key, stored_value) in stored {
            if !live.contains_key(key) {
                diff.removed.insert(key.clone(), stored_value.clone());
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}
