//! Tracing subscriber setup shared by yard binaries.
//!
//! Configured from the environment:
//! - `YARD_LOG_LEVEL` (or `RUST_LOG`): filter directives, default `info`
//! - `YARD_LOG_FORMAT`: `human` or `json`
//! - `YARD_LOG_OUTPUT`: `console`, `file` or `both`
//! - `YARD_LOG_FILE`: log file path, rotated daily

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        writer::{BoxMakeWriter, MakeWriterExt},
    },
    prelude::*,
    registry, EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            output: LogOutput::Console,
            file_path: std::env::temp_dir().join("yard.log"),
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unknown values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let format = match lookup("YARD_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };
        let output = match lookup("YARD_LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Console,
        };

        Self {
            level: lookup("YARD_LOG_LEVEL").unwrap_or(defaults.level),
            format,
            output,
            file_path: lookup("YARD_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for directive in ["tokio=warn", "hyper=warn", "sqlx=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for the
/// life of the process. Installing twice is a no-op.
pub fn init_subscriber(settings: &LogSettings) -> Option<WorkerGuard> {
    let mut guard = None;

    let mut file_writer = || {
        let dir = settings
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = settings
            .file_path
            .file_name()
            .unwrap_or_else(|| "yard.log".as_ref());
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
        guard = Some(file_guard);
        writer
    };

    let writer = match settings.output {
        LogOutput::Console => BoxMakeWriter::new(std::io::stdout),
        LogOutput::File => BoxMakeWriter::new(file_writer()),
        LogOutput::Both => BoxMakeWriter::new(std::io::stdout.and(file_writer())),
    };

    let fmt_layer = fmt::layer().with_writer(writer);
    let layer = match settings.format {
        LogFormat::Json => fmt_layer
            .json()
            .with_filter(settings.env_filter())
            .boxed(),
        LogFormat::Human => fmt_layer.with_filter(settings.env_filter()).boxed(),
    };

    if registry().with(layer).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("YARD_LOG_LEVEL", "debug,yard_sync=trace"),
            ("YARD_LOG_FORMAT", "json"),
            ("YARD_LOG_OUTPUT", "both"),
            ("YARD_LOG_FILE", "/var/log/yard/api.log"),
        ]
        .into_iter()
        .collect();

        let settings = LogSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.level, "debug,yard_sync=trace");
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.output, LogOutput::Both);
        assert_eq!(settings.file_path, PathBuf::from("/var/log/yard/api.log"));
    }

    #[test]
    fn test_unknown_values_use_defaults() {
        let settings = LogSettings::from_lookup(|k| match k {
            "YARD_LOG_FORMAT" => Some("xml".to_string()),
            "YARD_LOG_OUTPUT" => Some("syslog".to_string()),
            _ => None,
        });

        assert_eq!(settings.format, LogFormat::Human);
        assert_eq!(settings.output, LogOutput::Console);
        assert_eq!(settings.level, "info");
    }
}
