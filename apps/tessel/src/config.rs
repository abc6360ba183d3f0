//! # Configuration
//!
//! Settings come from three places, highest precedence first:
//!
//! 1. Command-line flags
//! 2. A TOML file (`--config <path>`, or `tessel.toml` in the working
//!    directory when present)
//! 3. Built-in defaults
//!
//! ```toml
//! database = "graphs/main.redb"
//! graph = "main"
//! log_format = "json"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tessel_core::{NamedVariant, TesselError, named_variants};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "tessel.toml";

/// Database path used when neither a flag nor the file names one.
pub const DEFAULT_DATABASE: &str = "tessel.redb";

/// Graph name used when neither a flag nor the file names one.
pub const DEFAULT_GRAPH: &str = "main";

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// LOG FORMAT
// =============================================================================

/// How the binary renders log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

named_variants!(LogFormat { Text => "text", Json => "json" });

impl LogFormat {
    /// Parse a format name.
    pub fn parse(name: &str) -> Result<Self, TesselError> {
        Self::from_variant_name(name).ok_or_else(|| {
            TesselError::ConfigError(format!(
                "unknown log format '{name}' (expected 'text' or 'json')"
            ))
        })
    }
}

// =============================================================================
// FILE CONFIG
// =============================================================================

/// Contents of a TOML configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Path to the redb database.
    pub database: Option<PathBuf>,
    /// Graph name used for edge types and grouped ids.
    pub graph: Option<String>,
    /// `"text"` or `"json"`.
    pub log_format: Option<String>,
}

impl FileConfig {
    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self, TesselError> {
        toml::from_str(text).map_err(|e| TesselError::ConfigError(e.to_string()))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, TesselError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            TesselError::ConfigError(format!("cannot read '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(TesselError::ConfigError(format!(
                "'{}' is {} bytes, more than the {} allowed",
                path.display(),
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            TesselError::ConfigError(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load the explicit file, else `tessel.toml` if it exists, else nothing.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, TesselError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Final settings after flags, file and defaults are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database: PathBuf,
    pub graph: String,
    pub log_format: LogFormat,
}

impl Settings {
    /// Merge flag values over file values over defaults.
    pub fn resolve(
        database: Option<PathBuf>,
        graph: Option<String>,
        file: FileConfig,
    ) -> Result<Self, TesselError> {
        let log_format = match file.log_format.as_deref() {
            Some(name) => LogFormat::parse(name)?,
            None => LogFormat::default(),
        };
        let graph = graph
            .or(file.graph)
            .unwrap_or_else(|| DEFAULT_GRAPH.to_string());
        if graph.is_empty() {
            return Err(TesselError::ConfigError("graph name is empty".to_string()));
        }

        Ok(Self {
            database: database
                .or(file.database)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            graph,
            log_format,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
