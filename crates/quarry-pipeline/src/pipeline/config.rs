//! Builder configuration
//!
//! Loaded from TOML with sensible defaults for every optional value:
//!
//! ```toml
//! id_field = "_id"
//! cursor_column = "id"
//! page_size = 15
//! case_insensitive_patterns = true
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::driver::AggregateOptions;
use super::operator::PatternPolicy;
use super::{PipelineError, Result};

/// Builder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Identity field used as the tiebreak sort of `last()`
    pub id_field: String,
    /// Default cursor-pagination column
    pub cursor_column: String,
    /// Default page size for pagination and chunking
    pub page_size: u64,
    /// Case-insensitive like/startsWith/endsWith
    pub case_insensitive_patterns: bool,
    /// Forward cursor comparison uses `>=` instead of `>`
    pub cursor_inclusive: bool,
    /// Let the engine spill aggregations to disk
    pub allow_disk_use: bool,
    /// Server-side aggregate time limit
    pub max_time_ms: Option<u64>,
    /// Logging (CLI only)
    pub logging: LoggingConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            id_field: "_id".to_string(),
            cursor_column: "id".to_string(),
            page_size: 15,
            case_insensitive_patterns: true,
            cursor_inclusive: false,
            allow_disk_use: false,
            max_time_ms: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl BuilderConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.id_field.is_empty() {
            return Err(PipelineError::Config("id_field cannot be empty".into()));
        }
        if self.cursor_column.is_empty() {
            return Err(PipelineError::Config("cursor_column cannot be empty".into()));
        }
        if self.page_size == 0 {
            return Err(PipelineError::Config("page_size cannot be 0".into()));
        }
        Ok(())
    }

    /// Collation policy for pattern operators
    pub fn pattern_policy(&self) -> PatternPolicy {
        PatternPolicy {
            case_insensitive: self.case_insensitive_patterns,
        }
    }

    /// Options forwarded with every aggregate call
    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            allow_disk_use: self.allow_disk_use,
            max_time_ms: self.max_time_ms,
        }
    }
}
