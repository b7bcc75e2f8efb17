//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use missive_framework::{DEFAULT_SUFFIX, LocatorStrategy};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MissiveConfig {
    /// Logging output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// How the message bus assembles its pipelines.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::InvalidLogLevel {
                field: "logging.level".into(),
                level: s.to_string(),
            }),
        }
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in log lines.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers in log lines.
    #[serde(default)]
    pub file_location: bool,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files kept on disk.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Per-target level overrides, e.g. `missive_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            filters: HashMap::new(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}

// =============================================================================
// Pipeline
// =============================================================================

/// Handler discovery strategy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorKind {
    #[default]
    Marker,
    NamingConvention,
}

/// Handler locator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    #[serde(default)]
    pub strategy: LocatorKind,

    /// Handler type name suffix for the naming convention.
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            strategy: LocatorKind::default(),
            suffix: default_suffix(),
        }
    }
}

impl LocatorConfig {
    /// Converts to the locator's strategy.
    pub fn to_strategy(&self) -> LocatorStrategy {
        match self.strategy {
            LocatorKind::Marker => LocatorStrategy::Marker,
            LocatorKind::NamingConvention => LocatorStrategy::NamingConvention {
                suffix: self.suffix.clone(),
            },
        }
    }
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

/// Pipeline assembly settings shared by the command, query and event buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rethrow captured handler failures after the pipeline completes.
    #[serde(default = "default_true")]
    pub throw_on_fail: bool,

    /// Fill unset handler properties from the resolver.
    #[serde(default)]
    pub inject_properties: bool,

    /// Build unregistered catalog components as dependencies.
    #[serde(default)]
    pub use_internal_resolver: bool,

    #[serde(default)]
    pub locator: LocatorConfig,

    /// Add the tracing middleware in front of each pipeline.
    #[serde(default = "default_true")]
    pub tracing: bool,

    /// Add the validation middleware after the locator.
    #[serde(default = "default_true")]
    pub validation: bool,

    /// Append a record of every dispatch to the message repository.
    #[serde(default)]
    pub record_messages: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            throw_on_fail: true,
            inject_properties: false,
            use_internal_resolver: false,
            locator: LocatorConfig::default(),
            tracing: true,
            validation: true,
            record_messages: false,
        }
    }
}

fn default_true() -> bool {
    true
}
