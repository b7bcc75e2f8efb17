//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LocatorKind, LogLevel, LogOutput, LoggingConfig, MissiveConfig, PipelineConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &MissiveConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_pipeline_config(&config.pipeline)?;
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (target, level) in &logging.filters {
        if target.trim().is_empty() {
            return Err(ConfigError::validation("Log filter target cannot be empty"));
        }
        level
            .parse::<LogLevel>()
            .map_err(|_| ConfigError::InvalidLogLevel {
                field: format!("logging.filters.{target}"),
                level: level.clone(),
            })?;
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    Ok(())
}

/// Validates pipeline settings.
fn validate_pipeline_config(pipeline: &PipelineConfig) -> ConfigResult<()> {
    let suffix = pipeline.locator.suffix.trim();
    if pipeline.locator.strategy == LocatorKind::NamingConvention && suffix.is_empty() {
        return Err(ConfigError::missing_field("pipeline.locator.suffix"));
    }

    if suffix.contains(char::is_whitespace) {
        return Err(ConfigError::validation(
            "Locator suffix cannot contain whitespace",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = MissiveConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_filter_level() {
        let mut config = MissiveConfig::default();
        config
            .logging
            .filters
            .insert("missive_framework".into(), "loud".into());

        let result = validate_config(&config);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidLogLevel { ref field, .. }) if field == "logging.filters.missive_framework"
        ));
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = MissiveConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some(PathBuf::from("logs/missive.log"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_suffix() {
        let mut config = MissiveConfig::default();
        config.pipeline.locator.suffix = String::new();
        // Ignored while the marker strategy is active.
        assert!(validate_config(&config).is_ok());

        config.pipeline.locator.strategy = LocatorKind::NamingConvention;
        assert!(validate_config(&config).is_err());

        config.pipeline.locator.suffix = "My Handlers".into();
        assert!(validate_config(&config).is_err());
    }
}
