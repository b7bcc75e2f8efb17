//! Layered configuration loading.
//!
//! A [`MissiveConfig`] is assembled from these sources, each overriding the
//! ones before it:
//!
//! 1. [`MissiveConfig::default`]
//! 2. The profile file, `missive.{profile}.toml` (or `.yaml` / `.yml`)
//! 3. The main file, `missive.toml` (or `.yaml` / `.yml`)
//! 4. `MISSIVE_` environment variables, with `__` separating nested keys
//! 5. Values given to [`ConfigLoader::merge`] or [`ConfigLoader::set`]
//!
//! Files are taken from the first search directory that holds any of them.
//! Without explicit search paths that is the working directory, then the
//! user config directory (`~/.config/missive` on Linux).
//!
//! ```text
//! MISSIVE_PIPELINE__THROW_ON_FAIL=false          → pipeline.throw_on_fail
//! MISSIVE_PIPELINE__LOCATOR__STRATEGY=naming-convention
//! MISSIVE_LOGGING__LEVEL=debug                   → logging.level
//! ```
//!
//! TOML is read with the default `toml-config` feature, YAML with
//! `yaml-config`.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::MissiveConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "MISSIVE_";
const PROFILE_VAR: &str = "MISSIVE_PROFILE";
const FILE_STEM: &str = "missive";

/// File extensions read by the enabled format features, in lookup order.
const EXTENSIONS: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "toml",
    #[cfg(feature = "yaml-config")]
    "yaml",
    #[cfg(feature = "yaml-config")]
    "yml",
];

/// Name of the profile whose file is layered under the main file.
///
/// `prod` and `dev` are accepted for `production` and `development`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(String);

impl Profile {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().to_lowercase();
        match name.as_str() {
            "prod" => Self("production".into()),
            "dev" | "" => Self::default(),
            _ => Self(name),
        }
    }

    /// Reads `MISSIVE_PROFILE`, falling back to `development`.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self("development".into())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builder over the configuration sources.
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .profile("production")
///     .file("deploy/missive.toml")
///     .set("pipeline.record_messages", true)
///     .load()?;
/// ```
pub struct ConfigLoader {
    profile: Profile,
    search_paths: Vec<PathBuf>,
    file: Option<PathBuf>,
    env: bool,
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Starts from the `MISSIVE_PROFILE` profile with environment variables
    /// enabled.
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            file: None,
            env: true,
            overrides: Figment::new(),
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::new(profile);
        self
    }

    /// Adds a directory to look for `missive.*` files in.
    ///
    /// Once any path is added, the default directories are no longer searched.
    pub fn search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Reads this file instead of searching.
    ///
    /// A profile file next to it (`app.production.toml` for `app.toml`) is
    /// still layered underneath. The file itself must exist.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Reads `MISSIVE_` environment variables (the default).
    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Layers a whole configuration over every other source.
    ///
    /// All of its fields apply, including those left at their defaults; use
    /// [`set`](Self::set) to override a single value.
    pub fn merge(mut self, config: MissiveConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Overrides one dotted key, e.g. `"pipeline.throw_on_fail"`, over every
    /// other source.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Assembles, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<MissiveConfig> {
        let profile = self.profile.clone();
        let config: MissiveConfig = self.figment()?.extract()?;
        validate_config(&config)?;

        debug!(
            %profile,
            level = %config.logging.level,
            locator = ?config.pipeline.locator.strategy,
            throw_on_fail = config.pipeline.throw_on_fail,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(MissiveConfig::default()));

        for path in self.config_files()? {
            info!(path = %path.display(), "Loading configuration file");
            figment = layer_file(figment, &path)?;
        }

        if self.env {
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["profile"])
                    .split("__"),
            );
        }

        Ok(figment.merge(self.overrides))
    }

    /// Files to layer, profile file first.
    fn config_files(&self) -> ConfigResult<Vec<PathBuf>> {
        if let Some(main) = &self.file {
            if !main.is_file() {
                return Err(ConfigError::FileNotFound(main.clone()));
            }
            let mut files: Vec<PathBuf> = profile_sibling(main, &self.profile)
                .filter(|p| p.is_file())
                .into_iter()
                .collect();
            files.push(main.clone());
            return Ok(files);
        }

        for dir in self.search_dirs() {
            let profile_files = EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{FILE_STEM}.{}.{ext}", self.profile)));
            let main_files = EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{FILE_STEM}.{ext}")));
            let files: Vec<PathBuf> = profile_files
                .chain(main_files)
                .filter(|p| p.is_file())
                .collect();
            if !files.is_empty() {
                return Ok(files);
            }
        }

        debug!(profile = %self.profile, "No configuration file found");
        Ok(Vec::new())
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(FILE_STEM)))
            .collect()
    }
}

/// `dir/app.toml` → `dir/app.{profile}.toml`.
fn profile_sibling(main: &Path, profile: &Profile) -> Option<PathBuf> {
    let stem = main.file_stem()?.to_str()?;
    let ext = main.extension()?.to_str()?;
    Some(main.with_file_name(format!("{stem}.{profile}.{ext}")))
}

fn layer_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    match path.extension().and_then(|ext| ext.to_str()) {
        #[cfg(feature = "toml-config")]
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        Some("yaml" | "yml") => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::ParseError(format!(
            "{} is not in an enabled configuration format",
            path.display()
        ))),
    }
}

/// Loads configuration from the default directories and the environment.
pub fn load_config() -> ConfigResult<MissiveConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path` with environment overrides.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<MissiveConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LocatorKind, LogLevel, PipelineConfig};
    use figment::Jail;

    fn jailed(jail: &Jail) -> ConfigLoader {
        ConfigLoader::new().search_path(jail.directory())
    }

    #[test]
    fn test_defaults_without_sources() {
        Jail::expect_with(|jail| {
            let config = jailed(jail).without_env().load().unwrap();

            assert_eq!(config.logging.level, LogLevel::Info);
            assert!(config.pipeline.throw_on_fail);
            assert_eq!(config.pipeline.locator.strategy, LocatorKind::Marker);
            Ok(())
        });
    }

    #[test]
    fn test_profile_names() {
        Jail::expect_with(|jail| {
            jail.set_env("MISSIVE_PROFILE", "Prod");
            assert_eq!(Profile::from_env().as_str(), "production");

            jail.set_env("MISSIVE_PROFILE", "staging");
            assert_eq!(Profile::from_env().as_str(), "staging");

            assert_eq!(Profile::new("dev"), Profile::default());
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.staging.toml",
                r#"
                    [pipeline.locator]
                    strategy = "naming-convention"
                    suffix = "Processor"
                "#,
            )?;

            let config = jailed(jail).profile("staging").without_env().load().unwrap();
            assert_eq!(config.pipeline.locator.strategy, LocatorKind::NamingConvention);
            assert_eq!(config.pipeline.locator.suffix, "Processor");

            // Other profiles ignore it.
            let config = jailed(jail).profile("production").without_env().load().unwrap();
            assert_eq!(config.pipeline.locator.strategy, LocatorKind::Marker);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_main_file_overrides_profile_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.staging.toml",
                r#"
                    [logging]
                    level = "debug"

                    [pipeline]
                    record_messages = true
                "#,
            )?;
            jail.create_file(
                "missive.toml",
                r#"
                    [logging]
                    level = "warn"
                "#,
            )?;

            let config = jailed(jail).profile("staging").without_env().load().unwrap();
            assert_eq!(config.logging.level, LogLevel::Warn);
            assert!(config.pipeline.record_messages);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_env_overrides_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.toml",
                r#"
                    [logging]
                    level = "warn"

                    [pipeline]
                    throw_on_fail = false
                "#,
            )?;
            jail.set_env("MISSIVE_LOGGING__LEVEL", "error");
            jail.set_env("MISSIVE_PIPELINE__LOCATOR__STRATEGY", "naming-convention");

            let config = jailed(jail).load().unwrap();
            assert_eq!(config.logging.level, LogLevel::Error);
            assert!(!config.pipeline.throw_on_fail);
            assert_eq!(config.pipeline.locator.strategy, LocatorKind::NamingConvention);

            let config = jailed(jail).without_env().load().unwrap();
            assert_eq!(config.logging.level, LogLevel::Warn);
            Ok(())
        });
    }

    #[test]
    fn test_merge_overrides_env() {
        Jail::expect_with(|jail| {
            jail.set_env("MISSIVE_PIPELINE__INJECT_PROPERTIES", "false");

            let config = jailed(jail)
                .with_env()
                .merge(MissiveConfig {
                    pipeline: PipelineConfig {
                        inject_properties: true,
                        ..Default::default()
                    },
                    ..Default::default()
                })
                .load()
                .unwrap();
            assert!(config.pipeline.inject_properties);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_set_overrides_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.toml",
                r#"
                    [logging]
                    level = "warn"

                    [pipeline]
                    throw_on_fail = false
                    tracing = false
                "#,
            )?;
            jail.set_env("MISSIVE_LOGGING__LEVEL", "error");

            let config = jailed(jail)
                .set("pipeline.throw_on_fail", true)
                .set("logging.level", "trace")
                .load()
                .unwrap();
            assert!(config.pipeline.throw_on_fail);
            assert_eq!(config.logging.level, LogLevel::Trace);
            // Untouched keys keep the file value.
            assert!(!config.pipeline.tracing);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_explicit_file_with_profile_sibling() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "app.production.toml",
                r#"
                    [pipeline]
                    validation = false
                    record_messages = true
                "#,
            )?;
            jail.create_file(
                "app.toml",
                r#"
                    [pipeline]
                    record_messages = false
                "#,
            )?;
            // Ignored when a file is given.
            jail.create_file("missive.toml", "[pipeline]\ntracing = false\n")?;

            let config = ConfigLoader::new()
                .profile("prod")
                .file("app.toml")
                .without_env()
                .load()
                .unwrap();
            assert!(!config.pipeline.validation);
            assert!(!config.pipeline.record_messages);
            assert!(config.pipeline.tracing);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new()
            .file("does/not/exist/missive.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.toml",
                r#"
                    [pipeline.locator]
                    strategy = "naming-convention"
                    suffix = ""
                "#,
            )?;

            let result = jailed(jail).without_env().load();
            assert!(matches!(result, Err(ConfigError::MissingField { .. })));
            Ok(())
        });
    }
}
