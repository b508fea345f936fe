//! Configuration file parsing for funnel
//!
//! Supports multiple configuration file formats:
//! - TOML (.toml)
//! - YAML (.yaml, .yml)
//! - JSON (.json)
//!
//! Every key can also be overridden from the environment using the dotted key
//! upper-cased with dots replaced by underscores (`rotation.max_lines` ->
//! `ROTATION_MAX_LINES`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

pub const LOGGING_DIRECTORY: &str = "logging.directory";
pub const LOGGING_ACTIVE_FILE_NAME: &str = "logging.active_file_name";
pub const ROTATION_MAX_LINES: &str = "rotation.max_lines";
pub const ROTATION_MAX_FILE_SIZE_BYTES: &str = "rotation.max_file_size_bytes";
pub const FLUSHING_TIME_INTERVAL_SECS: &str = "flushing.time_interval_secs";
pub const MISC_PREPEND_VALUE: &str = "misc.prepend_value";
pub const ROLLUP_FILE_RENAME_POLICY: &str = "rollup.file_rename_policy";
pub const ROLLUP_MAX_AGE: &str = "rollup.max_age";
pub const ROLLUP_MAX_COUNT: &str = "rollup.max_count";
pub const ROLLUP_GZIP: &str = "rollup.gzip";
pub const TARGET_NAME: &str = "target.name";

static MAX_AGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)([dh])$").expect("Invalid max age regex"));

/// Naming scheme applied to a just-rotated file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenamePolicy {
    /// `HH_MM_SS.fff-YYYY_MM_DD.log`
    #[default]
    Timestamp,
    /// `<active>.1`, shifting older artifacts up by one
    Serial,
}

impl FromStr for RenamePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "timestamp" => Ok(RenamePolicy::Timestamp),
            "serial" => Ok(RenamePolicy::Serial),
            _ => Err(Error::config(format!(
                "{} can only be timestamp or serial",
                ROLLUP_FILE_RENAME_POLICY
            ))),
        }
    }
}

impl fmt::Display for RenamePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenamePolicy::Timestamp => write!(f, "timestamp"),
            RenamePolicy::Serial => write!(f, "serial"),
        }
    }
}

/// Where processed lines end up
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    /// Local files managed by the consumer itself
    #[default]
    File,
    /// A sink resolved through the output registry
    Named(String),
}

impl Target {
    pub fn from_name(name: &str) -> Self {
        if name == FILE_TARGET {
            Target::File
        } else {
            Target::Named(name.to_string())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Target::File => FILE_TARGET,
            Target::Named(name) => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Target::File)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable configuration snapshot.
///
/// A running consumer never mutates its config; a reload replaces the whole value.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub directory: PathBuf,
    pub active_file_name: String,
    pub max_lines: usize,
    pub max_bytes: u64,
    pub flush_interval_secs: u64,
    pub prepend_value: String,
    pub rename_policy: RenamePolicy,
    /// Retention age in seconds
    pub max_age_secs: i64,
    pub max_count: usize,
    pub gzip: bool,
    pub target: Target,
    /// Sink-specific settings from the `[target]` section (everything except `name`)
    pub target_options: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            active_file_name: DEFAULT_ACTIVE_FILE_NAME.to_string(),
            max_lines: DEFAULT_MAX_LINES,
            max_bytes: DEFAULT_MAX_BYTES,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            prepend_value: String::new(),
            rename_policy: RenamePolicy::default(),
            max_age_secs: parse_max_age(DEFAULT_MAX_AGE).unwrap_or(30 * 24 * 60 * 60),
            max_count: DEFAULT_MAX_COUNT,
            gzip: false,
            target: Target::File,
            target_options: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Full path of the active file
    pub fn active_path(&self) -> PathBuf {
        self.directory.join(&self.active_file_name)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Check the invariants every consumer relies on
    pub fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(Error::InvalidConfigValue(LOGGING_DIRECTORY));
        }
        if self.active_file_name.is_empty()
            || self.active_file_name.contains('/')
            || self.active_file_name.contains('\\')
        {
            return Err(Error::InvalidConfigValue(LOGGING_ACTIVE_FILE_NAME));
        }
        if self.max_lines == 0 {
            return Err(Error::InvalidConfigValue(ROTATION_MAX_LINES));
        }
        if self.max_bytes == 0 {
            return Err(Error::InvalidConfigValue(ROTATION_MAX_FILE_SIZE_BYTES));
        }
        if self.flush_interval_secs == 0 {
            return Err(Error::InvalidConfigValue(FLUSHING_TIME_INTERVAL_SECS));
        }
        if self.max_age_secs < 0 {
            return Err(Error::InvalidConfigValue(ROLLUP_MAX_AGE));
        }
        if self.max_count == 0 {
            return Err(Error::InvalidConfigValue(ROLLUP_MAX_COUNT));
        }
        if self.target.name().is_empty() {
            return Err(Error::InvalidConfigValue(TARGET_NAME));
        }
        Ok(())
    }
}

/// Convert a `<n>d` / `<n>h` retention age to seconds
pub fn parse_max_age(value: &str) -> Result<i64> {
    let invalid = || {
        Error::config(format!(
            "{} must end with either d or h and start with a number",
            ROLLUP_MAX_AGE
        ))
    };
    let caps = MAX_AGE_REGEX.captures(value.trim()).ok_or_else(invalid)?;
    let magnitude: i64 = caps[1].parse().map_err(|_| invalid())?;
    let unit_secs = if &caps[2] == "d" { 24 * 60 * 60 } else { 60 * 60 };
    magnitude.checked_mul(unit_secs).ok_or_else(invalid)
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(ConfigFormat::Toml),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    /// Detect format from file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub directory: Option<String>,
    pub active_file_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RotationSection {
    pub max_lines: Option<i64>,
    pub max_file_size_bytes: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FlushingSection {
    pub time_interval_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MiscSection {
    pub prepend_value: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RollupSection {
    pub file_rename_policy: Option<String>,
    pub max_age: Option<String>,
    pub max_count: Option<i64>,
    pub gzip: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TargetSection {
    pub name: Option<String>,
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// Configuration file structure (config.toml/yaml/json)
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub logging: LoggingSection,
    pub rotation: RotationSection,
    pub flushing: FlushingSection,
    pub misc: MiscSection,
    pub rollup: RollupSection,
    pub target: TargetSection,
}

impl ConfigFile {
    /// Load config from file, automatically detecting format from extension
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            Error::ConfigError(format!(
                "Unsupported config file extension: {}. Expected .toml, .yaml, .yml, or .json",
                path.display()
            ))
        })?;

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    /// Parse config content with specified format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => Ok(toml::from_str(content)?),
            ConfigFormat::Yaml => {
                // An empty YAML document deserializes to unit, not to a map
                if content.trim().is_empty() {
                    return Ok(Self::default());
                }
                Ok(serde_yaml::from_str(content)?)
            }
            ConfigFormat::Json => Ok(serde_json::from_str(content)?),
        }
    }

    /// Find the first config file in `dirs`, if any
    pub fn find(dirs: &[PathBuf]) -> Option<PathBuf> {
        dirs.iter()
            .flat_map(|dir| {
                CONFIG_EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(format!("{}.{}", CONFIG_FILE_STEM, ext)))
            })
            .find(|path| path.is_file())
    }

    /// Override values from environment-style lookups
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&env_key(key));

        if let Some(v) = get(LOGGING_DIRECTORY) {
            self.logging.directory = Some(v);
        }
        if let Some(v) = get(LOGGING_ACTIVE_FILE_NAME) {
            self.logging.active_file_name = Some(v);
        }
        if let Some(v) = get(ROTATION_MAX_LINES) {
            self.rotation.max_lines = Some(parse_env(ROTATION_MAX_LINES, &v)?);
        }
        if let Some(v) = get(ROTATION_MAX_FILE_SIZE_BYTES) {
            self.rotation.max_file_size_bytes = Some(parse_env(ROTATION_MAX_FILE_SIZE_BYTES, &v)?);
        }
        if let Some(v) = get(FLUSHING_TIME_INTERVAL_SECS) {
            self.flushing.time_interval_secs = Some(parse_env(FLUSHING_TIME_INTERVAL_SECS, &v)?);
        }
        if let Some(v) = get(MISC_PREPEND_VALUE) {
            self.misc.prepend_value = Some(v);
        }
        if let Some(v) = get(ROLLUP_FILE_RENAME_POLICY) {
            self.rollup.file_rename_policy = Some(v);
        }
        if let Some(v) = get(ROLLUP_MAX_AGE) {
            self.rollup.max_age = Some(v);
        }
        if let Some(v) = get(ROLLUP_MAX_COUNT) {
            self.rollup.max_count = Some(parse_env(ROLLUP_MAX_COUNT, &v)?);
        }
        if let Some(v) = get(ROLLUP_GZIP) {
            self.rollup.gzip = Some(parse_env(ROLLUP_GZIP, &v)?);
        }
        if let Some(v) = get(TARGET_NAME) {
            self.target.name = Some(v);
        }
        Ok(())
    }

    /// Merge with defaults and validate
    pub fn into_config(self) -> Result<Config> {
        let default = Config::default();

        let rename_policy = match self.rollup.file_rename_policy {
            Some(policy) => policy.parse()?,
            None => default.rename_policy,
        };
        let max_age_secs = match self.rollup.max_age {
            Some(age) => parse_max_age(&age)?,
            None => default.max_age_secs,
        };
        let target = self
            .target
            .name
            .map(|name| Target::from_name(&name))
            .unwrap_or(default.target);
        let target_options = self
            .target
            .options
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();

        let config = Config {
            directory: self
                .logging
                .directory
                .map(PathBuf::from)
                .unwrap_or(default.directory),
            active_file_name: self
                .logging
                .active_file_name
                .unwrap_or(default.active_file_name),
            max_lines: positive(ROTATION_MAX_LINES, self.rotation.max_lines, default.max_lines as i64)?
                as usize,
            max_bytes: positive(
                ROTATION_MAX_FILE_SIZE_BYTES,
                self.rotation.max_file_size_bytes,
                default.max_bytes as i64,
            )? as u64,
            flush_interval_secs: positive(
                FLUSHING_TIME_INTERVAL_SECS,
                self.flushing.time_interval_secs,
                default.flush_interval_secs as i64,
            )? as u64,
            prepend_value: self.misc.prepend_value.unwrap_or(default.prepend_value),
            rename_policy,
            max_age_secs,
            max_count: positive(ROLLUP_MAX_COUNT, self.rollup.max_count, default.max_count as i64)?
                as usize,
            gzip: self.rollup.gzip.unwrap_or(default.gzip),
            target,
            target_options,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Load the effective configuration.
///
/// An explicit `path` must exist. Without one, the standard config directories
/// are searched and defaults are used when nothing is found. Process environment
/// overrides are applied last. Returns the path that was loaded, if any.
pub fn load_config(path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => ConfigFile::find(&config_dirs()),
    };

    let mut file = match &path {
        Some(p) => ConfigFile::load(p)?,
        None => ConfigFile::default(),
    };
    file.apply_env(|key| std::env::var(key).ok())?;

    Ok((file.into_config()?, path))
}

/// Re-read a config file on change; environment overrides still win
pub fn reload_config(path: &Path) -> Result<Config> {
    let mut file = ConfigFile::load(path)?;
    file.apply_env(|key| std::env::var(key).ok())?;
    file.into_config()
}

fn env_key(key: &str) -> String {
    key.replace('.', "_").to_uppercase()
}

fn parse_env<T: FromStr>(key: &'static str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfigValue(key))
}

fn positive(key: &'static str, value: Option<i64>, default: i64) -> Result<i64> {
    match value {
        Some(v) if v <= 0 => Err(Error::InvalidConfigValue(key)),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}
