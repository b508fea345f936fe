//! Error types for funnel

use std::path::PathBuf;

/// Funnel error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid config value entered for - {0}")]
    InvalidConfigValue(&'static str),

    #[error("Output {0} was not registered from any module")]
    UnregisteredOutput(String),

    #[error("Output {0} is already registered")]
    OutputAlreadyRegistered(String),

    #[error("Cannot register output {0}: registry is sealed")]
    RegistrySealed(String),

    #[error("Invalid prepend template: {0}")]
    InvalidTemplate(String),

    #[error("Rotated file already exists: {0}")]
    RenameCollision(PathBuf),

    #[error("No active file is open")]
    NoActiveFile,

    #[error("Failed to read input: {0}")]
    Input(#[source] std::io::Error),

    #[error("Writer task is gone")]
    WriterGone,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type alias for funnel
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::ConfigError(msg.into())
    }

    pub fn template<S: Into<String>>(msg: S) -> Self {
        Error::InvalidTemplate(msg.into())
    }

    /// Whether this error must stop ingestion.
    ///
    /// Failures reported by the writer task (write, flush, rotation, reload)
    /// are never fatal; the pipeline keeps consuming input after logging them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Input(_) | Error::WriterGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnregisteredOutput("kafka".to_string());
        assert_eq!(err.to_string(), "Output kafka was not registered from any module");

        let err = Error::InvalidConfigValue("rotation.max_lines");
        assert_eq!(err.to_string(), "Invalid config value entered for - rotation.max_lines");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classes() {
        let read_err = Error::Input(std::io::Error::new(std::io::ErrorKind::Other, "broken"));
        assert!(read_err.is_fatal());
        assert!(Error::WriterGone.is_fatal());
        assert!(!Error::NoActiveFile.is_fatal());
        assert!(!Error::RenameCollision(PathBuf::from("log/a.log")).is_fatal());
    }
}
