//! Constants and default values for funnel

use std::path::PathBuf;

/// Application name, used for config directories
pub const APP_NAME: &str = "funnel";

/// Config file stem searched for in every config directory
pub const CONFIG_FILE_STEM: &str = "config";

/// Config file extensions to search for (in priority order)
pub const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Name of the target that writes to local files
pub const FILE_TARGET: &str = "file";

/// Suffix appended to compressed artifacts
pub const GZIP_SUFFIX: &str = ".gz";

/// chrono format for timestamp-renamed artifacts (`HH_MM_SS.fff-YYYY_MM_DD.log`)
pub const TIMESTAMP_FILE_FORMAT: &str = "%H_%M_%S%.3f-%Y_%m_%d.log";

/// Default logging directory
pub const DEFAULT_DIRECTORY: &str = "log";

/// Default active file name
pub const DEFAULT_ACTIVE_FILE_NAME: &str = "out.log";

/// Default line threshold for rotation
pub const DEFAULT_MAX_LINES: usize = 100;

/// Default byte threshold for rotation
pub const DEFAULT_MAX_BYTES: u64 = 1_000_000;

/// Default flush interval in seconds
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Default retention age
pub const DEFAULT_MAX_AGE: &str = "30d";

/// Default number of rotated files to keep
pub const DEFAULT_MAX_COUNT: usize = 100;

/// Default debounce time for config watching in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Directories searched for a config file, in priority order
pub fn config_dirs() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc").join(APP_NAME)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(format!(".{}", APP_NAME)));
    }
    paths.push(PathBuf::from("."));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dirs() {
        let dirs = config_dirs();
        assert_eq!(dirs.first(), Some(&PathBuf::from("/etc/funnel")));
        assert_eq!(dirs.last(), Some(&PathBuf::from(".")));
    }
}
