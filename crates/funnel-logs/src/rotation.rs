//! Rotation engine: rename, compress and prune rotated artifacts
//!
//! Everything here works on a [`Config`] and the filesystem only. Once a file
//! stops being the active file it is owned by these functions.

use chrono::{DateTime, Local};
use flate2::{Compression, GzBuilder};
use funnel_core::{Config, Error, RenamePolicy, Result, GZIP_SUFFIX, TIMESTAMP_FILE_FORMAT};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Rename the active file according to the configured policy.
///
/// `now` names the artifact under the timestamp policy. Returns the path of
/// the renamed artifact.
pub fn rename(config: &Config, now: DateTime<Local>) -> Result<PathBuf> {
    match config.rename_policy {
        RenamePolicy::Timestamp => rename_timestamp(config, now),
        RenamePolicy::Serial => rename_serial(config),
    }
}

/// Rename the active file to `HH_MM_SS.fff-YYYY_MM_DD.log`
pub fn rename_timestamp(config: &Config, now: DateTime<Local>) -> Result<PathBuf> {
    let target = config
        .directory
        .join(now.format(TIMESTAMP_FILE_FORMAT).to_string());

    // rename(2) silently replaces an existing target
    if target.exists() {
        return Err(Error::RenameCollision(target));
    }

    fs::rename(config.active_path(), &target)?;
    debug!("Rotated {} -> {}", config.active_file_name, target.display());
    Ok(target)
}

/// Shift every `<active>.<N>[.gz]` to `N + 1`, then rename the active file to `<active>.1`
pub fn rename_serial(config: &Config) -> Result<PathBuf> {
    let active = config.active_file_name.as_str();

    let mut artifacts: Vec<(String, u64, bool)> = Vec::new();
    for entry in fs::read_dir(&config.directory)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some((index, gzipped)) = serial_index(&name, active) {
            artifacts.push((name, index, gzipped));
        }
    }
    artifacts.sort_by(|a, b| natural_cmp(&a.0, &b.0));

    // Highest first, so no rename lands on a file that has not moved yet
    for (name, index, gzipped) in artifacts.iter().rev() {
        let mut next = format!("{}.{}", active, index + 1);
        if *gzipped {
            next.push_str(GZIP_SUFFIX);
        }
        fs::rename(config.directory.join(name), config.directory.join(&next))?;
    }

    let target = config.directory.join(format!("{}.1", active));
    fs::rename(config.active_path(), &target)?;
    debug!(
        "Rotated {} -> {} (shifted {} artifacts)",
        active,
        target.display(),
        artifacts.len()
    );
    Ok(target)
}

/// Parse `<active>.<N>` or `<active>.<N>.gz`
fn serial_index(name: &str, active: &str) -> Option<(u64, bool)> {
    let rest = name.strip_prefix(active)?.strip_prefix('.')?;
    let (digits, gzipped) = match rest.strip_suffix(GZIP_SUFFIX) {
        Some(digits) => (digits, true),
        None => (rest, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|index| (index, gzipped))
}

/// Compress `path` if the config asks for it; returns the resulting artifact path
pub fn compress(config: &Config, path: &Path) -> Result<PathBuf> {
    if config.gzip {
        gzip_file(path)
    } else {
        Ok(path.to_path_buf())
    }
}

/// Gzip `source` to `source.gz` and remove the original.
///
/// The archive header carries the original base name. On failure the original
/// is left in place and any partial archive is removed.
pub fn gzip_file(source: &Path) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut target = source.as_os_str().to_owned();
    target.push(GZIP_SUFFIX);
    let target = PathBuf::from(target);

    if let Err(e) = write_gzip(source, &target, &file_name.to_string_lossy()) {
        if target.is_file() {
            let _ = fs::remove_file(&target);
        }
        return Err(e);
    }

    fs::remove_file(source)?;
    debug!("Compressed {}", target.display());
    Ok(target)
}

fn write_gzip(source: &Path, target: &Path, name: &str) -> Result<()> {
    let mut reader = File::open(source)?;
    let writer = File::create(target)?;

    let mut encoder = GzBuilder::new()
        .filename(name)
        .write(writer, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    Ok(())
}

/// Enforce retention on the rotated artifacts in the log directory.
///
/// The active file is never considered. Artifacts older than `max_age_secs`
/// are removed; of the rest, only the `max_count` most recently modified
/// survive. Returns the number of files removed.
pub fn delete_old_files(config: &Config) -> Result<usize> {
    let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in fs::read_dir(&config.directory)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy() == config.active_file_name {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        files.push((entry.path(), metadata.modified()?));
    }

    // Newest first
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let max_age = Duration::from_secs(config.max_age_secs.max(0) as u64);
    let now = SystemTime::now();
    let mut removed = 0;

    for (rank, (path, modified)) in files.iter().enumerate().rev() {
        let age = now.duration_since(*modified).unwrap_or_default();
        if age > max_age || rank >= config.max_count {
            fs::remove_file(path)?;
            debug!("Pruned {}", path.display());
            removed += 1;
        }
    }

    Ok(removed)
}

/// String ordering that compares embedded digit runs numerically (`a9` < `a10`)
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());

    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (run_a, rest_a) = split_digits(a);
                let (run_b, rest_b) = split_digits(b);
                match cmp_digit_runs(run_a, run_b) {
                    Ordering::Equal => {
                        a = rest_a;
                        b = rest_b;
                    }
                    other => return other,
                }
            }
            (Some(x), Some(y)) => match x.cmp(y) {
                Ordering::Equal => {
                    a = &a[1..];
                    b = &b[1..];
                }
                other => return other,
            },
        }
    }
}

fn split_digits(s: &[u8]) -> (&[u8], &[u8]) {
    let len = s.iter().take_while(|c| c.is_ascii_digit()).count();
    s.split_at(len)
}

fn cmp_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let trim = |s: &[u8]| -> usize { s.iter().take_while(|&&c| c == b'0').count() };
    let (sig_a, sig_b) = (&a[trim(a)..], &b[trim(b)..]);
    sig_a
        .len()
        .cmp(&sig_b.len())
        .then_with(|| sig_a.cmp(sig_b))
        .then_with(|| a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use regex::Regex;
    use std::io::Read;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            directory: dir.path().to_path_buf(),
            active_file_name: "out.log".to_string(),
            max_lines: 40,
            max_age_secs: 24 * 60 * 60,
            max_count: 5,
            ..Config::default()
        }
    }

    /// Create `out.log.1` .. `out.log.<count>` (content = index) plus the active file
    fn populate_files(config: &Config, count: usize, suffix: &str) {
        for i in 1..=count {
            let name = format!("{}.{}{}", config.active_file_name, i, suffix);
            fs::write(config.directory.join(name), i.to_string()).unwrap();
        }
        fs::write(config.active_path(), "active").unwrap();
    }

    fn set_age(path: &Path, age_secs: u64) {
        let modified = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    fn sorted_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    #[test]
    fn test_natural_order() {
        let mut names = vec!["out.log.10", "out.log.9", "out.log.1", "out.log.100", "out.log.2.gz"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["out.log.1", "out.log.2.gz", "out.log.9", "out.log.10", "out.log.100"]);

        assert_eq!(natural_cmp("a007", "a7"), Ordering::Greater);
        assert_eq!(natural_cmp("abc", "abd"), Ordering::Less);
        assert_eq!(natural_cmp("x2y", "x2y"), Ordering::Equal);
    }

    #[test]
    fn test_serial_index() {
        assert_eq!(serial_index("out.log.12", "out.log"), Some((12, false)));
        assert_eq!(serial_index("out.log.3.gz", "out.log"), Some((3, true)));
        assert_eq!(serial_index("out.log", "out.log"), None);
        assert_eq!(serial_index("out.log.old", "out.log"), None);
        assert_eq!(serial_index("out.logs.1", "out.log"), None);
        assert_eq!(serial_index("out.log.gz", "out.log"), None);
    }

    #[test]
    fn test_rename_file_timestamp() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        fs::write(config.active_path(), "data").unwrap();

        let renamed = rename(&config, Local::now()).unwrap();
        assert!(!config.active_path().exists());

        let names = sorted_names(dir.path());
        assert_eq!(names.len(), 1);
        let re = Regex::new(r"^\d{2}_\d{2}_\d{2}\.\d{3}-\d{4}_\d{2}_\d{2}\.log$").unwrap();
        assert!(re.is_match(&names[0]), "unexpected name {}", names[0]);
        assert_eq!(renamed, dir.path().join(&names[0]));
        assert_eq!(fs::read_to_string(renamed).unwrap(), "data");
    }

    #[test]
    fn test_rename_timestamp_collision() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let now = Local.with_ymd_and_hms(2017, 3, 4, 5, 6, 7).unwrap();

        fs::write(config.active_path(), "first").unwrap();
        let first = rename_timestamp(&config, now).unwrap();
        assert_eq!(first.file_name().unwrap(), "05_06_07.000-2017_03_04.log");

        fs::write(config.active_path(), "second").unwrap();
        let result = rename_timestamp(&config, now);
        assert!(matches!(result, Err(Error::RenameCollision(_))));
        assert_eq!(fs::read_to_string(first).unwrap(), "first");
        assert!(config.active_path().exists());
    }

    #[test]
    fn test_rename_file_serial() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            rename_policy: RenamePolicy::Serial,
            ..test_config(&dir)
        };
        populate_files(&config, 13, "");

        let renamed = rename(&config, Local::now()).unwrap();
        assert_eq!(renamed, dir.path().join("out.log.1"));

        let names = sorted_names(dir.path());
        assert_eq!(names.len(), 14);
        for (i, name) in names.iter().enumerate() {
            assert_eq!(name, &format!("out.log.{}", i + 1));
        }

        // Every artifact moved up by exactly one
        assert_eq!(fs::read_to_string(dir.path().join("out.log.1")).unwrap(), "active");
        for i in 1..=13 {
            let content = fs::read_to_string(dir.path().join(format!("out.log.{}", i + 1))).unwrap();
            assert_eq!(content, i.to_string());
        }
    }

    #[test]
    fn test_rename_file_serial_gzip() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            rename_policy: RenamePolicy::Serial,
            gzip: true,
            ..test_config(&dir)
        };
        populate_files(&config, 12, ".gz");

        let renamed = rename_serial(&config).unwrap();
        assert_eq!(renamed, dir.path().join("out.log.1"));

        let names = sorted_names(dir.path());
        assert_eq!(names.len(), 13);
        assert_eq!(names[0], "out.log.1");
        for (i, name) in names.iter().enumerate().skip(1) {
            assert_eq!(name, &format!("out.log.{}.gz", i + 1));
        }
    }

    #[test]
    fn test_gzip_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("out.log.1");
        let content = "gzip test content\nमल्टी-बाइट\n".repeat(100);
        fs::write(&source, &content).unwrap();

        let target = gzip_file(&source).unwrap();
        assert_eq!(target, dir.path().join("out.log.1.gz"));
        assert!(!source.exists());

        let mut decoder = GzDecoder::new(File::open(&target).unwrap());
        let mut decoded = String::new();
        decoder.read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, content);

        let header = decoder.header().unwrap();
        assert_eq!(header.filename(), Some("out.log.1".as_bytes()));
    }

    #[test]
    fn test_gzip_failure_keeps_original() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("out.log.1");
        fs::write(&source, "keep me").unwrap();
        // A directory where the archive should go makes creation fail
        fs::create_dir(dir.path().join("out.log.1.gz")).unwrap();

        assert!(gzip_file(&source).is_err());
        assert_eq!(fs::read_to_string(&source).unwrap(), "keep me");
    }

    #[test]
    fn test_compress_respects_config() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let path = dir.path().join("plain.log");
        fs::write(&path, "x").unwrap();

        assert_eq!(compress(&config, &path).unwrap(), path);
        assert!(path.exists());

        let config = Config { gzip: true, ..config };
        assert_eq!(compress(&config, &path).unwrap(), dir.path().join("plain.log.gz"));
        assert!(!path.exists());
    }

    #[test]
    fn test_max_files() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        populate_files(&config, 13, "");
        // out.log.1 is the newest, out.log.13 the oldest
        for i in 1..=13 {
            set_age(&dir.path().join(format!("out.log.{}", i)), i * 10);
        }
        set_age(&config.active_path(), 10_000);

        let removed = delete_old_files(&config).unwrap();
        assert_eq!(removed, 8);

        let names = sorted_names(dir.path());
        assert_eq!(
            names,
            vec!["out.log", "out.log.1", "out.log.2", "out.log.3", "out.log.4", "out.log.5"]
        );
    }

    #[test]
    fn test_old_files() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            max_count: 100,
            max_age_secs: 3600,
            ..test_config(&dir)
        };
        fs::write(config.active_path(), "").unwrap();
        for (name, age) in [("fresh.log", 0), ("almost.log", 3599), ("expired.log", 3601)] {
            let path = dir.path().join(name);
            fs::write(&path, name).unwrap();
            set_age(&path, age);
        }
        set_age(&config.active_path(), 10_000);

        assert_eq!(delete_old_files(&config).unwrap(), 1);
        assert_eq!(sorted_names(dir.path()), vec!["almost.log", "fresh.log", "out.log"]);
    }

    #[test]
    fn test_age_and_count_combined() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            max_count: 2,
            max_age_secs: 100,
            ..test_config(&dir)
        };
        for (name, age) in [("a.log", 10), ("b.log", 20), ("c.log", 30), ("d.log", 500)] {
            let path = dir.path().join(name);
            fs::write(&path, "").unwrap();
            set_age(&path, age);
        }

        assert_eq!(delete_old_files(&config).unwrap(), 2);
        assert_eq!(sorted_names(dir.path()), vec!["a.log", "b.log"]);
    }
}
