//! Debounce logic for watch events

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Collapses bursts of events per path.
///
/// A path becomes ready once no event has been recorded for it for
/// `threshold`, so a save that touches the file several times yields one
/// reload of the final contents.
pub struct Debouncer {
    threshold: Duration,
    /// Last event time per path still waiting to settle
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pending: HashMap::new(),
        }
    }

    /// Note an event for `path`
    pub fn record(&mut self, path: &Path) {
        self.record_at(path, Instant::now());
    }

    fn record_at(&mut self, path: &Path, now: Instant) {
        self.pending.insert(path.to_path_buf(), now);
    }

    /// Take every path that has been quiet for at least the threshold
    pub fn ready(&mut self) -> Vec<PathBuf> {
        self.ready_at(Instant::now())
    }

    fn ready_at(&mut self, now: Instant) -> Vec<PathBuf> {
        let threshold = self.threshold;
        let settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= threshold)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &settled {
            self.pending.remove(path);
        }
        settled
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_millis(100);

    #[test]
    fn test_waits_for_quiet_period() {
        let mut debouncer = Debouncer::new(THRESHOLD);
        let path = Path::new("/etc/funnel/config.toml");
        let start = Instant::now();

        debouncer.record_at(path, start);
        assert!(debouncer.ready_at(start + Duration::from_millis(50)).is_empty());
        assert!(debouncer.is_pending());

        assert_eq!(debouncer.ready_at(start + THRESHOLD), vec![path.to_path_buf()]);
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_burst_emits_once() {
        let mut debouncer = Debouncer::new(THRESHOLD);
        let path = Path::new("config.toml");
        let start = Instant::now();

        for ms in [0, 40, 80, 120] {
            debouncer.record_at(path, start + Duration::from_millis(ms));
        }
        // Quiet period counts from the last event
        assert!(debouncer.ready_at(start + Duration::from_millis(200)).is_empty());
        assert_eq!(debouncer.ready_at(start + Duration::from_millis(220)).len(), 1);
        assert!(debouncer.ready_at(start + Duration::from_millis(500)).is_empty());
    }

    #[test]
    fn test_paths_settle_independently() {
        let mut debouncer = Debouncer::new(THRESHOLD);
        let start = Instant::now();

        debouncer.record_at(Path::new("a.toml"), start);
        debouncer.record_at(Path::new("b.toml"), start + Duration::from_millis(80));

        assert_eq!(
            debouncer.ready_at(start + THRESHOLD),
            vec![PathBuf::from("a.toml")]
        );
        assert!(debouncer.is_pending());
    }

    #[test]
    fn test_reset() {
        let mut debouncer = Debouncer::new(THRESHOLD);
        debouncer.record(Path::new("config.toml"));
        debouncer.reset();

        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.threshold(), THRESHOLD);
    }
}
