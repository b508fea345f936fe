//! Funnel Watch - Turns config file changes into reload values

mod debounce;
mod watcher;

pub use debounce::Debouncer;
pub use watcher::ConfigWatcher;
