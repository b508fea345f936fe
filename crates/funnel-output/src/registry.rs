//! Name -> constructor mapping for sinks

use funnel_core::{Config, Error, Result, FILE_TARGET};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::stdout::StreamOutput;
use crate::OutputWriter;

/// Constructor for a sink, given the full configuration
pub type OutputFactory = Arc<dyn Fn(&Config) -> Result<Box<dyn OutputWriter>> + Send + Sync>;

static GLOBAL: Lazy<Arc<OutputRegistry>> = Lazy::new(|| Arc::new(OutputRegistry::with_builtins()));

/// Process-wide registry with the builtin sinks registered
pub fn global() -> Arc<OutputRegistry> {
    Arc::clone(&GLOBAL)
}

/// Write-once-per-name registry of sink constructors.
///
/// All registrations must happen before the first [`resolve`](Self::resolve);
/// resolving seals the registry.
#[derive(Default)]
pub struct OutputRegistry {
    factories: RwLock<HashMap<String, OutputFactory>>,
    sealed: AtomicBool,
}

impl OutputRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the sinks shipped with funnel
    pub fn with_builtins() -> Self {
        let stdout: OutputFactory = Arc::new(stdout_output);

        let registry = Self::new();
        registry.factories.write().insert("stdout".to_string(), stdout);
        registry
    }

    /// Register a sink constructor under `name`
    pub fn register<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&Config) -> Result<Box<dyn OutputWriter>> + Send + Sync + 'static,
    {
        if self.is_sealed() {
            return Err(Error::RegistrySealed(name.to_string()));
        }
        if name == FILE_TARGET {
            return Err(Error::OutputAlreadyRegistered(name.to_string()));
        }

        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            return Err(Error::OutputAlreadyRegistered(name.to_string()));
        }
        factories.insert(name.to_string(), Arc::new(factory));
        debug!("Registered output: {}", name);
        Ok(())
    }

    /// Refuse any further registration
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered sink names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the sink for `config.target`.
    ///
    /// Returns `Ok(None)` for the file target, which the consumer manages itself.
    pub fn resolve(&self, config: &Config) -> Result<Option<Box<dyn OutputWriter>>> {
        self.seal();

        if config.target.is_file() {
            return Ok(None);
        }

        let name = config.target.name();
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnregisteredOutput(name.to_string()))?;

        debug!("Resolving output: {}", name);
        factory(config).map(Some)
    }
}

fn stdout_output(_: &Config) -> Result<Box<dyn OutputWriter>> {
    Ok(Box::new(StreamOutput::stdout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockOutput;
    use funnel_core::Target;
    use std::io::Write;

    fn mock_output(_: &Config) -> Result<Box<dyn OutputWriter>> {
        Ok(Box::new(MockOutput::new()))
    }

    fn config_for(target: &str) -> Config {
        Config {
            target: Target::from_name(target),
            ..Config::default()
        }
    }

    #[test]
    fn test_file_output_resolves_to_none() {
        let registry = OutputRegistry::new();
        let output = registry.resolve(&config_for("file")).unwrap();
        assert!(output.is_none());
    }

    #[test]
    fn test_unregistered_output() {
        let registry = OutputRegistry::new();
        let result = registry.resolve(&config_for("somethingnotthere"));
        match result {
            Err(Error::UnregisteredOutput(name)) => assert_eq!(name, "somethingnotthere"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected an unregistered output error"),
        }
    }

    #[test]
    fn test_registered_output() {
        let mock = MockOutput::new();
        let handle = mock.clone();

        let registry = OutputRegistry::new();
        registry
            .register("test", move |_: &Config| -> Result<Box<dyn OutputWriter>> {
                Ok(Box::new(mock.clone()))
            })
            .unwrap();
        assert!(registry.is_registered("test"));

        let mut output = registry.resolve(&config_for("test")).unwrap().unwrap();
        output.write_all(b"hello\n").unwrap();
        output.close().unwrap();

        assert_eq!(handle.contents(), b"hello\n");
        assert!(handle.is_closed());
    }

    #[test]
    fn test_factory_receives_config() {
        let registry = OutputRegistry::new();
        registry
            .register("picky", |config: &Config| -> Result<Box<dyn OutputWriter>> {
                if config.target_options.contains_key("host") {
                    Ok(Box::new(MockOutput::new()))
                } else {
                    Err(Error::config("target.host is required"))
                }
            })
            .unwrap();

        let mut config = config_for("picky");
        assert!(matches!(registry.resolve(&config), Err(Error::ConfigError(_))));

        config.target_options.insert("host".to_string(), "localhost".to_string());
        assert!(registry.resolve(&config).unwrap().is_some());
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = OutputRegistry::new();
        registry.register("dup", mock_output).unwrap();
        assert!(matches!(
            registry.register("dup", mock_output),
            Err(Error::OutputAlreadyRegistered(_))
        ));
        assert!(matches!(
            registry.register("file", mock_output),
            Err(Error::OutputAlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_no_registration_after_resolve() {
        let registry = OutputRegistry::new();
        registry.resolve(&config_for("file")).unwrap();
        assert!(registry.is_sealed());

        let result = registry.register("late", mock_output);
        assert!(matches!(result, Err(Error::RegistrySealed(_))));
        assert!(!registry.is_registered("late"));
    }

    #[test]
    fn test_builtins() {
        let registry = OutputRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["stdout".to_string()]);
        assert!(global().is_registered("stdout"));
    }
}
