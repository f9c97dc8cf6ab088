// Service registry - named factories resolved when a definition is compiled

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::adapter::Service;
use super::error::ServiceError;

/// Builds a service instance from its name and evaluated settings.
pub type ServiceFactory =
    Arc<dyn Fn(&str, &Map<String, Value>) -> Result<Arc<dyn Service>, ServiceError> + Send + Sync>;

#[derive(Clone)]
enum Registration {
    Factory(ServiceFactory),
    Instance(Arc<dyn Service>),
}

/// Maps service `ref` strings to the code that implements them.
///
/// A factory is called once per service declaration at compile time, so two
/// declarations sharing a `ref` get separate instances (and separate state).
/// An instance registration is shared by every declaration that names it.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    entries: HashMap<String, Registration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the builtin `ratelimiter` and `circuitbreaker`
    /// services.
    pub fn with_builtin_services() -> Self {
        let mut registry = Self::new();
        crate::services::register_builtins(&mut registry);
        registry
    }

    pub fn register_factory<F>(&mut self, reference: &str, factory: F)
    where
        F: Fn(&str, &Map<String, Value>) -> Result<Arc<dyn Service>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        debug!("Registering service factory: {}", reference);
        self.entries
            .insert(reference.to_string(), Registration::Factory(Arc::new(factory)));
    }

    pub fn register_instance(&mut self, reference: &str, service: Arc<dyn Service>) {
        debug!("Registering service instance: {}", reference);
        self.entries
            .insert(reference.to_string(), Registration::Instance(service));
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    /// Resolve `reference` for the service declared as `name`.
    ///
    /// `Ok(None)` means nothing is registered under `reference`.
    pub fn resolve(
        &self,
        reference: &str,
        name: &str,
        settings: &Map<String, Value>,
    ) -> Result<Option<Arc<dyn Service>>, ServiceError> {
        match self.entries.get(reference) {
            Some(Registration::Factory(factory)) => factory(name, settings).map(Some),
            Some(Registration::Instance(service)) => Ok(Some(Arc::clone(service))),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut references: Vec<&String> = self.entries.keys().collect();
        references.sort();
        f.debug_struct("ServiceRegistry")
            .field("references", &references)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::{FnService, InvocationContext};

    fn noop() -> Arc<dyn Service> {
        Arc::new(FnService::new(|_ctx: &mut InvocationContext| Ok(true)))
    }

    #[test]
    fn test_resolve_factory_and_instance() {
        let mut registry = ServiceRegistry::new();
        registry.register_factory("noop", |_name, _settings| Ok(noop()));
        registry.register_instance("shared", noop());

        let settings = Map::new();
        assert!(registry.resolve("noop", "a", &settings).unwrap().is_some());
        assert!(registry.resolve("shared", "b", &settings).unwrap().is_some());
        assert!(registry.resolve("missing", "c", &settings).unwrap().is_none());
    }

    #[test]
    fn test_factory_errors_propagate() {
        let mut registry = ServiceRegistry::new();
        registry.register_factory("picky", |name, _settings| {
            Err(ServiceError::invalid_input(name, "always rejected"))
        });

        let result = registry.resolve("picky", "svc", &Map::new());
        assert!(matches!(result, Err(ServiceError::InvalidInput { .. })));
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ServiceRegistry::with_builtin_services();
        assert!(registry.contains("ratelimiter"));
        assert!(registry.contains("circuitbreaker"));
    }
}
