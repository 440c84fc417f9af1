//! Provider registry.
//!
//! An explicit registration table built once at startup and passed into the
//! engine, the scheduler and the OAuth router by `Arc` — no ambient global
//! state. Lookup is by service name.

use crate::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup table from service name to provider adapter.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Builds a registry from a list of adapters. Later entries with the
    /// same service name replace earlier ones.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.service().to_string(), p))
            .collect();
        Self { providers }
    }

    /// The standard production set.
    pub fn with_default_providers() -> Self {
        Self::new(vec![
            Arc::new(crate::providers::oura::OuraProvider::new()),
            Arc::new(crate::providers::outline::OutlineProvider::new()),
            Arc::new(crate::providers::monzo::MonzoProvider::new()),
        ])
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(service).cloned()
    }

    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = ProviderRegistry::with_default_providers();
        assert_eq!(registry.services(), vec!["monzo", "oura", "outline"]);
        assert!(registry.get("oura").is_some());
        assert!(registry.get("spotify").is_none());
    }

    #[test]
    fn test_instance_types_are_nonempty() {
        let registry = ProviderRegistry::with_default_providers();
        for service in registry.services() {
            let provider = registry.get(service).unwrap();
            assert!(
                !provider.instance_types().is_empty(),
                "{} exposes no instance types",
                service
            );
        }
    }
}
