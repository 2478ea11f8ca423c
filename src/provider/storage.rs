//! Shared provider registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::errors::{ProviderError, ProviderResult};
use super::Provider;

#[derive(Debug, Clone)]
struct RegisteredProvider {
    provider: Arc<dyn Provider>,
    generation: u64,
}

/// Outcome of [`ProviderStorage::register`]
#[derive(Debug)]
pub struct Registration {
    /// Monotonic token identifying this registration
    pub generation: u64,
    /// The provider previously registered under the same name; the caller closes it
    pub replaced: Option<Arc<dyn Provider>>,
}

/// Thread-safe name to provider registry.
///
/// Registration is last-writer-wins. Callers holding an `Arc` from [`get`]
/// keep using the superseded provider until their call completes.
///
/// [`get`]: ProviderStorage::get
#[derive(Debug, Default)]
pub struct ProviderStorage {
    providers: RwLock<HashMap<String, RegisteredProvider>>,
    next_generation: AtomicU64,
}

impl ProviderStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn Provider>) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let name = provider.name().to_string();
        let replaced = self
            .providers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                name.clone(),
                RegisteredProvider {
                    provider,
                    generation,
                },
            )
            .map(|previous| previous.provider);

        info!(
            provider = %name,
            generation,
            replaced = replaced.is_some(),
            "Registered provider"
        );
        Registration {
            generation,
            replaced,
        }
    }

    pub fn get(&self, name: &str) -> ProviderResult<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .map(|entry| entry.provider.clone())
            .ok_or_else(|| ProviderError::not_found(name))
    }

    /// Generation of the current registration for `name`
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.providers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .map(|entry| entry.generation)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and drop every registered provider
    pub fn close_all(&self) {
        let drained: Vec<RegisteredProvider> = self
            .providers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            debug!(provider = %entry.provider.name(), "Closing provider");
            entry.provider.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::provider::{CallOutcome, MethodSpec};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug)]
    struct StaticProvider {
        name: String,
        closed: AtomicBool,
    }

    impl StaticProvider {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn method(&self, name: &str) -> ProviderResult<&MethodSpec> {
            Err(ProviderError::method_not_found(&self.name, name))
        }

        async fn execute_method(
            &self,
            _ctx: &RequestContext,
            _method: &str,
            data: &Value,
        ) -> ProviderResult<CallOutcome> {
            Ok(CallOutcome::Value(data.clone()))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_get_unknown_provider_is_not_found() {
        let storage = ProviderStorage::new();
        let err = storage.get("reaction").unwrap_err();
        assert_eq!(err.to_string(), "provider reaction not found");
    }

    #[test]
    fn test_register_replaces_and_returns_previous() {
        let storage = ProviderStorage::new();
        let first = StaticProvider::new("reaction");
        let second = StaticProvider::new("reaction");

        let a = storage.register(first.clone());
        assert!(a.replaced.is_none());
        let b = storage.register(second.clone());
        assert!(b.generation > a.generation);
        assert_eq!(storage.generation("reaction"), Some(b.generation));

        let replaced = b.replaced.expect("previous provider");
        replaced.close();
        assert!(first.closed.load(Ordering::SeqCst));
        assert!(!second.closed.load(Ordering::SeqCst));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_close_all_drains_registry() {
        let storage = ProviderStorage::new();
        let a = StaticProvider::new("a");
        let b = StaticProvider::new("b");
        storage.register(a.clone());
        storage.register(b.clone());
        assert_eq!(storage.names(), vec!["a".to_string(), "b".to_string()]);

        storage.close_all();
        assert!(storage.is_empty());
        assert!(a.closed.load(Ordering::SeqCst));
        assert!(b.closed.load(Ordering::SeqCst));
    }
}
