//! # Template Repository
//!
//! Template sources sit behind the [`Storage`] trait. A
//! [`TemplateRepository`] owns a [`Cache`] of parsed instructions keyed by
//! template id and refreshes it from an ordered list of storages: the first
//! backend that succeeds wins, later ones are fallbacks.

mod errors;
mod local;

pub use errors::{StorageError, StorageResult};
pub use local::LocalStorage;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::{Cache, CacheOptions, CacheResult, RefreshSource, SetGetter};
use crate::template::Instruction;

/// Parsed instructions of one template source
pub type Templates = Arc<[Instruction]>;

/// A source of template documents
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Backend name for logs and metrics
    fn name(&self) -> &str;

    /// Load every template whose source changed since it was last stored
    async fn full_refresh(&self, store: &dyn SetGetter<String, Templates>) -> StorageResult<()>;

    /// Reload a single template
    async fn incremental_refresh(
        &self,
        store: &dyn SetGetter<String, Templates>,
        key: &String,
    ) -> StorageResult<()>;
}

/// Storages tried in order until one succeeds
#[derive(Debug)]
struct StorageChain {
    backends: Vec<Arc<dyn Storage>>,
}

impl StorageChain {
    async fn refresh(
        &self,
        store: &dyn SetGetter<String, Templates>,
        key: Option<&String>,
    ) -> StorageResult<()> {
        let mut errors = Vec::new();
        for backend in &self.backends {
            let result = match key {
                Some(key) => backend.incremental_refresh(store, key).await,
                None => backend.full_refresh(store).await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        component = "template_repository",
                        backend = %backend.name(),
                        key = ?key,
                        error = %e,
                        "Storage refresh failed"
                    );
                    errors.push(e);
                }
            }
        }

        if errors.len() == 1 {
            return StorageError::collect(errors);
        }
        Err(StorageError::AllBackendsFailed(errors))
    }
}

#[async_trait]
impl RefreshSource<String, Templates> for StorageChain {
    async fn full_refresh(&self, store: &dyn SetGetter<String, Templates>) -> anyhow::Result<()> {
        Ok(self.refresh(store, None).await?)
    }

    async fn incremental_refresh(
        &self,
        store: &dyn SetGetter<String, Templates>,
        key: &String,
    ) -> anyhow::Result<()> {
        Ok(self.refresh(store, Some(key)).await?)
    }
}

/// Cached access to parsed templates
#[derive(Debug)]
pub struct TemplateRepository {
    cache: Cache<String, Templates>,
}

impl TemplateRepository {
    /// `backends` are tried in order on every refresh
    pub fn new(options: CacheOptions, backends: Vec<Arc<dyn Storage>>) -> StorageResult<Self> {
        if backends.is_empty() {
            return Err(StorageError::NoBackends);
        }
        let source = Arc::new(StorageChain { backends });
        Ok(Self {
            cache: Cache::new(options, source)?,
        })
    }

    /// Load all templates and start periodic refresh
    pub async fn start(&self) -> CacheResult<()> {
        self.cache.start().await
    }

    pub fn get_template(&self, id: &str) -> Option<Templates> {
        self.cache.get(&id.to_string())
    }

    /// Reload one template; failures are logged by the cache
    pub async fn update_template(&self, id: &str) {
        self.cache.incremental_update(&id.to_string()).await;
    }

    pub async fn close(&self, timeout: Duration) -> CacheResult<()> {
        self.cache.close(timeout).await
    }

    pub fn cache(&self) -> &Cache<String, Templates> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BackgroundStore;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FixedStorage {
        name: &'static str,
        fail: bool,
        calls: AtomicU32,
    }

    impl FixedStorage {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicU32::new(0),
            })
        }

        fn outcome(&self, store: &dyn SetGetter<String, Templates>, key: &str) -> StorageResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StorageError::io(
                    "read template dir",
                    self.name,
                    std::io::ErrorKind::NotFound.into(),
                ));
            }
            store.set(key.to_string(), Arc::from(Vec::new()), Utc::now());
            Ok(())
        }
    }

    #[async_trait]
    impl Storage for FixedStorage {
        fn name(&self) -> &str {
            self.name
        }

        async fn full_refresh(&self, store: &dyn SetGetter<String, Templates>) -> StorageResult<()> {
            self.outcome(store, self.name)
        }

        async fn incremental_refresh(
            &self,
            store: &dyn SetGetter<String, Templates>,
            key: &String,
        ) -> StorageResult<()> {
            self.outcome(store, key)
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_next_backend() {
        let primary = FixedStorage::new("primary", true);
        let fallback = FixedStorage::new("fallback", false);
        let chain = StorageChain {
            backends: vec![primary.clone(), fallback.clone()],
        };
        let store = BackgroundStore::new(Duration::from_secs(60));

        chain.refresh(&store, None).await.unwrap();
        assert!(store.get(&"fallback".to_string()).is_some());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = FixedStorage::new("primary", false);
        let fallback = FixedStorage::new("fallback", false);
        let chain = StorageChain {
            backends: vec![primary.clone(), fallback.clone()],
        };
        let store = BackgroundStore::new(Duration::from_secs(60));

        chain
            .refresh(&store, Some(&"card".to_string()))
            .await
            .unwrap();
        assert!(store.get(&"card".to_string()).is_some());
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_backends_failing_joins_errors() {
        let chain = StorageChain {
            backends: vec![
                FixedStorage::new("primary", true),
                FixedStorage::new("fallback", true),
            ],
        };
        let store = BackgroundStore::new(Duration::from_secs(60));

        let err = chain.refresh(&store, None).await.unwrap_err();
        assert!(matches!(err, StorageError::AllBackendsFailed(ref errors) if errors.len() == 2));
        assert!(err.to_string().contains("primary"));
        assert!(err.to_string().contains("fallback"));
    }

    #[test]
    fn test_repository_requires_a_backend() {
        let err = TemplateRepository::new(CacheOptions::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, StorageError::NoBackends));
    }

    #[tokio::test]
    async fn test_repository_start_and_lookup() {
        let repository = TemplateRepository::new(
            CacheOptions::new().name("templates"),
            vec![FixedStorage::new("card", false)],
        )
        .unwrap();

        repository.start().await.unwrap();
        assert!(repository.get_template("card").is_some());
        assert!(repository.get_template("missing").is_none());

        repository.update_template("other").await;
        assert!(repository.get_template("other").is_some());

        repository.close(Duration::from_secs(1)).await.unwrap();
    }
}
