//! The cache component: store + refresh source + background loop.

use async_trait::async_trait;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::background::BackgroundStore;
use super::errors::{CacheError, CacheResult};
use super::lru::LruStore;
use super::options::{CacheOptions, EvictionPolicy};
use super::store::SetGetter;
use crate::metrics::cache::CacheMetrics;

/// Loads entries into a cache store
///
/// Implementations decide freshness themselves (see
/// [`SetGetter::last_updated`]); the cache only serialises the calls.
#[async_trait]
pub trait RefreshSource<K, V>: Send + Sync + fmt::Debug {
    /// Reload every entry
    async fn full_refresh(&self, store: &dyn SetGetter<K, V>) -> anyhow::Result<()>;

    /// Reload a single entry
    async fn incremental_refresh(&self, store: &dyn SetGetter<K, V>, key: &K)
        -> anyhow::Result<()>;
}

struct CacheInner<K, V> {
    options: CacheOptions,
    store: Box<dyn SetGetter<K, V>>,
    source: Arc<dyn RefreshSource<K, V>>,
    update_lock: tokio::sync::Mutex<()>,
    metrics: CacheMetrics,
}

/// Generic refreshable cache
///
/// See the [module docs](super) for the refresh and eviction model.
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
    /// Replaced on every `start` so a closed cache can be started again
    shutdown: Mutex<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("options", &self.inner.options)
            .field("source", &self.inner.source)
            .field("running", &self.is_running())
            .finish()
    }
}

impl<K, V> Cache<K, V> {
    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build a stopped cache; the TTL must be non-zero since it drives the refresh loop
    pub fn new(options: CacheOptions, source: Arc<dyn RefreshSource<K, V>>) -> CacheResult<Self> {
        if options.ttl.is_zero() {
            return Err(CacheError::InvalidOptions {
                cache: options.name,
                message: "ttl must be greater than zero".to_string(),
            });
        }

        let store: Box<dyn SetGetter<K, V>> = match options.policy {
            EvictionPolicy::Background => Box::new(BackgroundStore::new(options.ttl)),
            EvictionPolicy::Lru => Box::new(LruStore::new(options.capacity, options.ttl)),
        };
        let metrics = CacheMetrics::new(&options.name);

        Ok(Self {
            inner: Arc::new(CacheInner {
                options,
                store,
                source,
                update_lock: tokio::sync::Mutex::new(()),
                metrics,
            }),
            shutdown: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Run the first full refresh, then launch the background loop
    ///
    /// On failure the loop is not started and the error is returned.
    pub async fn start(&self) -> CacheResult<()> {
        if self.is_running() {
            return Err(CacheError::AlreadyStarted {
                cache: self.name().to_string(),
            });
        }

        info!(
            component = self.inner.options.policy.label(),
            cache_name = %self.name(),
            "Starting first cache update"
        );

        {
            let _guard = self.inner.update_lock.lock().await;
            self.inner
                .full_refresh()
                .await
                .map_err(|e| CacheError::RefreshFailed {
                    cache: self.name().to_string(),
                    message: format!("{e:#}"),
                })?;
        }
        self.inner.publish_size();

        let inner = Arc::clone(&self.inner);
        let shutdown = CancellationToken::new();
        *self.shutdown.lock().unwrap_or_else(|p| p.into_inner()) = shutdown.clone();
        let handle = tokio::spawn(async move { inner.run(shutdown).await });
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

        Ok(())
    }

    /// Read an entry; never waits on a refresh
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.store.get(key);
        if value.is_some() {
            self.inner.metrics.hit();
        } else {
            self.inner.metrics.miss();
        }
        value
    }

    /// Refresh one key under the update lock
    ///
    /// Refresh errors are logged and counted, not returned.
    pub async fn incremental_update(&self, key: &K) {
        let _guard = self.inner.update_lock.lock().await;
        let inner = &self.inner;

        debug!(
            component = inner.options.policy.label(),
            cache_name = %inner.options.name,
            key = ?key,
            "Starting incremental cache update"
        );
        let started = Instant::now();
        let result = inner
            .source
            .incremental_refresh(inner.store.as_ref(), key)
            .await;
        inner
            .metrics
            .incremental_update(started.elapsed(), result.is_ok());

        match result {
            Ok(()) => debug!(cache_name = %inner.options.name, key = ?key, "Incremental cache update succeeded"),
            Err(e) => {
                inner.metrics.error("incremental_update_error");
                error!(
                    cache_name = %inner.options.name,
                    key = ?key,
                    error = %format!("{e:#}"),
                    "Incremental cache update failed"
                );
            }
        }
        inner.publish_size();
    }

    /// Stop the background loop and wait for it, bounded by `timeout`
    pub async fn close(&self, timeout: Duration) -> CacheResult<()> {
        self.shutdown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .cancel();
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(cache_name = %self.name(), error = %e, "Cache loop ended abnormally");
                Ok(())
            }
            Err(_) => Err(CacheError::ShutdownTimeout {
                cache: self.name().to_string(),
                timeout,
            }),
        }
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        self.shutdown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .cancel();
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn full_refresh(&self) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = self.source.full_refresh(self.store.as_ref()).await;
        self.metrics.full_update(started.elapsed(), result.is_ok());

        match &result {
            Ok(()) => info!(cache_name = %self.options.name, "Cache updated successfully"),
            Err(e) => {
                self.metrics.error("full_update_error");
                error!(
                    cache_name = %self.options.name,
                    error = %format!("{e:#}"),
                    "Failed to update cache"
                );
            }
        }
        result
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let ttl = self.options.ttl;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + ttl, ttl);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(cache_name = %self.options.name, "Background cache closed");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let _guard = self.update_lock.lock().await;

        if self.options.policy == EvictionPolicy::Background {
            let ttl = self.options.ttl;
            if tokio::time::timeout(ttl, self.full_refresh()).await.is_err() {
                self.metrics.error("full_update_timeout");
                warn!(
                    cache_name = %self.options.name,
                    timeout = ?ttl,
                    "Full cache update exceeded its deadline"
                );
            }
        }

        let cleaned = self.store.clean_up();
        if cleaned > 0 {
            self.metrics.evicted(cleaned);
            info!(cache_name = %self.options.name, cleaned, "Cleaned expired cache entries");
        }
        self.publish_size();
    }

    fn publish_size(&self) {
        self.metrics.size(self.store.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingSource {
        full_calls: AtomicUsize,
        incremental_calls: AtomicUsize,
        fail_full: AtomicBool,
        fail_incremental: AtomicBool,
    }

    #[async_trait]
    impl RefreshSource<String, u32> for CountingSource {
        async fn full_refresh(&self, store: &dyn SetGetter<String, u32>) -> anyhow::Result<()> {
            let n = self.full_calls.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            if self.fail_full.load(Ordering::SeqCst) {
                anyhow::bail!("backend unavailable");
            }
            store.set("generation".to_string(), n, Utc::now());
            Ok(())
        }

        async fn incremental_refresh(
            &self,
            store: &dyn SetGetter<String, u32>,
            key: &String,
        ) -> anyhow::Result<()> {
            self.incremental_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_incremental.load(Ordering::SeqCst) {
                anyhow::bail!("key {key} unreadable");
            }
            store.set(key.clone(), 99, Utc::now());
            Ok(())
        }
    }

    fn cache(source: &Arc<CountingSource>, options: CacheOptions) -> Cache<String, u32> {
        Cache::new(options, Arc::clone(source) as Arc<dyn RefreshSource<String, u32>>).unwrap()
    }

    #[tokio::test]
    async fn test_start_runs_full_refresh_and_launches_loop() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new().ttl(Duration::from_secs(60)));

        cache.start().await.unwrap();

        assert_eq!(source.full_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"generation".to_string()), Some(1));
        assert!(cache.is_running());
        cache.close(Duration::from_secs(1)).await.unwrap();
        assert!(!cache.is_running());
    }

    #[tokio::test]
    async fn test_start_failure_does_not_launch_loop() {
        let source = Arc::new(CountingSource::default());
        source.fail_full.store(true, Ordering::SeqCst);
        let cache = cache(&source, CacheOptions::new().name("broken"));

        let err = cache.start().await.unwrap_err();
        assert!(matches!(err, CacheError::RefreshFailed { ref cache, .. } if cache == "broken"));
        assert!(err.to_string().contains("backend unavailable"));
        assert!(!cache.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new());
        cache.start().await.unwrap();
        assert!(matches!(
            cache.start().await,
            Err(CacheError::AlreadyStarted { .. })
        ));
        cache.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_key_is_none() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new());
        assert_eq!(cache.get(&"nope".to_string()), None);
    }

    #[tokio::test]
    async fn test_background_loop_refreshes_every_ttl() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new().ttl(Duration::from_millis(20)));
        cache.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        cache.close(Duration::from_secs(1)).await.unwrap();

        let calls = source.full_calls.load(Ordering::SeqCst);
        assert!(calls >= 3, "expected periodic refreshes, got {calls}");
        assert!(cache.get(&"generation".to_string()).is_some());
    }

    #[tokio::test]
    async fn test_lru_loop_does_not_full_refresh() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(
            &source,
            CacheOptions::new().ttl(Duration::from_millis(20)).lru(8),
        );
        cache.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.close(Duration::from_secs(1)).await.unwrap();

        assert_eq!(source.full_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_data() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new().ttl(Duration::from_millis(20)));
        cache.start().await.unwrap();
        source.fail_full.store(true, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(cache.get(&"generation".to_string()), Some(1));
        cache.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_incremental_update_sets_key() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new());

        cache.incremental_update(&"feed".to_string()).await;

        assert_eq!(source.incremental_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"feed".to_string()), Some(99));
    }

    #[tokio::test]
    async fn test_incremental_update_swallows_errors() {
        let source = Arc::new(CountingSource::default());
        source.fail_incremental.store(true, Ordering::SeqCst);
        let cache = cache(&source, CacheOptions::new());

        cache.incremental_update(&"feed".to_string()).await;

        assert_eq!(cache.get(&"feed".to_string()), None);
    }

    /// Flags any refresh that starts while another one is still running
    #[derive(Debug, Default)]
    struct ExclusiveSource {
        in_refresh: AtomicBool,
        overlapped: AtomicBool,
        calls: AtomicUsize,
    }

    impl ExclusiveSource {
        async fn hold(&self) {
            if self.in_refresh.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_refresh.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RefreshSource<String, u32> for ExclusiveSource {
        async fn full_refresh(&self, store: &dyn SetGetter<String, u32>) -> anyhow::Result<()> {
            self.hold().await;
            store.set("all".to_string(), 1, Utc::now());
            Ok(())
        }

        async fn incremental_refresh(
            &self,
            store: &dyn SetGetter<String, u32>,
            key: &String,
        ) -> anyhow::Result<()> {
            self.hold().await;
            store.set(key.clone(), 2, Utc::now());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_and_incremental_refreshes_never_overlap() {
        let source = Arc::new(ExclusiveSource::default());
        let cache = Cache::new(
            CacheOptions::new().ttl(Duration::from_millis(30)),
            Arc::clone(&source) as Arc<dyn RefreshSource<String, u32>>,
        )
        .unwrap();

        let (key_a, key_b) = ("a".to_string(), "b".to_string());
        let (started, (), ()) = tokio::join!(
            cache.start(),
            cache.incremental_update(&key_a),
            cache.incremental_update(&key_b),
        );
        started.unwrap();

        // Let background ticks race with more incremental updates
        for key in ["c", "d", "e", "f", "g", "h", "i", "j"] {
            let key = key.to_string();
            tokio::join!(
                cache.incremental_update(&key),
                tokio::time::sleep(Duration::from_millis(10)),
            );
        }
        cache.close(Duration::from_secs(1)).await.unwrap();

        assert!(!source.overlapped.load(Ordering::SeqCst));
        assert!(source.calls.load(Ordering::SeqCst) >= 11);
        assert_eq!(cache.get(&"j".to_string()), Some(2));
    }

    #[test]
    fn test_debug_reports_running_state() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new().name("debuggable"));
        let rendered = format!("{cache:?}");
        assert!(rendered.contains("debuggable"));
        assert!(rendered.contains("running: false"));
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let source = Arc::new(CountingSource::default());
        let err = Cache::new(
            CacheOptions::new().name("instant").ttl(Duration::ZERO),
            source as Arc<dyn RefreshSource<String, u32>>,
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::InvalidOptions { ref cache, .. } if cache == "instant"));
    }

    #[tokio::test]
    async fn test_restart_after_close_runs_loop_again() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new().ttl(Duration::from_millis(20)));

        cache.start().await.unwrap();
        cache.close(Duration::from_secs(1)).await.unwrap();
        assert!(!cache.is_running());

        cache.start().await.unwrap();
        let after_restart = source.full_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(90)).await;

        assert!(cache.is_running());
        assert!(source.full_calls.load(Ordering::SeqCst) > after_restart);
        cache.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_start_is_ok() {
        let source = Arc::new(CountingSource::default());
        let cache = cache(&source, CacheOptions::new());
        cache.close(Duration::from_millis(10)).await.unwrap();
    }
}
