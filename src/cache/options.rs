//! Cache construction options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How entries leave the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Unbounded; periodically fully refreshed, swept at `10 x TTL`
    #[default]
    Background,
    /// Capacity-bounded, recency ordered, stale at `TTL`
    Lru,
}

impl EvictionPolicy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Background => "background_cache",
            Self::Lru => "lru_cache",
        }
    }
}

/// Options for [`Cache`](super::Cache)
///
/// Defaults: name `"default"`, background policy, 30s TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    pub name: String,
    pub policy: EvictionPolicy,
    pub ttl: Duration,
    /// Only meaningful for [`EvictionPolicy::Lru`]; zero disables storage
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            policy: EvictionPolicy::Background,
            ttl: Duration::from_secs(30),
            capacity: 0,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Switch to the LRU policy with the given capacity
    #[must_use]
    pub fn lru(mut self, capacity: usize) -> Self {
        self.policy = EvictionPolicy::Lru;
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn background(mut self) -> Self {
        self.policy = EvictionPolicy::Background;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CacheOptions::default();
        assert_eq!(options.name, "default");
        assert_eq!(options.policy, EvictionPolicy::Background);
        assert_eq!(options.ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_switches_policy() {
        let options = CacheOptions::new()
            .name("templates")
            .ttl(Duration::from_secs(5))
            .lru(128);
        assert_eq!(options.policy, EvictionPolicy::Lru);
        assert_eq!(options.capacity, 128);
        assert_eq!(options.policy.label(), "lru_cache");
    }
}
