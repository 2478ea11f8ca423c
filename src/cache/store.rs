//! The store abstraction shared by both eviction policies.

use chrono::{DateTime, Utc};

/// Keyed store handed to refresh sources
///
/// `set` overwrites unconditionally. Sources that must not regress an entry
/// compare against [`last_updated`](SetGetter::last_updated) before calling it.
pub trait SetGetter<K, V>: Send + Sync {
    fn set(&self, key: K, value: V, updated_at: DateTime<Utc>);

    fn get(&self, key: &K) -> Option<V>;

    fn last_updated(&self, key: &K) -> Option<DateTime<Utc>>;

    /// Remove expired entries, returning how many were removed
    fn clean_up(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entry age, clamped to zero for timestamps in the future
pub(crate) fn age(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (now - updated_at).to_std().unwrap_or_default()
}
