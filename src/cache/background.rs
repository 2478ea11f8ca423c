//! Unbounded store for the background policy.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::Duration;

use super::store::{age, SetGetter};

/// Sweep threshold as a multiple of the TTL
const EXPIRY_TTL_MULTIPLIER: u32 = 10;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    updated_at: DateTime<Utc>,
}

/// Unbounded map; entries survive until `age > 10 x TTL`
pub struct BackgroundStore<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K, V> fmt::Debug for BackgroundStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundStore")
            .field("ttl", &self.ttl)
            .field("len", &self.entries.read().map(|e| e.len()).unwrap_or(0))
            .finish()
    }
}

impl<K, V> BackgroundStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn expiry(&self) -> Duration {
        self.ttl.saturating_mul(EXPIRY_TTL_MULTIPLIER)
    }
}

impl<K, V> SetGetter<K, V> for BackgroundStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn set(&self, key: K, value: V, updated_at: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(key, Entry { value, updated_at });
    }

    fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(key).map(|entry| entry.value.clone())
    }

    fn last_updated(&self, key: &K) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(key).map(|entry| entry.updated_at)
    }

    fn clean_up(&self) -> usize {
        let expiry = self.expiry();
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| age(entry.updated_at, now) <= expiry);
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_get_unset_key_is_none() {
        let store: BackgroundStore<String, i32> = BackgroundStore::new(Duration::from_secs(1));
        assert_eq!(store.get(&"missing".to_string()), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_then_get() {
        let store = BackgroundStore::new(Duration::from_secs(1));
        let now = Utc::now();
        store.set("a", 1, now);
        assert_eq!(store.get(&"a"), Some(1));
        assert_eq!(store.last_updated(&"a"), Some(now));
    }

    #[test]
    fn test_entries_are_served_regardless_of_ttl() {
        // No staleness check on read for the background policy
        let store = BackgroundStore::new(Duration::from_secs(1));
        store.set("old", 7, Utc::now() - TimeDelta::seconds(5));
        assert_eq!(store.get(&"old"), Some(7));
    }

    #[test]
    fn test_clean_up_removes_only_entries_older_than_ten_ttls() {
        let store = BackgroundStore::new(Duration::from_secs(1));
        let now = Utc::now();
        store.set("fresh", 1, now);
        store.set("aging", 2, now - TimeDelta::seconds(9));
        store.set("expired", 3, now - TimeDelta::seconds(11));

        assert_eq!(store.clean_up(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&"expired"), None);
        assert_eq!(store.get(&"aging"), Some(2));
    }

    #[test]
    fn test_set_overwrites_existing_entry() {
        let store = BackgroundStore::new(Duration::from_secs(1));
        let first = Utc::now() - TimeDelta::seconds(1);
        let second = Utc::now();
        store.set("k", 1, first);
        store.set("k", 2, second);
        assert_eq!(store.get(&"k"), Some(2));
        assert_eq!(store.last_updated(&"k"), Some(second));
        assert_eq!(store.len(), 1);
    }
}
