//! Capacity-bounded store for the LRU policy.
//!
//! Entries live in a slot arena linked into a recency list (head is least
//! recently used, tail most recently used). Freed slots are recycled through
//! a free list instead of being reallocated.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use super::store::{age, SetGetter};

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    updated_at: DateTime<Utc>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct LruState<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node(slot).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.node_mut(slot) {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(node) = self.node_mut(t) {
                    node.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn move_to_back(&mut self, slot: usize) {
        if self.tail != Some(slot) {
            self.unlink(slot);
            self.push_back(slot);
        }
    }

    fn remove(&mut self, slot: usize) -> Option<Node<K, V>> {
        self.unlink(slot);
        let node = self.slots.get_mut(slot).and_then(Option::take)?;
        self.index.remove(&node.key);
        self.free.push(slot);
        Some(node)
    }

    fn insert(&mut self, key: K, value: V, updated_at: DateTime<Utc>) {
        let node = Node {
            key: key.clone(),
            value,
            updated_at,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_back(slot);
    }
}

/// Recency-ordered store bounded by `capacity`
///
/// Reads treat an entry as stale once `age >= TTL`: the entry is dropped and
/// the read reports a miss. A capacity of zero disables storage entirely.
pub struct LruStore<K, V> {
    state: Mutex<LruState<K, V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> fmt::Debug for LruStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruStore")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K, V> LruStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LruState::with_capacity(capacity)),
            capacity,
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K, V> SetGetter<K, V> for LruStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn set(&self, key: K, value: V, updated_at: DateTime<Utc>) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(&slot) = state.index.get(&key) {
            state.move_to_back(slot);
            if let Some(node) = state.node_mut(slot) {
                node.value = value;
                node.updated_at = updated_at;
            }
            return;
        }

        if state.index.len() >= self.capacity {
            if let Some(oldest) = state.head {
                state.remove(oldest);
            }
        }
        state.insert(key, value, updated_at);
    }

    fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let slot = *state.index.get(key)?;
        let updated_at = state.node(slot)?.updated_at;

        if age(updated_at, Utc::now()) >= self.ttl {
            state.remove(slot);
            return None;
        }

        state.move_to_back(slot);
        state.node(slot).map(|node| node.value.clone())
    }

    fn last_updated(&self, key: &K) -> Option<DateTime<Utc>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let slot = *state.index.get(key)?;
        state.node(slot).map(|node| node.updated_at)
    }

    fn clean_up(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let expired: Vec<usize> = state
            .index
            .values()
            .copied()
            .filter(|&slot| {
                state
                    .node(slot)
                    .is_some_and(|node| age(node.updated_at, now) > self.ttl)
            })
            .collect();
        for slot in &expired {
            state.remove(*slot);
        }
        expired.len()
    }

    fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .index
            .len()
    }
}
