//! Bounded LRU + TTL memoization of token counts.
//!
//! Keys combine a SHA-256 digest of the text with the adapter and model
//! names, so long documents never sit in the key map. Recency is an
//! intrusive doubly-linked list threaded through a slab of nodes, with a
//! hash index for O(1) lookup; everything lives behind one mutex that is
//! held only for the map/list mutation.
//!
//! TTL expiry is lazy: an entry idle for longer than the TTL is dropped on
//! the next `get`, which counts as both a miss and an eviction. There is no
//! background sweep.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::models::TokenCount;

pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Composite cache key: (text, adapter, model).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    adapter: String,
    model: String,
    text_digest: [u8; 32],
    text_len: usize,
}

impl CacheKey {
    pub fn new(text: &str, adapter: &str, model: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self {
            adapter: adapter.to_string(),
            model: model.to_string(),
            text_digest: digest.into(),
            text_len: text.len(),
        }
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the keyed text was empty.
    pub fn is_empty_text(&self) -> bool {
        self.text_len == 0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.adapter,
            self.model,
            hex::encode(&self.text_digest[..8]),
            self.text_len
        )
    }
}

/// Read-only snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_requests: u64,
    pub cache_size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

struct Node {
    key: CacheKey,
    value: TokenCount,
    inserted_at: Instant,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner {
    index: HashMap<CacheKey, usize>,
    /// Slots on the free list hold stale nodes until reused.
    slots: Vec<Node>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    max_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn node(&self, idx: usize) -> &Node {
        &self.slots[idx]
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.slots[idx]
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let n = self.node(idx);
            (n.prev, n.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let n = self.node_mut(idx);
        n.prev = None;
        n.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let n = self.node_mut(idx);
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            self.node_mut(h).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        let key = self.slots[idx].key.clone();
        self.index.remove(&key);
        self.free.push(idx);
    }

    fn evict_lru(&mut self) -> bool {
        match self.tail {
            Some(t) => {
                debug!("Evicted cache entry: {}", self.slots[t].key);
                self.remove(t);
                self.evictions += 1;
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, node: Node) -> usize {
        let key = node.key.clone();
        let idx = match self.free.pop() {
            Some(i) => {
                self.slots[i] = node;
                i
            }
            None => {
                self.slots.push(node);
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        idx
    }

    fn reset(&mut self) -> usize {
        let removed = self.index.len();
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.evictions += removed as u64;
        removed
    }

    fn remove_where(&mut self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let doomed: Vec<usize> = self
            .index
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(_, &i)| i)
            .collect();
        for &i in &doomed {
            self.remove(i);
        }
        self.evictions += doomed.len() as u64;
        doomed.len()
    }
}

/// Thread-safe LRU cache for token counts.
pub struct TokenCountCache {
    inner: Mutex<Inner>,
    ttl: Option<Duration>,
}

impl TokenCountCache {
    pub fn new(max_size: usize, ttl: Option<Duration>) -> Self {
        debug!("Initialized TokenCountCache with max_size={}, ttl={:?}", max_size, ttl);
        Self {
            inner: Mutex::new(Inner {
                index: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: None,
                tail: None,
                max_size,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
        }
    }

    /// Build from a TTL in seconds, as stored in configuration.
    pub fn with_ttl_seconds(max_size: usize, ttl_seconds: Option<f64>) -> Self {
        Self::new(max_size, ttl_seconds.map(Duration::from_secs_f64))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<TokenCount> {
        let now = Instant::now();
        let mut inner = self.lock();
        let Some(&idx) = inner.index.get(key) else {
            inner.misses += 1;
            return None;
        };

        if let Some(ttl) = self.ttl {
            let node = inner.node(idx);
            if now.duration_since(node.last_access) > ttl {
                let age = now.duration_since(node.inserted_at);
                inner.remove(idx);
                inner.misses += 1;
                inner.evictions += 1;
                debug!("Cache entry expired for key: {} (age {:?})", key, age);
                return None;
            }
        }

        inner.unlink(idx);
        inner.push_front(idx);
        inner.hits += 1;
        let node = inner.node_mut(idx);
        node.last_access = now;
        Some(node.value.clone())
    }

    /// Store a count. Counts for empty text are never cached.
    pub fn put(&self, key: CacheKey, value: TokenCount) {
        if key.is_empty_text() {
            return;
        }
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(&idx) = inner.index.get(&key) {
            inner.unlink(idx);
            inner.push_front(idx);
            let node = inner.node_mut(idx);
            node.value = value;
            node.last_access = now;
            return;
        }

        if inner.max_size == 0 {
            return;
        }
        while inner.index.len() >= inner.max_size {
            if !inner.evict_lru() {
                break;
            }
        }
        inner.insert(Node {
            key,
            value,
            inserted_at: now,
            last_access: now,
            prev: None,
            next: None,
        });
    }

    /// Change capacity, evicting least-recently-used entries down to it.
    pub fn resize(&self, new_max_size: usize) {
        let mut inner = self.lock();
        let old = inner.max_size;
        inner.max_size = new_max_size;
        while inner.index.len() > new_max_size {
            if !inner.evict_lru() {
                break;
            }
        }
        info!("Resized token cache from {} to {}", old, new_max_size);
    }

    /// Remove every entry counted by `adapter`; returns how many were removed.
    pub fn invalidate_adapter(&self, adapter: &str) -> usize {
        let removed = self.lock().remove_where(|k| k.adapter == adapter);
        info!("Invalidated {} cache entries for adapter: {}", removed, adapter);
        removed
    }

    /// Remove every entry for `model`; returns how many were removed.
    pub fn invalidate_model(&self, model: &str) -> usize {
        let removed = self.lock().remove_where(|k| k.model == model);
        info!("Invalidated {} cache entries for model: {}", removed, model);
        removed
    }

    pub fn clear(&self) {
        let removed = self.lock().reset();
        info!("Cleared token cache, evicted {} entries", removed);
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.lock().max_size
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            total_requests: total,
            cache_size: inner.index.len(),
            max_size: inner.max_size,
            hit_rate: if total > 0 {
                inner.hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for TokenCountCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn count(n: usize) -> TokenCount {
        TokenCount {
            count: n,
            method: "heuristic".into(),
            tokenizer_id: "heuristic:m:chars_4.0".into(),
            is_exact: false,
        }
    }

    fn key(text: &str) -> CacheKey {
        CacheKey::new(text, "heuristic", "m")
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = TokenCountCache::new(10, None);
        assert!(cache.get(&key("a")).is_none());
        cache.put(key("a"), count(1));
        assert_eq!(cache.get(&key("a")), Some(count(1)));
        let s = cache.stats();
        assert_eq!((s.hits, s.misses, s.total_requests), (1, 1, 2));
        assert!((s.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = TokenCountCache::new(2, None);
        cache.put(key("a"), count(1));
        cache.put(key("b"), count(2));
        // touch "a" so "b" becomes least recently used
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("c"), count(3));

        let s = cache.stats();
        assert_eq!(s.cache_size, 2);
        assert_eq!(s.evictions, 1);
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn test_lru_insertion_order() {
        let cache = TokenCountCache::new(2, None);
        cache.put(key("a"), count(1));
        cache.put(key("b"), count(2));
        cache.put(key("c"), count(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).is_none());
    }

    #[test]
    fn test_ttl_expiry_counts_miss_and_eviction() {
        let cache = TokenCountCache::with_ttl_seconds(10, Some(0.1));
        cache.put(key("a"), count(1));
        thread::sleep(Duration::from_millis(150));
        assert!(cache.get(&key("a")).is_none());
        let s = cache.stats();
        assert_eq!(s.misses, 1);
        assert_eq!(s.evictions, 1);
        assert_eq!(s.cache_size, 0);
    }

    #[test]
    fn test_empty_text_not_cached() {
        let cache = TokenCountCache::new(10, None);
        cache.put(key(""), count(0));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_update_existing_key() {
        let cache = TokenCountCache::new(2, None);
        cache.put(key("a"), count(1));
        cache.put(key("a"), count(5));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("a")).unwrap().count, 5);
    }

    #[test]
    fn test_resize_evicts_synchronously() {
        let cache = TokenCountCache::new(5, None);
        for t in ["a", "b", "c", "d", "e"] {
            cache.put(key(t), count(1));
        }
        cache.resize(2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().max_size, 2);
        assert_eq!(cache.stats().evictions, 3);
        // the two most recent survive
        assert!(cache.get(&key("d")).is_some());
        assert!(cache.get(&key("e")).is_some());
    }

    #[test]
    fn test_invalidate_adapter_and_model() {
        let cache = TokenCountCache::new(10, None);
        cache.put(CacheKey::new("a", "tiktoken", "gpt-4"), count(1));
        cache.put(CacheKey::new("b", "tiktoken", "gpt-3"), count(1));
        cache.put(CacheKey::new("a", "heuristic", "gpt-4"), count(1));
        assert_eq!(cache.invalidate_adapter("tiktoken"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_model("gpt-4"), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate_adapter("nothing"), 0);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = TokenCountCache::new(0, None);
        cache.put(key("a"), count(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_slots_reused_after_clear() {
        let cache = TokenCountCache::new(3, None);
        for round in 0..3 {
            for t in ["a", "b", "c"] {
                cache.put(key(&format!("{}{}", t, round)), count(1));
            }
            cache.clear();
        }
        assert!(cache.is_empty());
        assert!(cache.lock().slots.len() <= 3);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(TokenCountCache::new(64, None));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let k = key(&format!("{}-{}", t, i % 50));
                        if cache.get(&k).is_none() {
                            cache.put(k, count(i));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = cache.stats();
        assert!(s.cache_size <= 64);
        assert_eq!(s.total_requests, 1600);
    }
}
