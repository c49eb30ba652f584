//! Short-TTL memo of recent timeline and explain results.
//!
//! Entries are keyed by `(org, operation, subject hash, depth, k, window)` and
//! held in a bounded LRU. Invalidation is coarse: a rebuild drops every entry
//! of its org.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use crate::graph::types::OrgId;
use crate::reasoner::{Explanation, TimelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Timeline,
    Explain,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub org: OrgId,
    pub operation: Operation,
    pub subject: u64,
    pub depth: usize,
    pub k: usize,
    pub window_secs: i64,
}

impl CacheKey {
    pub fn timeline(org: &OrgId, root_foreign_id: &str, depth: usize, window_secs: i64) -> Self {
        Self {
            org: org.clone(),
            operation: Operation::Timeline,
            subject: subject_hash(root_foreign_id),
            depth,
            k: 0,
            window_secs,
        }
    }

    pub fn explain(org: &OrgId, query: &str, depth: usize, k: usize) -> Self {
        Self {
            org: org.clone(),
            operation: Operation::Explain,
            subject: subject_hash(query),
            depth,
            k,
            window_secs: 0,
        }
    }
}

/// Hash of the case- and whitespace-normalized subject text.
fn subject_hash(subject: &str) -> u64 {
    let normalized = subject
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

/// A cached result.
#[derive(Debug, Clone)]
pub enum CachedSubgraph {
    Timeline(Arc<TimelineResult>),
    Explain(Arc<Explanation>),
}

struct Entry {
    inserted: Instant,
    value: CachedSubgraph,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

pub struct SubgraphCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl SubgraphCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_secs))
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedSubgraph> {
        let found = self.entries.lock().ok().and_then(|mut entries| {
            let lookup = entries
                .get(key)
                .map(|entry| (entry.inserted.elapsed() <= self.ttl, entry.value.clone()));
            match lookup {
                Some((true, value)) => Some(value),
                Some((false, _)) => {
                    entries.pop(key);
                    None
                }
                None => None,
            }
        });
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn get_timeline(&self, key: &CacheKey) -> Option<Arc<TimelineResult>> {
        match self.get(key)? {
            CachedSubgraph::Timeline(t) => Some(t),
            CachedSubgraph::Explain(_) => None,
        }
    }

    pub fn get_explain(&self, key: &CacheKey) -> Option<Arc<Explanation>> {
        match self.get(key)? {
            CachedSubgraph::Explain(e) => Some(e),
            CachedSubgraph::Timeline(_) => None,
        }
    }

    pub fn put(&self, key: CacheKey, value: CachedSubgraph) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                key,
                Entry {
                    inserted: Instant::now(),
                    value,
                },
            );
        }
    }

    /// Drop every entry belonging to `org`. Returns how many were removed.
    pub fn invalidate_org(&self, org: &OrgId) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| &k.org == org)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(org_id = %org, removed = stale.len(), "subgraph cache invalidated");
        stale.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().map(|e| e.len()).unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(s: &str) -> OrgId {
        OrgId::parse(s).unwrap()
    }

    fn timeline(root: &str) -> CachedSubgraph {
        CachedSubgraph::Timeline(Arc::new(TimelineResult {
            root: root.into(),
            nodes: vec![],
            edges: vec![],
            timeline: vec![],
            degraded: false,
        }))
    }

    #[test]
    fn hit_after_put_and_normalized_subject() {
        let cache = SubgraphCache::new(8, Duration::from_secs(60));
        let key = CacheKey::explain(&org("acme"), "Why was ENG-102  reopened?", 3, 12);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), timeline("ENG-102"));

        let same = CacheKey::explain(&org("acme"), "why was eng-102 reopened?", 3, 12);
        assert!(cache.get(&same).is_some());
        assert!(cache.get_explain(&same).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn keys_are_org_scoped() {
        let cache = SubgraphCache::new(8, Duration::from_secs(60));
        cache.put(CacheKey::timeline(&org("acme"), "ENG-1", 3, 3600), timeline("ENG-1"));
        assert!(cache
            .get(&CacheKey::timeline(&org("globex"), "ENG-1", 3, 3600))
            .is_none());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = SubgraphCache::new(8, Duration::ZERO);
        let key = CacheKey::timeline(&org("acme"), "ENG-1", 3, 3600);
        cache.put(key.clone(), timeline("ENG-1"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn invalidate_only_touches_one_org() {
        let cache = SubgraphCache::new(8, Duration::from_secs(60));
        cache.put(CacheKey::timeline(&org("acme"), "ENG-1", 3, 3600), timeline("ENG-1"));
        cache.put(CacheKey::timeline(&org("acme"), "ENG-2", 3, 3600), timeline("ENG-2"));
        cache.put(CacheKey::timeline(&org("globex"), "ENG-1", 3, 3600), timeline("ENG-1"));

        assert_eq!(cache.invalidate_org(&org("acme")), 2);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache
            .get(&CacheKey::timeline(&org("globex"), "ENG-1", 3, 3600))
            .is_some());
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = SubgraphCache::new(2, Duration::from_secs(60));
        for i in 0..5 {
            cache.put(
                CacheKey::timeline(&org("acme"), &format!("ENG-{i}"), 3, 3600),
                timeline("x"),
            );
        }
        assert_eq!(cache.stats().entries, 2);
    }
}
