// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Render plan caching.
//!
//! Parsing a template and building its [`RenderPlan`] happens once per
//! template version. Plans are stored under a key that includes the
//! resolver's modification stamp, so an edited template gets a new key and
//! is recompiled on the next request while stale entries age out of the LRU.
//!
//! # Custom Caches
//!
//! Implement the [`Cache`] trait to plug in another strategy.

use crate::error::{LuhpError, Result};
use crate::plan::RenderPlan;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Capacity used when a cache is created with a capacity of zero.
pub const DEFAULT_CAPACITY: usize = 100;

/// Builds the cache key of a template version.
pub fn plan_key(resolved_path: &str, stamp: u64) -> String {
    format!("plan:{}@{}", resolved_path, stamp)
}

/// Trait for render plan caches.
///
/// Implementations are shared between threads rendering concurrently.
pub trait Cache: Send + Sync + std::fmt::Debug {
    /// Retrieves a plan from the cache.
    fn get(&self, key: &str) -> Result<Option<Arc<RenderPlan>>>;
    /// Stores a plan in the cache.
    fn set(&self, key: &str, plan: Arc<RenderPlan>) -> Result<()>;
    /// Removes a plan from the cache.
    fn remove(&self, key: &str) -> Result<()>;
    /// Clears all cached plans.
    fn clear(&self) -> Result<()>;
    /// Checks if a key exists in the cache.
    fn contains_key(&self, key: &str) -> bool;
    /// Number of cached plans.
    fn len(&self) -> usize;
    /// Returns `true` if nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Creates a boxed clone sharing the same storage.
    fn clone_box(&self) -> Box<dyn Cache>;
}

impl Clone for Box<dyn Cache> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// In-memory LRU (Least Recently Used) cache.
///
/// Clones share the same storage.
///
/// # Examples
///
/// ```rust,ignore
/// use luhp::MemoryCache;
///
/// let cache = MemoryCache::new(100);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCache {
    cache: Arc<Mutex<LruCache<String, Arc<RenderPlan>>>>,
}

impl MemoryCache {
    /// Creates a new memory cache holding at most `capacity` plans.
    ///
    /// A capacity of zero falls back to [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, Arc<RenderPlan>>>> {
        self.cache
            .lock()
            .map_err(|_| LuhpError::CacheError("Failed to acquire cache lock".to_string()))
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Arc<RenderPlan>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, plan: Arc<RenderPlan>) -> Result<()> {
        self.lock()?.put(key.to_string(), plan);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn contains_key(&self, key: &str) -> bool {
        self.lock().map(|cache| cache.contains(key)).unwrap_or(false)
    }

    fn len(&self) -> usize {
        self.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn clone_box(&self) -> Box<dyn Cache> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_template;
    use crate::plan::build_plan;

    fn plan(path: &str) -> Arc<RenderPlan> {
        let source = "<p>{{ x }}</p>";
        Arc::new(build_plan(parse_template(source).unwrap(), path, source))
    }

    #[test]
    fn test_plan_key_includes_stamp() {
        assert_eq!(plan_key("pages/a.luhp", 7), "plan:pages/a.luhp@7");
        assert_ne!(plan_key("a", 1), plan_key("a", 2));
    }

    #[test]
    fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new(10);
        cache.set("a", plan("a.luhp")).unwrap();
        assert!(cache.contains_key("a"));
        assert_eq!(cache.get("a").unwrap().unwrap().path, "a.luhp");

        cache.remove("a").unwrap();
        assert!(cache.get("a").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_and_shared_clones() {
        let cache = MemoryCache::new(2);
        let other = cache.clone_box();
        cache.set("a", plan("a")).unwrap();
        cache.set("b", plan("b")).unwrap();
        cache.get("a").unwrap();
        cache.set("c", plan("c")).unwrap();

        assert!(other.contains_key("a"));
        assert!(!other.contains_key("b"));
        assert_eq!(other.len(), 2);

        other.clear().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let cache = MemoryCache::new(0);
        for i in 0..DEFAULT_CAPACITY {
            cache.set(&i.to_string(), plan("p")).unwrap();
        }
        assert_eq!(cache.len(), DEFAULT_CAPACITY);
    }
}
