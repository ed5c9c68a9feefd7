//! In-memory response cache: keyed by `host + path` (query string excluded,
//! matching the data model's documented cache key), LRU/LFU/FIFO eviction,
//! ETag/If-Modified-Since validation.
//!
//! Grounded on the teacher's `DashMap`-guarded shared-state style
//! (`upstream/cluster.rs`), but ordering metadata for LRU/LFU/FIFO needs a
//! single lock across the whole table, so the hot path here is one
//! `Mutex<CacheInner>` rather than per-key `DashMap` entries.

use crate::config::types::{CacheConfig, CachePolicy};
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub etag: String,
    pub last_modified: u64,
    pub expires: u64,
    pub content_type: String,
    pub body: Bytes,
    pub is_compressed: bool,
    access_count: u64,
    last_access: u64,
}

impl CacheEntry {
    fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

pub enum CacheLookup {
    /// Serve straight from cache.
    Hit(CacheEntry),
    /// Conditional request validated against the cached entry — send 304
    /// carrying the entry's `ETag`/`Last-Modified` for the response headers.
    NotModified(CacheEntry),
    Miss,
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size: u64,
    pub current_entries: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion/access order, oldest first. For LRU, touched on every hit;
    /// for FIFO, only on insert; for LFU it's unused (access_count drives
    /// eviction instead).
    order: Vec<String>,
    current_size: u64,
}

pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: Vec::new(),
                current_size: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Cache key is `host + path`; query strings are deliberately excluded
    /// so `?utm_source=...` noise doesn't fragment the cache.
    pub fn key_for(host: &str, path: &str) -> String {
        format!("{host}{path}")
    }

    pub fn is_cacheable(&self, content_type: &str, size: u64) -> bool {
        if !self.config.enabled {
            return false;
        }
        if size < self.config.min_file_size || size > self.config.max_file_size {
            return false;
        }
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.config.mime_whitelist.iter().any(|t| t == ct)
    }

    pub fn get(&self, key: &str, if_none_match: Option<&str>, if_modified_since: Option<u64>) -> CacheLookup {
        let mut inner = self.inner.lock().unwrap();
        let now = now_unix();

        let entry = match inner.entries.get(key) {
            Some(e) if e.expires > now => e.clone(),
            Some(_) => {
                inner.remove_entry_by_key(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("gateway_cache_misses_total").increment(1);
                return CacheLookup::Miss;
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("gateway_cache_misses_total").increment(1);
                return CacheLookup::Miss;
            }
        };

        if let Some(inm) = if_none_match {
            if inm == entry.etag {
                self.touch(&mut inner, key, now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("gateway_cache_hits_total").increment(1);
                return CacheLookup::NotModified(entry);
            }
        }
        if let Some(ims) = if_modified_since {
            if entry.last_modified <= ims {
                self.touch(&mut inner, key, now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("gateway_cache_hits_total").increment(1);
                return CacheLookup::NotModified(entry);
            }
        }

        self.touch(&mut inner, key, now);
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_cache_hits_total").increment(1);
        CacheLookup::Hit(entry)
    }

    fn touch(&self, inner: &mut CacheInner, key: &str, now: u64) {
        if let Some(e) = inner.entries.get_mut(key) {
            e.access_count += 1;
            e.last_access = now;
        }
        if self.config.policy == CachePolicy::Lru {
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                let k = inner.order.remove(pos);
                inner.order.push(k);
            }
        }
    }

    pub fn put(
        &self,
        key: String,
        body: Bytes,
        content_type: String,
        last_modified: u64,
        ttl_secs: Option<u64>,
        is_compressed: bool,
    ) {
        let size = body.len() as u64;
        let ttl = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        let now = now_unix();
        let etag = generate_etag(&key, last_modified, size);

        let entry = CacheEntry {
            etag,
            last_modified,
            expires: now + ttl,
            content_type,
            body,
            is_compressed,
            access_count: 1,
            last_access: now,
        };

        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.entries.remove(&key) {
            inner.current_size -= old.size();
            inner.order.retain(|k| k != &key);
        }

        while inner.entries.len() >= self.config.max_entries
            || inner.current_size + size > self.config.max_bytes
        {
            if !self.evict_one(&mut inner) {
                break;
            }
        }

        inner.current_size += entry.size();
        inner.order.push(key.clone());
        inner.entries.insert(key, entry);

        metrics::gauge!("gateway_cache_entries").set(inner.entries.len() as f64);
        metrics::gauge!("gateway_cache_bytes").set(inner.current_size as f64);
    }

    fn evict_one(&self, inner: &mut CacheInner) -> bool {
        let victim = match self.config.policy {
            CachePolicy::Lru | CachePolicy::Fifo => inner.order.first().cloned(),
            CachePolicy::Lfu => inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.access_count)
                .map(|(k, _)| k.clone()),
        };
        match victim {
            Some(key) => {
                inner.remove_entry_by_key(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("gateway_cache_evictions_total").increment(1);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.remove_entry_by_key(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
        inner.current_size = 0;
    }

    pub fn cleanup_expired(&self) {
        let now = now_unix();
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.remove_entry_by_key(&key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            current_size: inner.current_size,
            current_entries: inner.entries.len() as u64,
        }
    }
}

impl CacheInner {
    fn remove_entry_by_key(&mut self, key: &str) {
        if let Some(e) = self.entries.remove(key) {
            self.current_size -= e.size();
        }
        self.order.retain(|k| k != key);
    }
}

fn generate_etag(key: &str, mtime: u64, size: u64) -> String {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    mtime.hash(&mut hasher);
    size.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_bytes: 1024,
            max_entries: 2,
            default_ttl_secs: 60,
            policy: CachePolicy::Lru,
            mime_whitelist: vec!["text/html".to_string()],
            min_file_size: 0,
            max_file_size: 1024,
        }
    }

    #[test]
    fn put_then_get_hits() {
        let cache = ResponseCache::new(test_config());
        let key = ResponseCache::key_for("example.com", "/index.html");
        cache.put(key.clone(), Bytes::from_static(b"hello"), "text/html".to_string(), 100, None, false);
        match cache.get(&key, None, None) {
            CacheLookup::Hit(e) => assert_eq!(e.body, Bytes::from_static(b"hello")),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn etag_match_returns_not_modified() {
        let cache = ResponseCache::new(test_config());
        let key = ResponseCache::key_for("example.com", "/a");
        cache.put(key.clone(), Bytes::from_static(b"x"), "text/html".to_string(), 100, None, false);
        let etag = match cache.get(&key, None, None) {
            CacheLookup::Hit(e) => e.etag,
            _ => panic!("expected hit"),
        };
        match cache.get(&key, Some(&etag), None) {
            CacheLookup::NotModified(_) => {}
            _ => panic!("expected not modified"),
        }
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = ResponseCache::new(test_config());
        cache.put("a".into(), Bytes::from_static(b"1"), "text/html".into(), 1, None, false);
        cache.put("b".into(), Bytes::from_static(b"2"), "text/html".into(), 1, None, false);
        // touch "a" so "b" becomes least recently used
        let _ = cache.get("a", None, None);
        cache.put("c".into(), Bytes::from_static(b"3"), "text/html".into(), 1, None, false);
        assert!(matches!(cache.get("b", None, None), CacheLookup::Miss));
        assert!(matches!(cache.get("a", None, None), CacheLookup::Hit(_)));
        assert!(matches!(cache.get("c", None, None), CacheLookup::Hit(_)));
    }

    #[test]
    fn min_and_max_file_size_gate_cacheability() {
        let mut cfg = test_config();
        cfg.min_file_size = 10;
        cfg.max_file_size = 100;
        let cache = ResponseCache::new(cfg);
        assert!(!cache.is_cacheable("text/html", 5));
        assert!(!cache.is_cacheable("text/html", 200));
        assert!(cache.is_cacheable("text/html", 50));
        assert!(!cache.is_cacheable("image/png", 50));
    }
}
