//! In-process response cache for the delivery router.
//!
//! Stands in for the CDN's edge cache: responses are kept by canonical path
//! for as long as their `Cache-Control` allows.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total body size in bytes and evicts least-recently-used
//! entries when the capacity is exceeded. Bodies larger than the whole capacity
//! are never admitted.
//!
//! # Expiry
//!
//! Each entry expires after its `s-maxage` (or `max-age`). Responses marked
//! `private`, `no-store` or `no-cache`, or with no max-age, are not cached.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;

/// Default cache capacity: 64MB
pub const DEFAULT_RESPONSE_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Maximum number of entries (to bound LRU overhead)
const MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => panic!("MAX_ENTRIES must be non-zero"),
};

/// A response body with the headers needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub data: Bytes,
    pub content_type: String,
    pub cache_control: String,
    pub etag: String,
}

struct Entry {
    response: CachedResponse,
    expires_at: Instant,
}

struct Inner {
    entries: LruCache<String, Entry>,
    current_size: usize,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.current_size = self.current_size.saturating_sub(entry.response.data.len());
        Some(entry)
    }
}

// =============================================================================
// Response Cache
// =============================================================================

/// LRU response cache with size-based capacity and per-entry expiry.
pub struct ResponseCache {
    inner: RwLock<Inner>,
    max_size: usize,
}

impl ResponseCache {
    /// Create a new response cache with default capacity (64MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RESPONSE_CACHE_CAPACITY)
    }

    /// Create a new response cache with the specified capacity in bytes.
    ///
    /// A capacity of zero disables caching.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: LruCache::new(MAX_ENTRIES),
                current_size: 0,
            }),
            max_size,
        }
    }

    /// Get a fresh response. Expired entries are dropped on access.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.write().await;

        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.remove(key);
        }
        None
    }

    /// Store a response if its cache-control allows it.
    ///
    /// Returns whether the response was admitted.
    pub async fn put(&self, key: impl Into<String>, response: CachedResponse) -> bool {
        let Some(ttl) = cacheable_ttl(&response.cache_control) else {
            return false;
        };
        self.put_with_ttl(key, response, ttl).await
    }

    /// Store a response for an explicit TTL.
    pub async fn put_with_ttl(
        &self,
        key: impl Into<String>,
        response: CachedResponse,
        ttl: Duration,
    ) -> bool {
        let size = response.data.len();
        if ttl.is_zero() || size > self.max_size {
            return false;
        }

        let key = key.into();
        let expires_at = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(far_future);

        let mut inner = self.inner.write().await;
        inner.remove(&key);

        let evicted = inner.entries.push(
            key,
            Entry {
                response,
                expires_at,
            },
        );
        inner.current_size += size;

        // Pushed out by the entry limit
        if let Some((_, evicted)) = evicted {
            inner.current_size = inner.current_size.saturating_sub(evicted.response.data.len());
        }

        // Evict entries until we're under capacity
        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.response.data.len());
                }
                None => break,
            }
        }

        true
    }

    pub async fn remove(&self, key: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.write().await;
        inner.remove(key).map(|entry| entry.response)
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.current_size = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Current total body size in bytes.
    pub async fn size(&self) -> usize {
        self.inner.read().await.current_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

fn far_future() -> Instant {
    // Roughly 30 years; only hit for absurd max-age values
    Instant::now() + Duration::from_secs(30 * 365 * 24 * 60 * 60)
}

/// How long a shared cache may keep a response, if at all.
///
/// `s-maxage` takes precedence over `max-age`.
pub fn cacheable_ttl(cache_control: &str) -> Option<Duration> {
    let mut max_age = None;
    let mut s_maxage = None;

    for directive in cache_control.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        let (name, value) = match directive.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), Some(value.trim().trim_matches('"').to_string())),
            None => (directive.clone(), None),
        };

        match name.as_str() {
            "no-store" | "no-cache" | "private" => return None,
            "max-age" => max_age = value.and_then(|v| v.parse::<u64>().ok()),
            "s-maxage" => s_maxage = value.and_then(|v| v.parse::<u64>().ok()),
            _ => {}
        }
    }

    s_maxage.or(max_age).map(Duration::from_secs)
}

// =============================================================================
// Tests
// =============================================================================
