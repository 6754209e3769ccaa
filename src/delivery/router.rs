//! Delivery router.
//!
//! Emulates the CDN layer in front of the transform service: normalize the
//! request, serve from the response cache or the transformed store, and fall
//! through to the transform service on a miss.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::descriptor::CanonicalPath;
use crate::edge::Normalizer;
use crate::error::{DeliveryError, IoError, TransformError};
use crate::io::ObjectStore;
use crate::transform::{etag_for, TransformOutcome, TransformService};

use super::cache::{CachedResponse, ResponseCache, DEFAULT_RESPONSE_CACHE_CAPACITY};

/// Storage statuses treated as "not cached yet" rather than as failures.
pub const DEFAULT_SOFT_MISS_STATUSES: [u16; 5] = [403, 404, 500, 503, 504];

/// Content type for stored variants that carry none.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Store error statuses that fall through to the transform service
    pub soft_miss_statuses: Vec<u16>,

    /// Capacity of the in-process response cache in bytes (0 disables it)
    pub cache_bytes: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            soft_miss_statuses: DEFAULT_SOFT_MISS_STATUSES.to_vec(),
            cache_bytes: DEFAULT_RESPONSE_CACHE_CAPACITY,
        }
    }
}

// =============================================================================
// Delivery outcome
// =============================================================================

/// Where a cached response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the in-process response cache
    Memory,
    /// Served from the transformed-asset store
    Store,
}

impl CacheStatus {
    /// Value for the `X-Cache` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Memory | CacheStatus::Store => "hit",
        }
    }
}

/// A response served without invoking the transform service.
#[derive(Debug, Clone)]
pub struct CachedDelivery {
    pub response: CachedResponse,
    pub status: CacheStatus,
}

/// Result of a delivery request.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Served from a cache tier (`X-Cache: hit`)
    Hit(CachedDelivery),
    /// Produced by the transform service (`X-Cache: miss`)
    Miss(TransformOutcome),
}

impl DeliveryOutcome {
    /// Value for the `X-Cache` header.
    pub fn x_cache(&self) -> &'static str {
        match self {
            DeliveryOutcome::Hit(hit) => hit.status.as_str(),
            DeliveryOutcome::Miss(_) => "miss",
        }
    }
}

// =============================================================================
// Delivery Router
// =============================================================================

/// Local stand-in for the CDN delivery layer.
pub struct DeliveryRouter<S: ObjectStore> {
    normalizer: Normalizer,
    service: Arc<TransformService<S>>,
    cache: ResponseCache,
    config: DeliveryConfig,
}

impl<S: ObjectStore> DeliveryRouter<S> {
    /// Create a router in front of `service`. Lookups go to the service's
    /// transformed store.
    pub fn new(normalizer: Normalizer, service: Arc<TransformService<S>>, config: DeliveryConfig) -> Self {
        Self {
            normalizer,
            service,
            cache: ResponseCache::with_capacity(config.cache_bytes),
            config,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Serve a client request.
    ///
    /// # Arguments
    ///
    /// * `path` - Resource path as requested (e.g. `/img/cat.jpg`)
    /// * `raw_query` - Undecoded query string, if any
    /// * `accept` - The `Accept` header, consulted for `f=auto`
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Upstream`] when the transformed store fails with a
    ///   status outside the soft-miss set
    /// - [`DeliveryError::Transform`] when the transform service fails
    pub async fn deliver(
        &self,
        path: &str,
        raw_query: Option<&str>,
        accept: Option<&str>,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let canonical = self.normalizer.normalize_query(path, raw_query, accept);

        if let Some(response) = self.cache.get(&canonical).await {
            debug!(path = %canonical, "Response cache hit");
            return Ok(DeliveryOutcome::Hit(CachedDelivery {
                response,
                status: CacheStatus::Memory,
            }));
        }

        let parsed = CanonicalPath::parse(&canonical).map_err(|e| TransformError::InvalidPath {
            path: canonical.clone(),
            reason: e.to_string(),
        })?;

        let key = parsed.store_key();
        match self.service.transformed().get(&key).await {
            Ok(object) => {
                debug!(key = %key, bytes = object.len(), "Transformed store hit");
                let response = CachedResponse {
                    etag: etag_for(&object.data),
                    content_type: object
                        .content_type
                        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
                    cache_control: object
                        .cache_control
                        .unwrap_or_else(|| self.service.config().cache_control()),
                    data: object.data,
                };
                self.cache.put(canonical, response.clone()).await;

                Ok(DeliveryOutcome::Hit(CachedDelivery {
                    response,
                    status: CacheStatus::Store,
                }))
            }
            Err(e) if self.is_soft_miss(&e) => {
                debug!(key = %key, status = e.status_code(), "Transformed store miss");
                let outcome = self.service.handle_canonical(&parsed).await?;

                if let TransformOutcome::Image(image) = &outcome {
                    let response = CachedResponse {
                        data: Bytes::clone(&image.data),
                        content_type: image.content_type.clone(),
                        cache_control: image.cache_control.clone(),
                        etag: image.etag.clone(),
                    };
                    self.cache.put(canonical, response).await;
                }

                Ok(DeliveryOutcome::Miss(outcome))
            }
            Err(e) => Err(DeliveryError::Upstream(e)),
        }
    }

    fn is_soft_miss(&self, error: &IoError) -> bool {
        self.config.soft_miss_statuses.contains(&error.status_code())
    }
}

// =============================================================================
// Tests
// =============================================================================
