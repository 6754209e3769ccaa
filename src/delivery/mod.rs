//! Local delivery layer.
//!
//! Emulates the CDN in front of the transform service so the whole pipeline
//! can run in one process:
//!
//! ```text
//!   GET /img/cat.jpg?w=200
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │     Normalizer      │  → /img/cat.jpg/quality=80,width=200
//! └──────────┬──────────┘
//!            ▼
//! ┌─────────────────────┐   hit
//! │   ResponseCache     │ ───────▶ 200 (X-Cache: hit)
//! └──────────┬──────────┘
//!            ▼
//! ┌─────────────────────┐   hit
//! │  transformed store  │ ───────▶ 200 (X-Cache: hit)
//! └──────────┬──────────┘
//!            │ soft miss (403/404/500/503/504)
//!            ▼
//! ┌─────────────────────┐
//! │  TransformService   │ ───────▶ 200 / 302 (X-Cache: miss)
//! └─────────────────────┘
//! ```
//!
//! Any other store error becomes a 502.

mod cache;
mod router;

pub use cache::{cacheable_ttl, CachedResponse, ResponseCache, DEFAULT_RESPONSE_CACHE_CAPACITY};
pub use router::{
    CacheStatus, CachedDelivery, DeliveryConfig, DeliveryOutcome, DeliveryRouter,
    DEFAULT_SOFT_MISS_STATUSES,
};
