//! Origin-tier transform service.
//!
//! Invoked by the delivery layer on a cache miss for a canonical path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Delivery layer (on miss)         │
//! └────────────────────┬────────────────────┘
//!                      │  /img/cat.jpg/quality=80,width=200
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            TransformService             │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ SingleFlight │  │ImageTransformer │  │
//! │  │ (per key)    │  │ (decode → ops → │  │
//! │  │              │  │  encode)        │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬──────────────────┬───────────┘
//!            │ get              │ put (best effort)
//!            ▼                  ▼
//! ┌───────────────────┐ ┌───────────────────┐
//! │  originals store  │ │ transformed store │
//! └───────────────────┘ └───────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TransformService`]: Parses the path, fetches, transforms, writes through
//! - [`ImageTransformer`]: Pure bytes-in/bytes-out image pipeline
//! - [`SingleFlight`]: Coalesces concurrent misses for the same key
//! - [`TransformOutcome`]: Inline image or oversize redirect

mod flight;
mod service;
mod transformer;

pub use flight::SingleFlight;
pub use service::{
    etag_for, CacheWrite, ImageResponse, RedirectResponse, Timings, TransformConfig,
    TransformOutcome, TransformService, DEFAULT_CACHE_MAX_AGE, DEFAULT_MAX_PAYLOAD_BYTES,
    DEFAULT_MAX_SOURCE_BYTES, DEFAULT_STORE_WRITE_TIMEOUT, DEFAULT_TRANSFORM_TIMEOUT,
    REDIRECT_CACHE_CONTROL,
};
pub use transformer::{
    detect_source, fit_inside, output_format, EncodedImage, ImageTransformer, SourceKind,
    DEFAULT_MAX_DECODE_BYTES, DEFAULT_MAX_SOURCE_DIMENSION,
};
