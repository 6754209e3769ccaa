//! # Image Delivery
//!
//! On-demand image resizing and re-encoding behind a two-tier cache, with
//! originals and transformed variants stored in S3-compatible object storage.
//!
//! A request such as `GET /img/cat.jpg?w=200&f=auto` is first rewritten by the
//! edge [`Normalizer`] into a canonical path
//! (`/img/cat.jpg/format=webp,quality=80,width=200`). The canonical path is the
//! cache key for every tier below it: the in-memory response cache, the
//! transformed-images bucket and finally the [`TransformService`], which fetches
//! the original, transforms it and writes the result back.
//!
//! ## Features
//!
//! - **Canonical cache keys**: one spelling per variant, independent of query order or junk params
//! - **Format negotiation**: `f=auto` picks AVIF, WebP or JPEG from the `Accept` header
//! - **Write-through caching**: transformed variants are stored for future requests, best-effort
//! - **Oversize redirect**: variants too large for an inline response are served by 302
//! - **Request coalescing**: concurrent misses for the same variant transform once
//!
//! ## Architecture
//!
//! - [`descriptor`] - Canonical descriptor and path grammar
//! - [`edge`] - Query parameter normalization and content negotiation
//! - [`transform`] - Decode, resize, encode and the origin transform service
//! - [`delivery`] - Local emulation of the CDN delivery tier
//! - [`io`] - Object store abstraction and its S3 implementation
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use image_delivery::{
//!     create_router, create_s3_client, RouterConfig, S3ObjectStore, TransformConfig,
//!     TransformService,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = create_s3_client(None, "us-east-1").await;
//!     let originals = S3ObjectStore::new(client.clone(), "originals".to_string());
//!     let transformed = S3ObjectStore::new(client, "transformed".to_string());
//!
//!     let service = TransformService::new(originals, transformed, TransformConfig::default());
//!     let router = create_router(Arc::new(service), None, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod descriptor;
pub mod edge;
pub mod error;
pub mod io;
pub mod server;
pub mod transform;

// Re-export commonly used types
pub use config::{CheckConfig, Cli, Command, NormalizeConfig, ServeConfig};
pub use delivery::{
    cacheable_ttl, CacheStatus, CachedDelivery, CachedResponse, DeliveryConfig, DeliveryOutcome,
    DeliveryRouter, ResponseCache,
};
pub use descriptor::{
    CanonicalPath, Descriptor, DescriptorError, Operations, OutputFormat, Quality, ORIGINAL,
};
pub use edge::{Normalizer, NormalizerConfig, DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY};
pub use error::{DeliveryError, IoError, TransformError};
pub use io::{create_s3_client, ObjectStore, S3ObjectStore, StoredObject};
pub use server::{
    create_router, delivery_handler, health_handler, transform_handler, AppState, ErrorResponse,
    HealthResponse, RouterConfig,
};
pub use transform::{
    etag_for, CacheWrite, EncodedImage, ImageResponse, ImageTransformer, RedirectResponse,
    SingleFlight, Timings, TransformConfig, TransformOutcome, TransformService,
};
