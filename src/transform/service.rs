//! Transform Service for producing and persisting image variants.
//!
//! The TransformService is the origin tier behind the delivery layer. It only
//! runs on a cache miss and orchestrates:
//! - Canonical path parsing and limit checks
//! - Fetching the original from the originals store
//! - Decode / orient / resize / encode (on the blocking pool)
//! - Best-effort write-through into the transformed store
//! - Redirecting when the output is too large to return inline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       TransformService                          │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                      handle()                           │    │
//! │  │  1. Parse path         4. Transform (blocking pool)     │    │
//! │  │  2. Check limits       5. Write-through (best effort)   │    │
//! │  │  3. Fetch original     6. Inline 200 or 302 redirect    │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │        │                     │                      │           │
//! │        ▼                     ▼                      ▼           │
//! │  ┌────────────┐    ┌──────────────────┐   ┌──────────────────┐  │
//! │  │ originals  │    │ ImageTransformer │   │   transformed    │  │
//! │  │ (read)     │    └──────────────────┘   │   (write)        │  │
//! │  └────────────┘                           └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::descriptor::{CanonicalPath, Descriptor, Operations, Quality};
use crate::edge::NormalizerConfig;
use crate::error::{IoError, TransformError};
use crate::io::{ObjectStore, StoredObject};

use super::flight::SingleFlight;
use super::transformer::{
    EncodedImage, ImageTransformer, DEFAULT_MAX_DECODE_BYTES, DEFAULT_MAX_SOURCE_DIMENSION,
};

/// Largest response body returned inline (6MB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 6 * 1024 * 1024;

/// Largest original accepted for transformation (32MB).
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 32 * 1024 * 1024;

/// Default `max-age` for stored and returned variants (one year).
pub const DEFAULT_CACHE_MAX_AGE: u64 = 365 * 24 * 60 * 60;

/// Default wall-clock budget for one transformation.
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single write-through attempt.
pub const DEFAULT_STORE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache-Control sent with oversize redirects.
pub const REDIRECT_CACHE_CONTROL: &str = "private, no-store";

/// Content type used when an original carries none.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Number of SHA-256 bytes kept in ETags.
const ETAG_DIGEST_BYTES: usize = 16;

// =============================================================================
// Configuration
// =============================================================================

/// Limits and policy for the transform service.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Largest accepted `width` in a canonical path
    pub max_width: NonZeroU32,

    /// Largest accepted `height` in a canonical path
    pub max_height: NonZeroU32,

    /// Quality for lossy output when the descriptor carries none
    pub default_quality: Quality,

    /// Outputs above this size are redirected instead of returned inline
    pub max_payload_bytes: usize,

    /// Originals above this size are refused
    pub max_source_bytes: usize,

    /// Decoder allocation ceiling
    pub max_decode_bytes: u64,

    /// Largest accepted source width or height
    pub max_source_dimension: u32,

    /// `max-age` for stored and returned variants
    pub cache_max_age: u64,

    /// Wall-clock budget for fetch + transform + store
    pub timeout: Duration,

    /// Bound on a single write-through attempt
    pub store_write_timeout: Duration,

    /// Prefix for redirect locations (e.g. `https://img.example.com`)
    pub redirect_base: Option<String>,

    /// Coalesce concurrent misses for the same key
    pub single_flight: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        let normalizer = NormalizerConfig::default();
        Self {
            max_width: normalizer.max_width,
            max_height: normalizer.max_height,
            default_quality: normalizer.default_quality,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
            max_source_dimension: DEFAULT_MAX_SOURCE_DIMENSION,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            timeout: DEFAULT_TRANSFORM_TIMEOUT,
            store_write_timeout: DEFAULT_STORE_WRITE_TIMEOUT,
            redirect_base: None,
            single_flight: true,
        }
    }
}

impl TransformConfig {
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    pub fn with_max_source_bytes(mut self, bytes: usize) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    pub fn with_max_decode_bytes(mut self, bytes: u64) -> Self {
        self.max_decode_bytes = bytes;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u64) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_store_write_timeout(mut self, timeout: Duration) -> Self {
        self.store_write_timeout = timeout;
        self
    }

    pub fn with_redirect_base(mut self, base: impl Into<String>) -> Self {
        self.redirect_base = Some(base.into());
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Cache-Control for stored variants and inline responses.
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age)
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Result of the write-through step.
#[derive(Debug, Clone)]
pub enum CacheWrite {
    /// The variant was written to the transformed store
    Stored,
    /// The write failed; the response is unaffected
    Failed(IoError),
    /// Nothing to write (original passthrough)
    Skipped,
}

impl CacheWrite {
    /// Value for the `X-Cache-Write` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheWrite::Stored => "stored",
            CacheWrite::Failed(_) => "failed",
            CacheWrite::Skipped => "skipped",
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, CacheWrite::Stored)
    }
}

/// Time spent in each phase of a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub fetch: Option<Duration>,
    pub transform: Option<Duration>,
    pub store: Option<Duration>,
}

impl Timings {
    /// Render as a `Server-Timing` header value.
    pub fn server_timing(&self) -> String {
        [
            ("fetch", self.fetch),
            ("transform", self.transform),
            ("store", self.store),
        ]
        .into_iter()
        .filter_map(|(name, duration)| {
            duration.map(|d| format!("{};dur={:.1}", name, d.as_secs_f64() * 1000.0))
        })
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// An image returned inline.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub data: Bytes,
    pub content_type: String,
    pub cache_control: String,
    pub etag: String,
    pub timings: Timings,
    pub cache_write: CacheWrite,
}

impl ImageResponse {
    fn new(
        data: Bytes,
        content_type: impl Into<String>,
        cache_control: String,
        timings: Timings,
        cache_write: CacheWrite,
    ) -> Self {
        let etag = etag_for(&data);
        Self {
            data,
            content_type: content_type.into(),
            cache_control,
            etag,
            timings,
            cache_write,
        }
    }
}

/// A redirect issued instead of an oversize body.
#[derive(Debug, Clone)]
pub struct RedirectResponse {
    pub location: String,
    pub timings: Timings,
    pub cache_write: CacheWrite,
}

impl RedirectResponse {
    pub fn cache_control(&self) -> &'static str {
        REDIRECT_CACHE_CONTROL
    }
}

/// What the transform service answers with.
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    /// 200 with the bytes inline
    Image(ImageResponse),
    /// 302 to a location the client can fetch the variant from
    Redirect(RedirectResponse),
}

impl TransformOutcome {
    pub fn cache_write(&self) -> &CacheWrite {
        match self {
            TransformOutcome::Image(image) => &image.cache_write,
            TransformOutcome::Redirect(redirect) => &redirect.cache_write,
        }
    }
}

type FlightResult = Result<TransformOutcome, TransformError>;

// =============================================================================
// Transform Service
// =============================================================================

/// Origin-side transform service.
///
/// Generic over the object store so tests can run against in-memory stores.
///
/// # Example
///
/// ```ignore
/// use image_delivery::transform::{TransformConfig, TransformService};
///
/// let service = TransformService::new(originals, transformed, TransformConfig::default());
/// let outcome = service.handle("/img/cat.jpg/quality=80,width=200").await?;
/// ```
pub struct TransformService<S: ObjectStore> {
    originals: Arc<S>,
    transformed: Arc<S>,
    transformer: ImageTransformer,
    config: TransformConfig,
    flights: SingleFlight<FlightResult>,
}

impl<S: ObjectStore> TransformService<S> {
    pub fn new(originals: S, transformed: S, config: TransformConfig) -> Self {
        Self::with_shared_stores(Arc::new(originals), Arc::new(transformed), config)
    }

    /// Create a service over stores that are also used elsewhere
    /// (the delivery router reads the same transformed store).
    pub fn with_shared_stores(originals: Arc<S>, transformed: Arc<S>, config: TransformConfig) -> Self {
        let transformer = ImageTransformer::new(
            config.max_source_dimension,
            config.max_decode_bytes,
            config.default_quality,
        );
        Self {
            originals,
            transformed,
            transformer,
            config,
            flights: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn originals(&self) -> &Arc<S> {
        &self.originals
    }

    pub fn transformed(&self) -> &Arc<S> {
        &self.transformed
    }

    /// Handle a request for a canonical path.
    ///
    /// # Errors
    ///
    /// - [`TransformError::InvalidPath`] for unparseable paths or paths outside
    ///   the configured limits
    /// - [`TransformError::SourceNotFound`] / [`TransformError::SourceFetchFailed`]
    ///   when the original cannot be read
    /// - transform-class errors (see [`TransformError::is_transform_failure`])
    /// - [`TransformError::Timeout`] when the wall-clock budget runs out
    ///
    /// Write-through failures are never returned; they show up in
    /// [`TransformOutcome::cache_write`].
    pub async fn handle(&self, canonical_path: &str) -> Result<TransformOutcome, TransformError> {
        let path = CanonicalPath::parse(canonical_path).map_err(|e| TransformError::InvalidPath {
            path: canonical_path.to_string(),
            reason: e.to_string(),
        })?;
        self.handle_canonical(&path).await
    }

    /// Handle an already-parsed canonical path.
    pub async fn handle_canonical(&self, path: &CanonicalPath) -> Result<TransformOutcome, TransformError> {
        self.check_limits(path)?;

        if !self.config.single_flight || path.descriptor().is_original() {
            return self.process_with_timeout(path).await;
        }

        let key = path.store_key();
        self.flights
            .run(&key, || self.process_with_timeout(path))
            .await
    }

    /// Reject descriptors the edge would never have produced.
    fn check_limits(&self, path: &CanonicalPath) -> Result<(), TransformError> {
        let Descriptor::Resized(ops) = path.descriptor() else {
            return Ok(());
        };

        let too_big = |value: Option<NonZeroU32>, max: NonZeroU32| value.is_some_and(|v| v > max);
        let reason = if too_big(ops.width(), self.config.max_width) {
            format!("width exceeds maximum {}", self.config.max_width)
        } else if too_big(ops.height(), self.config.max_height) {
            format!("height exceeds maximum {}", self.config.max_height)
        } else {
            return Ok(());
        };

        Err(TransformError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    }

    async fn process_with_timeout(&self, path: &CanonicalPath) -> FlightResult {
        match tokio::time::timeout(self.config.timeout, self.process(path)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    key = %path.store_key(),
                    timeout_secs = self.config.timeout.as_secs(),
                    "Transformation timed out"
                );
                Err(TransformError::Timeout {
                    seconds: self.config.timeout.as_secs(),
                })
            }
        }
    }

    async fn process(&self, path: &CanonicalPath) -> FlightResult {
        let mut timings = Timings::default();

        let started = Instant::now();
        let source = self.fetch_source(path.source_key()).await?;
        timings.fetch = Some(started.elapsed());

        let ops = match path.descriptor() {
            Descriptor::Original => {
                debug!(key = %path.source_key(), bytes = source.len(), "Serving original");
                let content_type = source
                    .content_type
                    .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
                return Ok(TransformOutcome::Image(ImageResponse::new(
                    source.data,
                    content_type,
                    self.config.cache_control(),
                    timings,
                    CacheWrite::Skipped,
                )));
            }
            Descriptor::Resized(ops) => *ops,
        };

        if source.len() > self.config.max_source_bytes {
            return Err(TransformError::SourceTooLarge {
                size: source.len(),
                limit: self.config.max_source_bytes,
            });
        }

        let started = Instant::now();
        let encoded = self.transform(source, ops).await?;
        timings.transform = Some(started.elapsed());

        let key = path.store_key();
        let cache_control = self.config.cache_control();

        let started = Instant::now();
        let cache_write = self.write_through(&key, &encoded, &cache_control).await;
        timings.store = Some(started.elapsed());

        info!(
            key = %key,
            format = %encoded.format,
            bytes = encoded.len(),
            cache_write = cache_write.as_str(),
            "Transformed image"
        );

        if encoded.len() > self.config.max_payload_bytes {
            let location = self.redirect_location(path, &ops);
            debug!(
                key = %key,
                bytes = encoded.len(),
                limit = self.config.max_payload_bytes,
                location = %location,
                "Output exceeds payload limit, redirecting"
            );
            return Ok(TransformOutcome::Redirect(RedirectResponse {
                location,
                timings,
                cache_write,
            }));
        }

        Ok(TransformOutcome::Image(ImageResponse::new(
            encoded.data.clone(),
            encoded.content_type(),
            cache_control,
            timings,
            cache_write,
        )))
    }

    async fn fetch_source(&self, key: &str) -> Result<StoredObject, TransformError> {
        self.originals.get(key).await.map_err(|e| match e {
            IoError::NotFound(_) => TransformError::SourceNotFound {
                key: key.to_string(),
            },
            other => TransformError::SourceFetchFailed(other),
        })
    }

    /// Run the transformer on the blocking pool.
    async fn transform(&self, source: StoredObject, ops: Operations) -> Result<EncodedImage, TransformError> {
        let transformer = self.transformer;
        let StoredObject {
            data, content_type, ..
        } = source;

        tokio::task::spawn_blocking(move || transformer.transform(&data, content_type.as_deref(), &ops))
            .await
            .map_err(|e| TransformError::DecodeError {
                message: if e.is_panic() {
                    "image processing panicked".to_string()
                } else {
                    format!("image processing task failed: {}", e)
                },
            })?
    }

    /// Best-effort write of a variant into the transformed store.
    ///
    /// One attempt, bounded by the store write timeout. Failures are logged
    /// and reported but never propagated.
    pub async fn write_through(&self, key: &str, image: &EncodedImage, cache_control: &str) -> CacheWrite {
        let object = StoredObject::new(image.data.clone())
            .with_content_type(image.content_type())
            .with_cache_control(cache_control);

        let result = match tokio::time::timeout(
            self.config.store_write_timeout,
            self.transformed.put(key, object),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IoError::Timeout(format!(
                "write of '{}' exceeded {:?}",
                key, self.config.store_write_timeout
            ))),
        };

        match result {
            Ok(()) => CacheWrite::Stored,
            Err(e) => {
                warn!(
                    key = %key,
                    store = %self.transformed.identifier(),
                    error = %e,
                    "Cache write failed"
                );
                CacheWrite::Failed(e)
            }
        }
    }

    /// Location for an oversize redirect: the resource path with the
    /// operations flattened into the query string.
    pub fn redirect_location(&self, path: &CanonicalPath, ops: &Operations) -> String {
        let base = self
            .config
            .redirect_base
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/');

        let resource = path
            .source_key()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(ops.query_params())
            .finish();

        format!("{}/{}?{}", base, resource, query)
    }
}

/// Strong ETag from a SHA-256 prefix of the body.
pub fn etag_for(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..ETAG_DIGEST_BYTES]))
}

// =============================================================================
// Tests
// =============================================================================
