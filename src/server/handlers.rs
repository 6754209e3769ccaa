//! HTTP request handlers for the image delivery API.
//!
//! # Endpoints
//!
//! - `GET /transform/{*canonical_path}` - Origin transform service
//! - `GET /{*path}?f=&w=&h=&q=` - Delivery (edge emulation), when enabled
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::delivery::{CachedDelivery, DeliveryOutcome, DeliveryRouter};
use crate::error::{DeliveryError, TransformError};
use crate::io::ObjectStore;
use crate::transform::{ImageResponse, RedirectResponse, TransformOutcome, TransformService};

const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const X_CACHE_WRITE: HeaderName = HeaderName::from_static("x-cache-write");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<S: ObjectStore> {
    /// The origin transform service
    pub transform: Arc<TransformService<S>>,

    /// The local delivery layer (None when the edge routes are disabled)
    pub delivery: Option<Arc<DeliveryRouter<S>>>,
}

impl<S: ObjectStore> AppState<S> {
    pub fn new(transform: Arc<TransformService<S>>) -> Self {
        Self {
            transform,
            delivery: None,
        }
    }

    pub fn with_delivery(mut self, delivery: Arc<DeliveryRouter<S>>) -> Self {
        self.delivery = Some(delivery);
        self
    }
}

impl<S: ObjectStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            delivery: self.delivery.clone(),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_path")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert TransformError to HTTP response.
///
/// - 5xx errors are logged at ERROR level
/// - 404 at DEBUG (common and expected)
/// - other 4xx at WARN
impl IntoResponse for TransformError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TransformError::InvalidPath { .. } => (StatusCode::BAD_REQUEST, "invalid_path"),
            TransformError::SourceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            TransformError::SourceFetchFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "source_fetch_failed")
            }
            TransformError::SourceTooLarge { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "source_too_large")
            }
            TransformError::DecodeError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "decode_error"),
            TransformError::EncodeError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
            TransformError::Unsupported { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "unsupported"),
            TransformError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        };

        error_response(status, error_type, self.to_string())
    }
}

/// Convert DeliveryError to HTTP response.
impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        match self {
            DeliveryError::Upstream(e) => {
                error_response(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string())
            }
            DeliveryError::Transform(e) => e.into_response(),
        }
    }
}

fn error_response(status: StatusCode, error_type: &'static str, message: String) -> Response {
    // Log errors based on severity
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let error_response = ErrorResponse::with_status(error_type, message, status);
    (status, Json(error_response)).into_response()
}

// =============================================================================
// Response Rendering
// =============================================================================

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, value = %value, "Dropping invalid header value"),
    }
}

fn image_response(image: ImageResponse, x_cache: Option<&'static str>) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, &image.content_type);
    insert_header(&mut headers, header::CACHE_CONTROL, &image.cache_control);
    insert_header(&mut headers, header::ETAG, &image.etag);
    insert_header(&mut headers, SERVER_TIMING, &image.timings.server_timing());
    insert_header(&mut headers, X_CACHE_WRITE, image.cache_write.as_str());
    if let Some(x_cache) = x_cache {
        insert_header(&mut headers, X_CACHE, x_cache);
    }

    (StatusCode::OK, headers, Body::from(image.data)).into_response()
}

fn redirect_response(redirect: RedirectResponse, x_cache: Option<&'static str>) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::LOCATION, &redirect.location);
    insert_header(&mut headers, header::CACHE_CONTROL, redirect.cache_control());
    insert_header(&mut headers, SERVER_TIMING, &redirect.timings.server_timing());
    insert_header(&mut headers, X_CACHE_WRITE, redirect.cache_write.as_str());
    if let Some(x_cache) = x_cache {
        insert_header(&mut headers, X_CACHE, x_cache);
    }

    (StatusCode::FOUND, headers, Body::empty()).into_response()
}

fn outcome_response(outcome: TransformOutcome, x_cache: Option<&'static str>) -> Response {
    match outcome {
        TransformOutcome::Image(image) => image_response(image, x_cache),
        TransformOutcome::Redirect(redirect) => redirect_response(redirect, x_cache),
    }
}

fn cached_response(hit: CachedDelivery) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, &hit.response.content_type);
    insert_header(&mut headers, header::CACHE_CONTROL, &hit.response.cache_control);
    insert_header(&mut headers, header::ETAG, &hit.response.etag);
    insert_header(&mut headers, X_CACHE, hit.status.as_str());

    (StatusCode::OK, headers, Body::from(hit.response.data)).into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle origin transform requests.
///
/// # Endpoint
///
/// `GET /transform/{*canonical_path}`
///
/// # Example
///
/// ```text
/// GET /transform/img/cat.jpg/format=webp,quality=80,width=200
/// ```
///
/// # Response
///
/// - `200 OK` with the image and `Content-Type`, `Cache-Control`, `ETag`,
///   `Server-Timing` and `X-Cache-Write` headers
/// - `302 Found` to the resource with flattened operations when the output is
///   too large to return inline
/// - `400`/`404`/`500`/`504` with a JSON [`ErrorResponse`]
pub async fn transform_handler<S: ObjectStore + 'static>(
    State(state): State<AppState<S>>,
    Path(canonical_path): Path<String>,
) -> Result<Response, TransformError> {
    let canonical_path = format!("/{}", canonical_path.trim_start_matches('/'));
    let outcome = state.transform.handle(&canonical_path).await?;
    Ok(outcome_response(outcome, None))
}

/// Handle client-facing delivery requests.
///
/// # Endpoint
///
/// `GET /{*path}?f=&w=&h=&q=`
///
/// Normalizes the request, then serves from the response cache, the
/// transformed store, or the transform service. Adds `X-Cache: hit|miss`.
pub async fn delivery_handler<S: ObjectStore + 'static>(
    State(state): State<AppState<S>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, DeliveryError> {
    let Some(delivery) = state.delivery.as_ref() else {
        return Err(TransformError::InvalidPath {
            path: uri.path().to_string(),
            reason: "delivery routes are disabled".to_string(),
        }
        .into());
    };

    let path = urlencoding::decode(uri.path()).map_err(|e| TransformError::InvalidPath {
        path: uri.path().to_string(),
        reason: e.to_string(),
    })?;
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());

    let outcome = delivery.deliver(&path, uri.query(), accept).await?;
    let x_cache = outcome.x_cache();

    Ok(match outcome {
        DeliveryOutcome::Hit(hit) => cached_response(hit),
        DeliveryOutcome::Miss(outcome) => outcome_response(outcome, Some(x_cache)),
    })
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
