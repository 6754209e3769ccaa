//! Router configuration for the image delivery service.
//!
//! # Route Structure
//!
//! ```text
//! /health                           - Health check
//! /transform/{*canonical_path}      - Origin transform service
//! /{*path}                          - Delivery (edge emulation, optional)
//! ```
//!
//! Static and prefixed routes win over the delivery catch-all, so originals
//! keyed `health` or under `transform/` are not reachable through delivery.
//! Keep such keys out of the originals bucket or run with delivery disabled
//! behind a real CDN.
//!
//! # Example
//!
//! ```ignore
//! use image_delivery::server::{create_router, RouterConfig};
//!
//! let router = create_router(transform_service, None, RouterConfig::new());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{delivery_handler, health_handler, transform_handler, AppState};
use crate::delivery::DeliveryRouter;
use crate::io::ObjectStore;
use crate::transform::TransformService;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default CORS allows any origin and tracing is enabled.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// # Arguments
///
/// * `transform` - The origin transform service
/// * `delivery` - The local delivery layer; when `None` only the origin and
///   health routes are mounted. It only sees paths the other routes do not
///   claim.
/// * `config` - Router configuration
pub fn create_router<S>(
    transform: Arc<TransformService<S>>,
    delivery: Option<Arc<DeliveryRouter<S>>>,
    config: RouterConfig,
) -> Router
where
    S: ObjectStore + 'static,
{
    let edge_enabled = delivery.is_some();
    let mut app_state = AppState::new(transform);
    if let Some(delivery) = delivery {
        app_state = app_state.with_delivery(delivery);
    }

    let cors = build_cors_layer(&config);

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/transform/{*canonical_path}",
            get(transform_handler::<S>),
        );

    if edge_enabled {
        router = router.route("/{*path}", get(delivery_handler::<S>));
    }

    let router = router.with_state(app_state).layer(cors);

    // Add tracing if enabled
    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .expose_headers([
            HeaderName::from_static("server-timing"),
            HeaderName::from_static("x-cache"),
        ])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => {
            // No origins allowed - this effectively disables CORS
            cors
        }
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
