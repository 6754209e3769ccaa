//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /{*path}?w=..      GET /transform/{*canonical_path}       │
//! │                                                                 │
//! │  ┌──────────────────────────────┐  ┌─────────────────────────┐  │
//! │  │           handlers           │  │         routes          │  │
//! │  │ (requests, error responses)  │  │  (router config, CORS)  │  │
//! │  └──────────────────────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    delivery_handler, health_handler, transform_handler, AppState, ErrorResponse, HealthResponse,
};
pub use routes::{create_router, RouterConfig};
