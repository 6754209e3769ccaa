//! Configuration management for the image delivery service.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap, organized as subcommands
//! - Environment variables with `IMG_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Subcommands
//!
//! - `serve` - Run the HTTP server (origin transform service + optional edge)
//! - `normalize` - Print the canonical path for a request, offline
//! - `check` - Verify S3 connectivity to both buckets
//!
//! # Environment Variables
//!
//! - `IMG_HOST` - Server bind address (default: 0.0.0.0)
//! - `IMG_PORT` - Server port (default: 3000)
//! - `IMG_ORIGINAL_BUCKET` - Bucket holding original assets (required)
//! - `IMG_TRANSFORMED_BUCKET` - Bucket holding transformed variants (required)
//! - `IMG_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `IMG_S3_REGION` - AWS region (default: us-east-1)
//! - `IMG_MAX_WIDTH` / `IMG_MAX_HEIGHT` - Dimension clamp (default: 4000)
//! - `IMG_DEFAULT_QUALITY` - Quality injected for lossy output (default: 80)
//! - `IMG_MAX_PAYLOAD_BYTES` - Inline response limit (default: 6MB)
//! - `IMG_CACHE_MAX_AGE` - max-age for stored variants (default: 1 year)
//! - `IMG_EDGE_ENABLED` - Mount the delivery routes (default: true)
//! - `IMG_SOFT_MISS_STATUSES` - Store statuses treated as misses

use std::num::NonZeroU32;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::delivery::{DeliveryConfig, DEFAULT_RESPONSE_CACHE_CAPACITY};
use crate::descriptor::Quality;
use crate::edge::{NormalizerConfig, DEFAULT_QUALITY};
use crate::transform::{
    TransformConfig, DEFAULT_CACHE_MAX_AGE, DEFAULT_MAX_DECODE_BYTES, DEFAULT_MAX_PAYLOAD_BYTES,
    DEFAULT_MAX_SOURCE_BYTES, DEFAULT_MAX_SOURCE_DIMENSION,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default transform wall-clock budget in seconds.
pub const DEFAULT_TRANSFORM_TIMEOUT_SECS: u64 = 30;

/// Default write-through timeout in seconds.
pub const DEFAULT_STORE_WRITE_TIMEOUT_SECS: u64 = 5;

/// Default soft-miss statuses, as accepted on the command line.
pub const DEFAULT_SOFT_MISS_STATUSES: &str = "403,404,500,503,504";

// =============================================================================
// CLI Arguments
// =============================================================================

/// Image Delivery - on-demand image transformation behind a cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "image-delivery")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeConfig),

    /// Print the canonical path for a request.
    Normalize(NormalizeConfig),

    /// Check S3 connectivity and configuration.
    Check(CheckConfig),
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMG_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMG_PORT")]
    pub port: u16,

    // =========================================================================
    // S3 Configuration
    // =========================================================================
    /// Bucket holding the original (untransformed) assets.
    #[arg(long, env = "IMG_ORIGINAL_BUCKET")]
    pub original_bucket: String,

    /// Bucket holding transformed variants.
    #[arg(long, env = "IMG_TRANSFORMED_BUCKET")]
    pub transformed_bucket: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "IMG_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "IMG_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Transformation Limits
    // =========================================================================
    /// Largest width a request may ask for (larger values are clamped).
    #[arg(long, default_value_t = default_dimension(), env = "IMG_MAX_WIDTH")]
    pub max_width: NonZeroU32,

    /// Largest height a request may ask for (larger values are clamped).
    #[arg(long, default_value_t = default_dimension(), env = "IMG_MAX_HEIGHT")]
    pub max_height: NonZeroU32,

    /// Quality used for lossy output when the request has none (1-100).
    #[arg(long, default_value_t = DEFAULT_QUALITY, env = "IMG_DEFAULT_QUALITY")]
    pub default_quality: u8,

    /// Outputs larger than this are redirected instead of returned inline.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD_BYTES, env = "IMG_MAX_PAYLOAD_BYTES")]
    pub max_payload_bytes: usize,

    /// Originals larger than this are refused.
    #[arg(long, default_value_t = DEFAULT_MAX_SOURCE_BYTES, env = "IMG_MAX_SOURCE_BYTES")]
    pub max_source_bytes: usize,

    /// Decoder allocation ceiling in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_DECODE_BYTES, env = "IMG_MAX_DECODE_BYTES")]
    pub max_decode_bytes: u64,

    /// Largest accepted source width or height in pixels.
    #[arg(long, default_value_t = DEFAULT_MAX_SOURCE_DIMENSION, env = "IMG_MAX_SOURCE_DIMENSION")]
    pub max_source_dimension: u32,

    // =========================================================================
    // Caching and Timeouts
    // =========================================================================
    /// Cache-Control max-age in seconds for stored variants.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "IMG_CACHE_MAX_AGE")]
    pub cache_max_age: u64,

    /// Wall-clock budget for a single transformation, in seconds.
    #[arg(long, default_value_t = DEFAULT_TRANSFORM_TIMEOUT_SECS, env = "IMG_TRANSFORM_TIMEOUT_SECS")]
    pub transform_timeout_secs: u64,

    /// Timeout for a single write-through attempt, in seconds.
    #[arg(long, default_value_t = DEFAULT_STORE_WRITE_TIMEOUT_SECS, env = "IMG_STORE_WRITE_TIMEOUT_SECS")]
    pub store_write_timeout_secs: u64,

    /// Prefix for oversize redirect locations (e.g. https://img.example.com).
    ///
    /// If not specified, redirects are host-relative.
    #[arg(long, env = "IMG_REDIRECT_BASE")]
    pub redirect_base: Option<String>,

    /// Coalesce concurrent misses for the same variant.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "IMG_SINGLE_FLIGHT")]
    pub single_flight: bool,

    // =========================================================================
    // Edge Emulation
    // =========================================================================
    /// Mount the client-facing delivery routes (`GET /{path}?w=..`).
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "IMG_EDGE_ENABLED")]
    pub edge_enabled: bool,

    /// In-process response cache capacity in bytes (0 disables it).
    #[arg(long, default_value_t = DEFAULT_RESPONSE_CACHE_CAPACITY, env = "IMG_EDGE_CACHE_BYTES")]
    pub edge_cache_bytes: usize,

    /// Transformed-store error statuses that fall through to the transform
    /// service (comma-separated).
    #[arg(
        long,
        default_value = DEFAULT_SOFT_MISS_STATUSES,
        env = "IMG_SOFT_MISS_STATUSES",
        value_delimiter = ','
    )]
    pub soft_miss_statuses: Vec<u16>,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "IMG_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

fn default_dimension() -> NonZeroU32 {
    NormalizerConfig::default().max_width
}

fn parse_quality(value: u8) -> Result<Quality, String> {
    Quality::new(value).ok_or_else(|| "default_quality must be between 1 and 100".to_string())
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.original_bucket.is_empty() {
            return Err(
                "Original bucket is required. Set --original-bucket or IMG_ORIGINAL_BUCKET"
                    .to_string(),
            );
        }
        if self.transformed_bucket.is_empty() {
            return Err(
                "Transformed bucket is required. Set --transformed-bucket or IMG_TRANSFORMED_BUCKET"
                    .to_string(),
            );
        }

        parse_quality(self.default_quality)?;

        if self.max_payload_bytes == 0 {
            return Err("max_payload_bytes must be greater than 0".to_string());
        }
        if self.max_source_bytes == 0 {
            return Err("max_source_bytes must be greater than 0".to_string());
        }
        if self.max_source_dimension < self.max_width.get().max(self.max_height.get()) {
            return Err("max_source_dimension must be at least max_width and max_height".to_string());
        }
        if self.transform_timeout_secs == 0 {
            return Err("transform_timeout_secs must be greater than 0".to_string());
        }
        if self.store_write_timeout_secs == 0 {
            return Err("store_write_timeout_secs must be greater than 0".to_string());
        }

        if let Some(status) = self
            .soft_miss_statuses
            .iter()
            .find(|status| !(100..=599).contains(*status))
        {
            return Err(format!("soft_miss_statuses contains invalid status {}", status));
        }

        if let Some(ref base) = self.redirect_base {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err("redirect_base must be an absolute http(s) URL".to_string());
            }
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn normalizer_config(&self) -> Result<NormalizerConfig, String> {
        Ok(NormalizerConfig {
            max_width: self.max_width,
            max_height: self.max_height,
            default_quality: parse_quality(self.default_quality)?,
        })
    }

    pub fn transform_config(&self) -> Result<TransformConfig, String> {
        Ok(TransformConfig {
            max_width: self.max_width,
            max_height: self.max_height,
            default_quality: parse_quality(self.default_quality)?,
            max_payload_bytes: self.max_payload_bytes,
            max_source_bytes: self.max_source_bytes,
            max_decode_bytes: self.max_decode_bytes,
            max_source_dimension: self.max_source_dimension,
            cache_max_age: self.cache_max_age,
            timeout: Duration::from_secs(self.transform_timeout_secs),
            store_write_timeout: Duration::from_secs(self.store_write_timeout_secs),
            redirect_base: self.redirect_base.clone(),
            single_flight: self.single_flight,
        })
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            soft_miss_statuses: self.soft_miss_statuses.clone(),
            cache_bytes: self.edge_cache_bytes,
        }
    }
}

// =============================================================================
// Normalize
// =============================================================================

/// Compute a canonical path offline, for debugging cache keys.
#[derive(Args, Debug, Clone)]
pub struct NormalizeConfig {
    /// Request path, optionally with a query string (e.g. "/img/cat.jpg?w=200").
    pub path: String,

    /// Query string, if not part of the path.
    #[arg(long)]
    pub query: Option<String>,

    /// Accept header, consulted for f=auto.
    #[arg(long)]
    pub accept: Option<String>,

    /// Largest width a request may ask for.
    #[arg(long, default_value_t = default_dimension(), env = "IMG_MAX_WIDTH")]
    pub max_width: NonZeroU32,

    /// Largest height a request may ask for.
    #[arg(long, default_value_t = default_dimension(), env = "IMG_MAX_HEIGHT")]
    pub max_height: NonZeroU32,

    /// Quality used for lossy output when the request has none (1-100).
    #[arg(long, default_value_t = DEFAULT_QUALITY, env = "IMG_DEFAULT_QUALITY")]
    pub default_quality: u8,
}

impl NormalizeConfig {
    /// Split into resource path and raw query. An explicit `--query` wins.
    pub fn path_and_query(&self) -> (&str, Option<&str>) {
        let (path, inline_query) = match self.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.path.as_str(), None),
        };
        (path, self.query.as_deref().or(inline_query))
    }

    pub fn normalizer_config(&self) -> Result<NormalizerConfig, String> {
        Ok(NormalizerConfig {
            max_width: self.max_width,
            max_height: self.max_height,
            default_quality: parse_quality(self.default_quality)?,
        })
    }
}

// =============================================================================
// Check
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Bucket holding the original assets.
    #[arg(long, env = "IMG_ORIGINAL_BUCKET")]
    pub original_bucket: String,

    /// Bucket holding transformed variants.
    #[arg(long, env = "IMG_TRANSFORMED_BUCKET")]
    pub transformed_bucket: String,

    /// Custom S3 endpoint URL for S3-compatible services.
    #[arg(long, env = "IMG_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "IMG_S3_REGION")]
    pub s3_region: String,

    /// Also verify that this original key exists.
    #[arg(long)]
    pub test_key: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
