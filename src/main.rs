//! Image Delivery - on-demand image transformation behind a cache.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_delivery::{
    config::{CheckConfig, Cli, Command, NormalizeConfig, ServeConfig},
    create_s3_client,
    delivery::DeliveryRouter,
    descriptor::CanonicalPath,
    edge::Normalizer,
    server::{create_router, RouterConfig},
    transform::TransformService,
    S3ObjectStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Normalize(config) => run_normalize(config),
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let (normalizer_config, transform_config) =
        match (config.normalizer_config(), config.transform_config()) {
            (Ok(n), Ok(t)) => (n, t),
            (Err(e), _) | (_, Err(e)) => {
                error!("Configuration error: {}", e);
                return ExitCode::FAILURE;
            }
        };

    print_banner();

    info!("Configuration:");
    info!("  Originals bucket: {}", config.original_bucket);
    info!("  Transformed bucket: {}", config.transformed_bucket);
    if let Some(ref endpoint) = config.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", config.s3_region);
    info!(
        "  Limits: {}x{} max, default quality {}, {}KB inline payload",
        config.max_width,
        config.max_height,
        config.default_quality,
        config.max_payload_bytes / 1024
    );
    info!(
        "  Cache-Control: public, max-age={}",
        config.cache_max_age
    );
    if let Some(ref base) = config.redirect_base {
        info!("  Redirect base: {}", base);
    }
    if config.edge_enabled {
        info!(
            "  Edge: enabled ({}MB response cache, soft-miss {:?})",
            config.edge_cache_bytes / (1024 * 1024),
            config.soft_miss_statuses
        );
    } else {
        warn!("  Edge: DISABLED - only /transform/* is served");
    }

    // Create S3 client
    let s3_client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;

    // Test S3 connectivity
    info!("");
    info!("Connecting to S3...");
    for bucket in [&config.original_bucket, &config.transformed_bucket] {
        if let Err(e) = test_s3_connection(&s3_client, bucket).await {
            error!("  Failed to access bucket '{}': {}", bucket, e);
            error!("");
            error!("  Please check:");
            error!("    - Your AWS credentials are configured correctly");
            error!("    - The bucket '{}' exists and is accessible", bucket);
            error!("    - The S3 endpoint is correct (if using MinIO/custom S3)");
            return ExitCode::FAILURE;
        }
        info!("  Bucket '{}': ok", bucket);
    }

    let originals = Arc::new(S3ObjectStore::new(
        s3_client.clone(),
        config.original_bucket.clone(),
    ));
    let transformed = Arc::new(S3ObjectStore::new(
        s3_client,
        config.transformed_bucket.clone(),
    ));

    let transform = Arc::new(TransformService::with_shared_stores(
        originals,
        transformed,
        transform_config,
    ));

    let delivery = config.edge_enabled.then(|| {
        Arc::new(DeliveryRouter::new(
            Normalizer::new(normalizer_config),
            Arc::clone(&transform),
            config.delivery_config(),
        ))
    });

    let router = create_router(transform, delivery, build_router_config(&config));

    // Bind and serve
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl -I http://{}/transform/<key>/width=200", addr);
    if config.edge_enabled {
        info!("    curl -I 'http://{}/<key>?w=200&f=auto'", addr);
    }
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("  image-delivery v{}", version);
    info!("  on-demand resize and re-encode over S3");
    info!("");
}

/// Test that a bucket is reachable.
async fn test_s3_connection(client: &aws_sdk_s3::Client, bucket: &str) -> Result<(), String> {
    client
        .head_bucket()
        .bucket(bucket)
        .send()
        .await
        .map(|_| ())
        .map_err(|e| format!("{}", e))
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "image_delivery=debug,tower_http=debug"
    } else {
        "image_delivery=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new();

    // Apply CORS origins
    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    // Apply tracing setting
    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Normalize Command
// =============================================================================

fn run_normalize(config: NormalizeConfig) -> ExitCode {
    let normalizer_config = match config.normalizer_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (path, query) = config.path_and_query();
    let normalizer = Normalizer::new(normalizer_config);
    let canonical = normalizer.normalize_query(path, query, config.accept.as_deref());

    println!("{}", canonical);
    match CanonicalPath::parse(&canonical) {
        Ok(parsed) => {
            println!("  original key:    {}", parsed.source_key());
            println!("  transformed key: {}", parsed.store_key());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: not a valid resource path ({})", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    // Initialize minimal logging for check command
    if config.verbose {
        init_logging(true);
    }

    println!("Image Delivery Configuration Check");
    println!("══════════════════════════════════");
    println!();

    if config.original_bucket.is_empty() || config.transformed_bucket.is_empty() {
        println!("✗ Both --original-bucket and --transformed-bucket are required");
        return ExitCode::FAILURE;
    }

    println!("✓ Originals bucket: {}", config.original_bucket);
    println!("✓ Transformed bucket: {}", config.transformed_bucket);
    if let Some(ref endpoint) = config.s3_endpoint {
        println!("✓ Endpoint: {}", endpoint);
    }
    println!("✓ Region: {}", config.s3_region);
    println!();

    let s3_client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;

    for bucket in [&config.original_bucket, &config.transformed_bucket] {
        print!("Testing bucket '{}'... ", bucket);

        if let Err(e) = test_s3_connection(&s3_client, bucket).await {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check:");
            println!("  - Your AWS credentials are configured correctly");
            println!("  - The bucket '{}' exists and is accessible", bucket);
            if config.s3_endpoint.is_some() {
                println!("  - The S3 endpoint is correct and reachable");
            }
            return ExitCode::FAILURE;
        }
        println!("✓ success");
    }

    // Test specific original if requested
    if let Some(ref key) = config.test_key {
        println!();
        print!("Testing original '{}'... ", key);

        match s3_client
            .head_object()
            .bucket(&config.original_bucket)
            .key(key.trim_start_matches('/'))
            .send()
            .await
        {
            Ok(result) => {
                println!("✓ found");
                if let Some(size) = result.content_length() {
                    let size_mb = size as f64 / (1024.0 * 1024.0);
                    println!("  Size: {:.2} MB", size_mb);
                }
                if let Some(content_type) = result.content_type() {
                    println!("  Content-Type: {}", content_type);
                }
            }
            Err(_) => {
                println!("✗ not found");
                println!();
                println!(
                    "  The key '{}' does not exist in bucket '{}'.",
                    key, config.original_bucket
                );
                return ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!("══════════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
