//! End-to-end tests for the delivery routes.
//!
//! Tests verify:
//! - Query normalization into shared cache keys
//! - The memory, store and transform tiers and the `X-Cache` header
//! - Soft-miss fallback and upstream failures
//! - Coalescing of concurrent misses

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;

use image_delivery::error::IoError;
use image_delivery::io::StoredObject;
use image_delivery::{DeliveryConfig, TransformConfig};

use super::test_utils::{
    create_noisy_jpeg, create_test_jpeg, decoded_dimensions, harness, harness_with_delivery,
    is_avif, is_jpeg, is_webp, originals_with_cat, MockObjectStore,
};

async fn get(router: &axum::Router, uri: &str, accept: Option<&str>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(accept) = accept {
        request = request.header("accept", accept);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn x_cache(response: &Response) -> &str {
    response.headers().get("x-cache").unwrap().to_str().unwrap()
}

// =============================================================================
// Cache Tiers
// =============================================================================

#[tokio::test]
async fn test_miss_then_memory_hit() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let first = get(&h.router, "/img/cat.jpg?w=200", None).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "miss");
    let first_etag = first.headers().get("etag").cloned();
    let first_body = body_bytes(first).await;
    assert_eq!(decoded_dimensions(&first_body), (200, 100));

    let second = get(&h.router, "/img/cat.jpg?w=200", None).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "hit");
    assert_eq!(second.headers().get("etag").cloned(), first_etag);
    assert_eq!(body_bytes(second).await, first_body);

    // Second request never left the response cache
    assert_eq!(h.originals.get_count(), 1);
    assert_eq!(h.transformed.get_count(), 1);
    assert_eq!(h.transformed.keys(), vec!["img/cat.jpg/quality=80,width=200"]);
}

#[tokio::test]
async fn test_equivalent_queries_share_a_key() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let first = get(&h.router, "/img/cat.jpg?w=200&h=100&utm_source=mail", None).await;
    assert_eq!(x_cache(&first), "miss");

    for uri in [
        "/img/cat.jpg?h=100&w=200",
        "/img/cat.jpg?H=100&W=200&q=bogus",
        "/img/cat.jpg?w=50&w=200&h=100",
    ] {
        let response = get(&h.router, uri, None).await;
        assert_eq!(x_cache(&response), "hit", "uri: {}", uri);
    }

    assert_eq!(h.originals.get_count(), 1);
}

#[tokio::test]
async fn test_transformed_store_hit() {
    let stored = create_test_jpeg(50, 25);
    let transformed = MockObjectStore::new().with_object(
        "img/cat.jpg/quality=80,width=50",
        StoredObject::new(stored.clone())
            .with_content_type("image/jpeg")
            .with_cache_control("public, max-age=600"),
    );
    let h = harness(originals_with_cat(), transformed, TransformConfig::default());

    let response = get(&h.router, "/img/cat.jpg?w=50", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(x_cache(&response), "hit");
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=600"
    );
    assert_eq!(body_bytes(response).await.as_ref(), stored.as_slice());

    // The transform tier was never involved
    assert_eq!(h.originals.get_count(), 0);
}

#[tokio::test]
async fn test_invalid_params_degrade_to_original() {
    let source = create_test_jpeg(40, 20);
    let originals = MockObjectStore::new().with_object(
        "img/small.jpg",
        StoredObject::new(source.clone()).with_content_type("image/jpeg"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/img/small.jpg?w=-5&q=abc&f=tiff", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(x_cache(&response), "miss");
    assert_eq!(body_bytes(response).await.as_ref(), source.as_slice());
    assert_eq!(h.transformed.put_count(), 0);
}

#[tokio::test]
async fn test_encoded_path_segments() {
    let originals = MockObjectStore::new().with_object(
        "photos/my cat.jpg",
        StoredObject::new(create_test_jpeg(100, 100)).with_content_type("image/jpeg"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/photos/my%20cat.jpg?w=10", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h
        .transformed
        .object("photos/my cat.jpg/quality=80,width=10")
        .is_some());
}

// =============================================================================
// Content Negotiation
// =============================================================================

#[tokio::test]
async fn test_auto_format_negotiation() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/img/cat.jpg?f=auto&w=100", Some("image/webp,*/*")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/webp");
    assert!(is_webp(&body_bytes(response).await));

    let response = get(&h.router, "/img/cat.jpg?f=auto&w=100", Some("text/html")).await;
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    assert!(is_jpeg(&body_bytes(response).await));

    // Each client capability gets its own cache entry
    assert_eq!(
        h.transformed.keys(),
        vec![
            "img/cat.jpg/format=jpeg,quality=80,width=100",
            "img/cat.jpg/format=webp,quality=80,width=100",
        ]
    );
}

#[tokio::test]
async fn test_auto_format_prefers_avif() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let response = get(
        &h.router,
        "/img/cat.jpg?f=auto&w=64",
        Some("image/avif,image/webp,*/*"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/avif");
    assert!(is_avif(&body_bytes(response).await));
    assert!(h
        .transformed
        .object("img/cat.jpg/format=avif,quality=80,width=64")
        .is_some());
}

#[tokio::test]
async fn test_accept_ignored_for_explicit_format() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/img/cat.jpg?f=jpeg", Some("image/avif,image/webp")).await;
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
}

#[tokio::test]
async fn test_fixed_routes_win_over_delivery() {
    // Originals keyed like a fixed route are shadowed by it
    let originals = MockObjectStore::new().with_object(
        "health",
        StoredObject::new(create_test_jpeg(10, 10)).with_content_type("image/jpeg"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
    assert!(response.headers().get("x-cache").is_none());
    assert_eq!(h.originals.get_count(), 0);
}

// =============================================================================
// Failure Handling
// =============================================================================

#[tokio::test]
async fn test_missing_source_is_404() {
    let h = harness(MockObjectStore::new(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/img/none.jpg?w=10", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_soft_miss_status_falls_through() {
    // Unreadable keys in S3 surface as 403 for missing objects
    let transformed =
        MockObjectStore::new().with_get_error(IoError::Forbidden("AccessDenied".to_string()));
    let h = harness(originals_with_cat(), transformed, TransformConfig::default());

    let response = get(&h.router, "/img/cat.jpg?w=100", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(x_cache(&response), "miss");
}

#[tokio::test]
async fn test_hard_store_failure_is_bad_gateway() {
    let transformed =
        MockObjectStore::new().with_get_error(IoError::S3("InternalError".to_string()));
    let delivery = DeliveryConfig {
        soft_miss_statuses: vec![404],
        ..DeliveryConfig::default()
    };
    let h = harness_with_delivery(
        originals_with_cat(),
        transformed,
        TransformConfig::default(),
        delivery,
    );

    let response = get(&h.router, "/img/cat.jpg?w=100", None).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(h.originals.get_count(), 0);
}

// =============================================================================
// Redirects and Concurrency
// =============================================================================

#[tokio::test]
async fn test_redirect_target_is_served_from_store() {
    let originals = MockObjectStore::new().with_object(
        "img/noise.jpg",
        StoredObject::new(create_noisy_jpeg(256, 256)).with_content_type("image/jpeg"),
    );
    let config = TransformConfig::default().with_max_payload_bytes(1024);
    let h = harness(originals, MockObjectStore::new(), config);

    let response = get(&h.router, "/img/noise.jpg?w=200&q=90", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(x_cache(&response), "miss");
    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(location, "/img/noise.jpg?q=90&w=200");

    // Following the redirect lands on the variant written before it
    let response = get(&h.router, &location, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(x_cache(&response), "hit");
    assert!(body_bytes(response).await.len() > 1024);
    assert_eq!(h.originals.get_count(), 1);
}

#[tokio::test]
async fn test_concurrent_misses_transform_once() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let requests = (0..8).map(|_| {
        let router = h.router.clone();
        tokio::spawn(async move { get(&router, "/img/cat.jpg?w=120", None).await.status() })
    });

    for handle in requests.collect::<Vec<_>>() {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(h.originals.get_count(), 1);
    assert_eq!(h.transformed.put_count(), 1);
}
