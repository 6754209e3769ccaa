//! API integration tests for the origin transform route.
//!
//! Tests verify:
//! - Resized and re-encoded responses with their headers
//! - Original passthrough
//! - Oversize redirects
//! - Error cases (missing source, invalid path, corrupt source, store outage)

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;

use image_delivery::error::IoError;
use image_delivery::io::StoredObject;
use image_delivery::{ImageTransformer, Operations, OutputFormat, TransformConfig};

use super::test_utils::{
    create_noisy_jpeg, create_test_gif, create_test_jpeg, create_test_png, create_test_svg,
    decoded_dimensions, harness, is_gif, is_jpeg, is_png, is_webp, originals_with_cat,
    MockObjectStore,
};

async fn get(router: &axum::Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header<'a>(response: &'a Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let h = harness(MockObjectStore::new(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}

// =============================================================================
// Successful Transforms
// =============================================================================

#[tokio::test]
async fn test_resize_returns_image_with_headers() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/cat.jpg/quality=80,width=200").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/jpeg");
    assert_eq!(header(&response, "cache-control"), "public, max-age=31536000");
    assert_eq!(header(&response, "x-cache-write"), "stored");
    assert!(header(&response, "etag").starts_with('"'));

    let timing = header(&response, "server-timing").to_string();
    assert!(timing.contains("fetch;dur="));
    assert!(timing.contains("transform;dur="));
    assert!(timing.contains("store;dur="));

    let body = body_bytes(response).await;
    assert!(is_jpeg(&body));
    assert_eq!(decoded_dimensions(&body), (200, 100));
}

#[tokio::test]
async fn test_resize_writes_through_with_cache_control() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/cat.jpg/quality=80,height=50").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;

    let stored = h
        .transformed
        .object("img/cat.jpg/quality=80,height=50")
        .expect("variant should be written through");
    assert_eq!(stored.data, body);
    assert_eq!(stored.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(
        stored.cache_control.as_deref(),
        Some("public, max-age=31536000")
    );
}

#[tokio::test]
async fn test_never_enlarges() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/cat.jpg/width=4000,height=4000").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert_eq!(decoded_dimensions(&body), (400, 200));
}

#[tokio::test]
async fn test_format_conversion() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/cat.jpg/format=webp,quality=60,width=100").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/webp");
    let body = body_bytes(response).await;
    assert!(is_webp(&body));
    assert_eq!(decoded_dimensions(&body), (100, 50));

    let response = get(&h.router, "/transform/img/cat.jpg/format=png").await;
    assert_eq!(header(&response, "content-type"), "image/png");
    assert!(is_png(&body_bytes(response).await));
}

#[tokio::test]
async fn test_png_source_keeps_format() {
    let originals = MockObjectStore::new().with_object(
        "icons/logo.png",
        StoredObject::new(create_test_png(64, 64)).with_content_type("image/png"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/icons/logo.png/width=32").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/png");
    let body = body_bytes(response).await;
    assert_eq!(decoded_dimensions(&body), (32, 32));
}

#[tokio::test]
async fn test_animated_gif_stays_animated() {
    let originals = MockObjectStore::new().with_object(
        "anim/spin.gif",
        StoredObject::new(create_test_gif(40, 20, 3)).with_content_type("image/gif"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/anim/spin.gif/width=20").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/gif");

    let body = body_bytes(response).await;
    assert!(is_gif(&body));

    let decoder = image::codecs::gif::GifDecoder::new(std::io::Cursor::new(body.to_vec())).unwrap();
    let frames = image::AnimationDecoder::into_frames(decoder)
        .collect_frames()
        .unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].buffer().dimensions(), (20, 10));
}

#[tokio::test]
async fn test_svg_renders_to_png_by_default() {
    let originals = MockObjectStore::new().with_object(
        "vector/badge.svg",
        StoredObject::new(create_test_svg(100, 50)).with_content_type("image/svg+xml"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/vector/badge.svg/width=40").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/png");
    let body = body_bytes(response).await;
    assert_eq!(decoded_dimensions(&body), (40, 20));
}

#[tokio::test]
async fn test_original_passthrough() {
    let source = create_test_jpeg(40, 20);
    let originals = MockObjectStore::new().with_object(
        "img/small.jpg",
        StoredObject::new(source.clone()).with_content_type("image/jpeg"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/small.jpg/original").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/jpeg");
    assert_eq!(header(&response, "x-cache-write"), "skipped");
    assert_eq!(body_bytes(response).await.as_ref(), source.as_slice());

    // Passthrough is not a cache fill
    assert_eq!(h.transformed.put_count(), 0);
}

#[tokio::test]
async fn test_cache_write_failure_still_serves() {
    let transformed =
        MockObjectStore::new().with_put_error(IoError::Forbidden("read-only bucket".to_string()));
    let h = harness(originals_with_cat(), transformed, TransformConfig::default());

    let response = get(&h.router, "/transform/img/cat.jpg/quality=80,width=100").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache-write"), "failed");
    assert!(is_jpeg(&body_bytes(response).await));
    assert_eq!(h.transformed.put_count(), 1);
}

// =============================================================================
// Oversize Redirect
// =============================================================================

#[tokio::test]
async fn test_oversize_output_redirects() {
    let originals = MockObjectStore::new().with_object(
        "img/noise.jpg",
        StoredObject::new(create_noisy_jpeg(256, 256)).with_content_type("image/jpeg"),
    );
    let config = TransformConfig::default()
        .with_max_payload_bytes(1024)
        .with_redirect_base("https://img.example.com");
    let h = harness(originals, MockObjectStore::new(), config);

    let response = get(&h.router, "/transform/img/noise.jpg/quality=90,width=200").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header(&response, "location"),
        "https://img.example.com/img/noise.jpg?q=90&w=200"
    );
    assert_eq!(header(&response, "cache-control"), "private, no-store");
    assert!(body_bytes(response).await.is_empty());

    // The oversized bytes still land in the transformed store
    let stored = h
        .transformed
        .object("img/noise.jpg/quality=90,width=200")
        .expect("oversized variant should be written");
    assert!(stored.len() > 1024);
}

#[tokio::test]
async fn test_oversize_redirect_survives_write_failure() {
    let originals = MockObjectStore::new().with_object(
        "img/noise.jpg",
        StoredObject::new(create_noisy_jpeg(256, 256)).with_content_type("image/jpeg"),
    );
    let transformed =
        MockObjectStore::new().with_put_error(IoError::S3("InternalError".to_string()));
    let config = TransformConfig::default().with_max_payload_bytes(1024);
    let h = harness(originals, transformed, config);

    let response = get(&h.router, "/transform/img/noise.jpg/width=200").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(header(&response, "location"), "/img/noise.jpg?w=200");
    assert_eq!(header(&response, "x-cache-write"), "failed");
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_missing_source_is_404() {
    let h = harness(MockObjectStore::new(), MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/none.jpg/width=10").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_source_outage_is_500() {
    let originals =
        MockObjectStore::new().with_get_error(IoError::Connection("reset by peer".to_string()));
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/cat.jpg/width=10").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "source_fetch_failed");
}

#[tokio::test]
async fn test_corrupt_source_is_500() {
    let mut data = create_test_jpeg(64, 64);
    data.truncate(40);
    let originals = MockObjectStore::new().with_object(
        "img/broken.jpg",
        StoredObject::new(data).with_content_type("image/jpeg"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/broken.jpg/width=10").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "decode_error");

    // Nothing is cached for a failed transform
    assert_eq!(h.transformed.put_count(), 0);
}

#[tokio::test]
async fn test_decode_budget_is_enforced() {
    let originals = MockObjectStore::new()
        .with_object(
            "img/big.png",
            StoredObject::new(create_test_png(1000, 1000)).with_content_type("image/png"),
        )
        .with_object(
            "img/big.svg",
            StoredObject::new(create_test_svg(2000, 2000)).with_content_type("image/svg+xml"),
        );
    let config = TransformConfig::default().with_max_decode_bytes(1024 * 1024);
    let h = harness(originals, MockObjectStore::new(), config);

    for uri in [
        "/transform/img/big.png/width=10",
        "/transform/img/big.svg/format=png",
    ] {
        let response = get(&h.router, uri).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "uri: {}", uri);
        let json = body_json(response).await;
        assert_eq!(json["error"], "decode_error", "uri: {}", uri);
    }

    // A small render of the vector stays inside the budget
    let response = get(&h.router, "/transform/img/big.svg/format=png,width=100").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.transformed.put_count(), 1);
}

#[tokio::test]
async fn test_avif_source_is_unsupported() {
    let ops = Operations::new(Some(OutputFormat::Avif), None, None, None).unwrap();
    let avif = ImageTransformer::default()
        .transform(&create_test_jpeg(16, 16), None, &ops)
        .unwrap();
    let originals = MockObjectStore::new().with_object(
        "img/photo.avif",
        StoredObject::new(avif.data).with_content_type("image/avif"),
    );
    let h = harness(originals, MockObjectStore::new(), TransformConfig::default());

    let response = get(&h.router, "/transform/img/photo.avif/width=8").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported");
    assert_eq!(h.transformed.put_count(), 0);
}

#[tokio::test]
async fn test_invalid_descriptors_are_400() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    for uri in [
        "/transform/img/cat.jpg/width=200,quality=80",
        "/transform/img/cat.jpg/width=0",
        "/transform/img/cat.jpg/width=9000",
        "/transform/img/cat.jpg/format=bmp",
        "/transform/img/cat.jpg/",
        "/transform/original",
    ] {
        let response = get(&h.router, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {}", uri);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_path", "uri: {}", uri);
    }

    // Rejected before any storage access
    assert_eq!(h.originals.get_count(), 0);
}

#[tokio::test]
async fn test_only_reads_are_routed() {
    let h = harness(originals_with_cat(), MockObjectStore::new(), TransformConfig::default());

    let request = Request::builder()
        .method("POST")
        .uri("/transform/img/cat.jpg/width=10")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
