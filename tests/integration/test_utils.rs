//! Test utilities for integration tests.
//!
//! Provides an in-memory object store with request tracking and failure
//! injection, plus helpers for building small source images.

use async_trait::async_trait;
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{Delay, Frame, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image_delivery::error::IoError;
use image_delivery::io::{ObjectStore, StoredObject};
use image_delivery::{
    create_router, DeliveryConfig, DeliveryRouter, Normalizer, RouterConfig, TransformConfig,
    TransformService,
};

// =============================================================================
// Mock Object Store
// =============================================================================

/// An in-memory object store that counts requests and can simulate failures.
///
/// Clones share the same objects and counters, so a test can keep a handle
/// after moving a clone into the service.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    get_error: Option<IoError>,
    put_error: Option<IoError>,
    gets: Arc<AtomicUsize>,
    puts: Arc<AtomicUsize>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, object: StoredObject) -> Self {
        self.insert(key, object);
        self
    }

    /// Every `get` fails with this error.
    pub fn with_get_error(mut self, error: IoError) -> Self {
        self.get_error = Some(error);
        self
    }

    /// Every `put` fails with this error.
    pub fn with_put_error(mut self, error: IoError) -> Self {
        self.put_error = Some(error);
        self
    }

    pub fn insert(&self, key: &str, object: StoredObject) {
        self.objects.lock().unwrap().insert(key.to_string(), object);
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, IoError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.get_error {
            return Err(e.clone());
        }
        // Let concurrent requests overlap
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.object(key)
            .ok_or_else(|| IoError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, object: StoredObject) -> Result<(), IoError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.put_error {
            return Err(e.clone());
        }
        self.insert(key, object);
        Ok(())
    }

    fn identifier(&self) -> &str {
        "mock://store"
    }
}

// =============================================================================
// Service Builders
// =============================================================================

/// Everything a test needs to drive the HTTP surface and inspect the stores.
pub struct TestHarness {
    pub router: axum::Router,
    pub originals: MockObjectStore,
    pub transformed: MockObjectStore,
}

/// Build a router over the given stores with the delivery routes mounted.
pub fn harness(
    originals: MockObjectStore,
    transformed: MockObjectStore,
    config: TransformConfig,
) -> TestHarness {
    harness_with_delivery(originals, transformed, config, DeliveryConfig::default())
}

pub fn harness_with_delivery(
    originals: MockObjectStore,
    transformed: MockObjectStore,
    config: TransformConfig,
    delivery_config: DeliveryConfig,
) -> TestHarness {
    let service = Arc::new(TransformService::new(
        originals.clone(),
        transformed.clone(),
        config,
    ));
    let delivery = Arc::new(DeliveryRouter::new(
        Normalizer::default(),
        Arc::clone(&service),
        delivery_config,
    ));
    let router = create_router(service, Some(delivery), RouterConfig::new().with_tracing(false));

    TestHarness {
        router,
        originals,
        transformed,
    }
}

/// Originals store holding a 400x200 JPEG at `img/cat.jpg`.
pub fn originals_with_cat() -> MockObjectStore {
    MockObjectStore::new().with_object(
        "img/cat.jpg",
        StoredObject::new(create_test_jpeg(400, 200)).with_content_type("image/jpeg"),
    )
}

// =============================================================================
// Image Builders
// =============================================================================

/// Gradient JPEG of the given size.
pub fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&img)
        .unwrap();
    buf
}

/// Semi-transparent PNG of the given size.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, ((x * y) % 256) as u8])
    });
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
    buf
}

/// Looping GIF with `frames` solid-colored frames.
pub fn create_test_gif(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        let frames = (0..frames).map(|i| {
            let shade = (i * 60 % 256) as u8;
            let img = RgbaImage::from_pixel(width, height, Rgba([shade, 0, 255 - shade, 255]));
            Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1))
        });
        encoder.encode_frames(frames).unwrap();
    }
    buf
}

/// Minimal SVG with an explicit size.
pub fn create_test_svg(width: u32, height: u32) -> Vec<u8> {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="{w}" height="{h}" fill="#3366ff"/></svg>"##,
        w = width,
        h = height
    )
    .into_bytes()
}

/// Noise JPEG that compresses poorly, for payload-limit tests.
pub fn create_noisy_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    let img = RgbImage::from_fn(width, height, |_, _| {
        // xorshift
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    });
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode_image(&img)
        .unwrap();
    buf
}

/// Decode a response body and return its dimensions.
pub fn decoded_dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).unwrap();
    (img.width(), img.height())
}

pub fn is_jpeg(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8])
}

pub fn is_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G'])
}

pub fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

pub fn is_avif(data: &[u8]) -> bool {
    data.len() >= 12 && &data[4..12] == b"ftypavif"
}

pub fn is_gif(data: &[u8]) -> bool {
    data.starts_with(b"GIF8")
}
