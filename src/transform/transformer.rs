//! Image transformer.
//!
//! Decodes a source image, applies orientation, resize and format conversion,
//! and encodes the result.
//!
//! # Design Decisions
//!
//! - **Fit inside, never enlarge**: width/height describe a bounding box. The
//!   aspect ratio is kept and images smaller than the box are left alone.
//!
//! - **Pre-rotated output**: EXIF orientation is applied before resizing, so the
//!   box applies to the image as displayed and the stored bytes need no
//!   viewer-side rotation.
//!
//! - **Vectors are rasterized**: SVG sources are rendered to PNG unless SVG
//!   output was explicitly requested, in which case the markup is returned
//!   untouched.
//!
//! - **Animation**: animated GIF sources keep every frame when the output is
//!   GIF. Other targets get the first frame.
//!
//! - **Bounded decoding**: source dimensions are capped through
//!   [`image::Limits`], and every pixel buffer (decoded still, GIF frames, SVG
//!   canvas) is reserved against the decode byte budget before it is allocated.
//!
//! - **AVIF is output only**: the AVIF codec in use can encode but not decode, so
//!   AVIF originals are refused as unsupported.

use std::io::Cursor;
use std::num::NonZeroU32;

use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{
    AnimationDecoder, DynamicImage, Frame, ImageDecoder, ImageError, ImageFormat, ImageReader,
    Limits, RgbaImage,
};
use resvg::{tiny_skia, usvg};

use crate::descriptor::{Operations, OutputFormat, Quality};
use crate::edge::NormalizerConfig;
use crate::error::TransformError;

/// Default cap on source width and height in pixels.
pub const DEFAULT_MAX_SOURCE_DIMENSION: u32 = 16_384;

/// Default cap on decoder allocations (512MB).
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

/// rav1e speed preset (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 7;

/// Bytes per RGBA8 pixel.
const RGBA_BYTES: u64 = 4;

/// How many leading bytes to sniff for SVG markup.
const SVG_SNIFF_LEN: usize = 1024;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

// =============================================================================
// Output
// =============================================================================

/// An encoded transformation result.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Encoded bytes
    pub data: Bytes,

    /// Output encoding
    pub format: OutputFormat,

    /// Output dimensions, when the output is a raster
    pub dimensions: Option<(u32, u32)>,

    /// Number of frames written (1 for still images)
    pub frames: usize,
}

impl EncodedImage {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// What kind of source we were handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Vector,
    Raster(ImageFormat),
}

// =============================================================================
// Transformer
// =============================================================================

/// Stateless image transformer.
///
/// Cheap to clone; the service clones it into blocking tasks.
///
/// # Example
///
/// ```ignore
/// use image_delivery::transform::ImageTransformer;
///
/// let transformer = ImageTransformer::default();
/// let output = transformer.transform(&source_bytes, Some("image/jpeg"), &ops)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ImageTransformer {
    max_source_dimension: u32,
    max_decode_bytes: u64,
    default_quality: Quality,
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_SOURCE_DIMENSION,
            DEFAULT_MAX_DECODE_BYTES,
            NormalizerConfig::default().default_quality,
        )
    }
}

impl ImageTransformer {
    /// Create a transformer.
    ///
    /// # Arguments
    ///
    /// * `max_source_dimension` - Largest accepted source width or height
    /// * `max_decode_bytes` - Decoder allocation ceiling
    /// * `default_quality` - Quality for lossy output when none was requested
    pub fn new(max_source_dimension: u32, max_decode_bytes: u64, default_quality: Quality) -> Self {
        Self {
            max_source_dimension,
            max_decode_bytes,
            default_quality,
        }
    }

    /// Apply `ops` to `source`.
    ///
    /// # Errors
    ///
    /// - [`TransformError::DecodeError`] for unrecognized or corrupt input
    /// - [`TransformError::EncodeError`] if the encoder fails
    /// - [`TransformError::Unsupported`] if the requested format cannot be
    ///   produced from this source (e.g. SVG from a raster)
    pub fn transform(
        &self,
        source: &[u8],
        content_type: Option<&str>,
        ops: &Operations,
    ) -> Result<EncodedImage, TransformError> {
        let kind = detect_source(source, content_type)?;
        let output = output_format(ops, kind);
        let quality = ops.quality().unwrap_or(self.default_quality);

        match kind {
            SourceKind::Vector => self.transform_vector(source, ops, output, quality),
            SourceKind::Raster(ImageFormat::Avif) => Err(TransformError::Unsupported {
                reason: "AVIF sources cannot be decoded".to_string(),
            }),
            SourceKind::Raster(format) => {
                if output == OutputFormat::Svg {
                    return Err(TransformError::Unsupported {
                        reason: "SVG output requires an SVG source".to_string(),
                    });
                }

                if format == ImageFormat::Gif && output.supports_animation() {
                    let frames = self.decode_gif_frames(source)?;
                    if frames.len() > 1 {
                        return self.transform_animation(frames, ops);
                    }
                }

                let img = self.decode(source, format)?;
                let img = resize(img, ops.width(), ops.height());
                let data = encode(&img, output, quality)?;

                Ok(EncodedImage {
                    data,
                    format: output,
                    dimensions: Some((img.width(), img.height())),
                    frames: 1,
                })
            }
        }
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_source_dimension);
        limits.max_image_height = Some(self.max_source_dimension);
        limits.max_alloc = Some(self.max_decode_bytes);
        limits
    }

    /// Refuse a pixel buffer larger than the decode budget.
    fn reserve(&self, bytes: u64) -> Result<(), TransformError> {
        if bytes > self.max_decode_bytes {
            return Err(TransformError::DecodeError {
                message: format!(
                    "decoding needs {} bytes, limit is {}",
                    bytes, self.max_decode_bytes
                ),
            });
        }
        Ok(())
    }

    /// Decode a still image and bake in its EXIF orientation.
    fn decode(&self, source: &[u8], format: ImageFormat) -> Result<DynamicImage, TransformError> {
        let mut reader = ImageReader::with_format(Cursor::new(source), format);
        reader.limits(self.limits());

        let mut decoder = reader.into_decoder().map_err(decode_error)?;
        self.reserve(decoder.total_bytes())?;

        // A broken EXIF block is not worth failing the request over
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

        let mut img = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
        img.apply_orientation(orientation);

        Ok(img)
    }

    fn decode_gif_frames(&self, source: &[u8]) -> Result<Vec<Frame>, TransformError> {
        let mut decoder = GifDecoder::new(Cursor::new(source)).map_err(decode_error)?;
        decoder.set_limits(self.limits()).map_err(decode_error)?;

        // Every frame is composited onto a full RGBA canvas
        let (width, height) = decoder.dimensions();
        let frame_bytes = u64::from(width) * u64::from(height) * RGBA_BYTES;

        let mut frames = Vec::new();
        let mut total = 0;
        for frame in decoder.into_frames() {
            total += frame_bytes;
            self.reserve(total)?;
            frames.push(frame.map_err(decode_error)?);
        }
        Ok(frames)
    }

    /// Resize every frame of an animation to the same box and re-encode as GIF.
    fn transform_animation(
        &self,
        frames: Vec<Frame>,
        ops: &Operations,
    ) -> Result<EncodedImage, TransformError> {
        let (src_w, src_h) = frames
            .first()
            .map(|f| f.buffer().dimensions())
            .ok_or_else(|| TransformError::DecodeError {
                message: "animation has no frames".to_string(),
            })?;
        let (width, height) = fit_inside((src_w, src_h), ops.width(), ops.height());
        let needs_resize = (width, height) != (src_w, src_h);
        let frame_count = frames.len();

        let frames = frames.into_iter().map(|frame| {
            let delay = frame.delay();
            let buffer = if needs_resize {
                imageops::resize(frame.buffer(), width, height, RESIZE_FILTER)
            } else {
                frame.into_buffer()
            };
            Frame::from_parts(buffer, 0, 0, delay)
        });

        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.set_repeat(Repeat::Infinite).map_err(encode_error)?;
            encoder.encode_frames(frames).map_err(encode_error)?;
        }

        Ok(EncodedImage {
            data: Bytes::from(buf),
            format: OutputFormat::Gif,
            dimensions: Some((width, height)),
            frames: frame_count,
        })
    }

    fn transform_vector(
        &self,
        source: &[u8],
        ops: &Operations,
        output: OutputFormat,
        quality: Quality,
    ) -> Result<EncodedImage, TransformError> {
        // Vectors scale losslessly, so SVG output is the markup itself
        if output == OutputFormat::Svg {
            return Ok(EncodedImage {
                data: Bytes::copy_from_slice(source),
                format: OutputFormat::Svg,
                dimensions: None,
                frames: 1,
            });
        }

        let tree = usvg::Tree::from_data(source, &usvg::Options::default()).map_err(|e| {
            TransformError::DecodeError {
                message: format!("invalid SVG: {}", e),
            }
        })?;

        let size = tree.size();
        let intrinsic = (
            (size.width().ceil() as u32).max(1),
            (size.height().ceil() as u32).max(1),
        );

        // Keep huge intrinsic sizes inside the raster budget before applying ops
        let bounded = fit_inside(
            intrinsic,
            NonZeroU32::new(self.max_source_dimension),
            NonZeroU32::new(self.max_source_dimension),
        );
        let (width, height) = fit_inside(bounded, ops.width(), ops.height());

        // Canvas plus the demultiplied copy
        self.reserve(u64::from(width) * u64::from(height) * RGBA_BYTES * 2)?;

        let mut pixmap =
            tiny_skia::Pixmap::new(width, height).ok_or_else(|| TransformError::DecodeError {
                message: format!("cannot allocate {}x{} canvas", width, height),
            })?;
        let transform = tiny_skia::Transform::from_scale(
            width as f32 / size.width(),
            height as f32 / size.height(),
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        // tiny-skia stores premultiplied alpha
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for pixel in pixmap.pixels() {
            let c = pixel.demultiply();
            rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        let img = RgbaImage::from_raw(width, height, rgba)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| TransformError::DecodeError {
                message: "rendered SVG has unexpected buffer size".to_string(),
            })?;

        let data = encode(&img, output, quality)?;

        Ok(EncodedImage {
            data,
            format: output,
            dimensions: Some((width, height)),
            frames: 1,
        })
    }

    /// Get raster dimensions without fully decoding.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), TransformError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| TransformError::DecodeError {
                message: e.to_string(),
            })?;
        reader.into_dimensions().map_err(decode_error)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Work out what the source is from its content type and leading bytes.
pub fn detect_source(
    source: &[u8],
    content_type: Option<&str>,
) -> Result<SourceKind, TransformError> {
    let declared_svg = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("svg"))
        .unwrap_or(false);
    if declared_svg || looks_like_svg(source) {
        return Ok(SourceKind::Vector);
    }

    image::guess_format(source)
        .map(SourceKind::Raster)
        .map_err(|_| TransformError::DecodeError {
            message: "unrecognized image format".to_string(),
        })
}

fn looks_like_svg(source: &[u8]) -> bool {
    let head = &source[..source.len().min(SVG_SNIFF_LEN)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

/// Output format for a request: the requested one, or a sensible default.
///
/// Raster sources keep their format when we can both decode and encode it;
/// vectors and everything else become PNG.
pub fn output_format(ops: &Operations, source: SourceKind) -> OutputFormat {
    if let Some(format) = ops.format() {
        return format;
    }
    match source {
        SourceKind::Vector => OutputFormat::Png,
        SourceKind::Raster(ImageFormat::Jpeg) => OutputFormat::Jpeg,
        SourceKind::Raster(ImageFormat::WebP) => OutputFormat::Webp,
        SourceKind::Raster(ImageFormat::Gif) => OutputFormat::Gif,
        SourceKind::Raster(_) => OutputFormat::Png,
    }
}

/// Dimensions that fit `source` inside the optional box without enlarging.
pub fn fit_inside(
    source: (u32, u32),
    width: Option<NonZeroU32>,
    height: Option<NonZeroU32>,
) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return source;
    }

    let scale_w = width.map_or(f64::INFINITY, |w| w.get() as f64 / src_w as f64);
    let scale_h = height.map_or(f64::INFINITY, |h| h.get() as f64 / src_h as f64);
    let scale = scale_w.min(scale_h);

    if scale >= 1.0 {
        return source;
    }

    let new_w = ((src_w as f64 * scale).round() as u32).clamp(1, src_w);
    let new_h = ((src_h as f64 * scale).round() as u32).clamp(1, src_h);
    (new_w, new_h)
}

fn resize(img: DynamicImage, width: Option<NonZeroU32>, height: Option<NonZeroU32>) -> DynamicImage {
    let (new_w, new_h) = fit_inside((img.width(), img.height()), width, height);
    if (new_w, new_h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(new_w, new_h, RESIZE_FILTER)
    }
}

/// Encode a still image. `quality` only affects lossy encoders.
fn encode(img: &DynamicImage, format: OutputFormat, quality: Quality) -> Result<Bytes, TransformError> {
    let mut buf = Vec::new();

    let result = match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality.get()).encode_image(&rgb)
        }
        OutputFormat::Png => img.write_with_encoder(PngEncoder::new(&mut buf)),
        OutputFormat::Webp => {
            let rgba = img.to_rgba8();
            let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode_simple(false, f32::from(quality.get()))
                .map_err(|e| TransformError::EncodeError {
                    message: format!("webp encoding failed: {:?}", e),
                })?;
            return Ok(Bytes::copy_from_slice(&encoded));
        }
        OutputFormat::Avif => {
            let rgba = img.to_rgba8();
            rgba.write_with_encoder(AvifEncoder::new_with_speed_quality(
                &mut buf,
                AVIF_SPEED,
                quality.get(),
            ))
        }
        OutputFormat::Gif => {
            let rgba = img.to_rgba8();
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.encode_frame(Frame::new(rgba))
        }
        OutputFormat::Svg => {
            return Err(TransformError::Unsupported {
                reason: "cannot encode raster data as SVG".to_string(),
            })
        }
    };

    result.map_err(encode_error)?;
    Ok(Bytes::from(buf))
}

fn decode_error(e: ImageError) -> TransformError {
    TransformError::DecodeError {
        message: e.to_string(),
    }
}

fn encode_error(e: ImageError) -> TransformError {
    TransformError::EncodeError {
        message: e.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
