//! Request normalizer.
//!
//! Turns a resource path plus arbitrary query parameters into the canonical
//! path used as the cache key. Runs on every edge request, so it does no I/O
//! and never fails: the worst case is the `original` variant.

use std::num::NonZeroU32;

use crate::descriptor::{
    CanonicalPath, Descriptor, OutputFormat, Quality, PARAM_FORMAT, PARAM_HEIGHT, PARAM_QUALITY,
    PARAM_WIDTH,
};

use super::params::{
    negotiate_format, parse_dimension, parse_format, parse_quality, FormatParam,
};

/// Default upper bound for `w` and `h`.
pub const DEFAULT_MAX_DIMENSION: u32 = 4000;

/// Quality injected for lossy output when `q` is omitted.
pub const DEFAULT_QUALITY: u8 = 80;

// =============================================================================
// Configuration
// =============================================================================

/// Clamping and default policy for the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Upper bound for `w`
    pub max_width: NonZeroU32,

    /// Upper bound for `h`
    pub max_height: NonZeroU32,

    /// Quality injected when `q` is omitted and the output may be lossy
    pub default_quality: Quality,
}

const DEFAULT_MAX: NonZeroU32 = match NonZeroU32::new(DEFAULT_MAX_DIMENSION) {
    Some(max) => max,
    None => panic!("DEFAULT_MAX_DIMENSION must be non-zero"),
};

const DEFAULT_Q: Quality = match Quality::new(DEFAULT_QUALITY) {
    Some(quality) => quality,
    None => panic!("DEFAULT_QUALITY must be in 1..=100"),
};

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX,
            max_height: DEFAULT_MAX,
            default_quality: DEFAULT_Q,
        }
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Edge-side parameter normalizer.
///
/// # Example
///
/// ```
/// use image_delivery::edge::Normalizer;
///
/// let normalizer = Normalizer::default();
///
/// let a = normalizer.normalize("/img/cat.jpg", [("w", "200"), ("h", "100")], None);
/// let b = normalizer.normalize("/img/cat.jpg", [("h", "100"), ("w", "200")], None);
/// assert_eq!(a, b);
/// assert_eq!(a, "/img/cat.jpg/quality=80,width=200,height=100");
///
/// let original = normalizer.normalize("/img/cat.jpg", [("utm_source", "x")], None);
/// assert_eq!(original, "/img/cat.jpg/original");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Compute the canonical path for a request.
    ///
    /// `params` are the decoded query parameters in any order; `accept` is the
    /// raw `Accept` header, consulted only for `f=auto`.
    pub fn normalize<I, K, V>(&self, resource_path: &str, params: I, accept: Option<&str>) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let descriptor = self.descriptor(params, accept);
        CanonicalPath::new(resource_path, descriptor).to_string()
    }

    /// Compute the canonical path from a raw (undecoded) query string.
    pub fn normalize_query(
        &self,
        resource_path: &str,
        raw_query: Option<&str>,
        accept: Option<&str>,
    ) -> String {
        let query = raw_query.unwrap_or_default();
        self.normalize(
            resource_path,
            url::form_urlencoded::parse(query.as_bytes()),
            accept,
        )
    }

    /// Validate parameters into a typed descriptor.
    ///
    /// Keys are matched case-insensitively; the last valid occurrence of a key
    /// wins. Unknown keys and invalid values are ignored.
    pub fn descriptor<I, K, V>(&self, params: I, accept: Option<&str>) -> Descriptor
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut format = None;
        let mut quality = None;
        let mut width = None;
        let mut height = None;

        for (key, value) in params {
            let value = value.as_ref();
            match key.as_ref().to_ascii_lowercase().as_str() {
                PARAM_FORMAT => {
                    if let Some(f) = parse_format(value) {
                        format = Some(f);
                    }
                }
                PARAM_QUALITY => {
                    if let Some(q) = parse_quality(value) {
                        quality = Some(q);
                    }
                }
                PARAM_WIDTH => {
                    if let Some(w) = parse_dimension(value, self.config.max_width) {
                        width = Some(w);
                    }
                }
                PARAM_HEIGHT => {
                    if let Some(h) = parse_dimension(value, self.config.max_height) {
                        height = Some(h);
                    }
                }
                _ => {}
            }
        }

        // Negotiate once, here, so one client capability maps to one key
        let format = format.map(|f| match f {
            FormatParam::Auto => negotiate_format(accept),
            FormatParam::Explicit(f) => f,
        });

        let descriptor = Descriptor::from_parts(format, quality, width, height);
        let Descriptor::Resized(ops) = descriptor else {
            return Descriptor::Original;
        };

        let quality = keeps_quality(ops.format())
            .then(|| ops.quality().unwrap_or(self.config.default_quality));

        Descriptor::from_parts(ops.format(), quality, ops.width(), ops.height())
    }
}

/// Whether a format takes the quality field in canonical keys.
pub fn keeps_quality(format: Option<OutputFormat>) -> bool {
    format.map_or(true, OutputFormat::is_lossy)
}

// =============================================================================
// Tests
// =============================================================================
