//! Canonical transformation descriptors.
//!
//! A descriptor is the cache-key suffix shared by the edge normalizer and the
//! transform service. It is either the sentinel `original` or a non-empty list
//! of operations serialized in the fixed field order
//! `format, quality, width, height`:
//!
//! ```text
//! <resourcePath>/original
//! <resourcePath>/format=webp,quality=80,width=200,height=100
//! ```
//!
//! [`Descriptor::serialize`] and [`Descriptor::parse`] are inverse functions:
//! `parse(serialize(d)) == d` for every descriptor that can be constructed.
//! Parsing is strict (canonical order, no duplicates, canonical integers) so
//! that exactly one spelling exists per cache entry.

use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

/// Sentinel path segment for an untransformed asset.
pub const ORIGINAL: &str = "original";

const FIELD_FORMAT: &str = "format";
const FIELD_QUALITY: &str = "quality";
const FIELD_WIDTH: &str = "width";
const FIELD_HEIGHT: &str = "height";

/// Edge query-string keys, one per field.
pub const PARAM_FORMAT: &str = "f";
pub const PARAM_QUALITY: &str = "q";
pub const PARAM_WIDTH: &str = "w";
pub const PARAM_HEIGHT: &str = "h";

/// Canonical field order. Serialization and parsing both follow it.
const FIELD_ORDER: [&str; 4] = [FIELD_FORMAT, FIELD_QUALITY, FIELD_WIDTH, FIELD_HEIGHT];

/// Reasons a descriptor or canonical path failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("empty descriptor")]
    Empty,

    #[error("missing resource path")]
    MissingResource,

    #[error("malformed field '{0}'")]
    MalformedField(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{0}' is duplicated or out of canonical order")]
    FieldOrder(String),

    #[error("invalid value '{value}' for field '{field}'")]
    InvalidValue { field: &'static str, value: String },
}

// =============================================================================
// Output Format
// =============================================================================

/// Output encodings a descriptor can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Webp,
    Avif,
    Png,
    Svg,
    Gif,
}

impl OutputFormat {
    /// All formats, in allow-list order.
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Jpeg,
        OutputFormat::Webp,
        OutputFormat::Avif,
        OutputFormat::Png,
        OutputFormat::Svg,
        OutputFormat::Gif,
    ];

    /// Lowercase token used in descriptors and query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Gif => "gif",
        }
    }

    /// Parse an exact lowercase token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == token)
    }

    /// MIME type for `Content-Type`.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Png => "image/png",
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Gif => "image/gif",
        }
    }

    /// Whether the encoder takes a quality setting.
    pub fn is_lossy(self) -> bool {
        matches!(
            self,
            OutputFormat::Jpeg | OutputFormat::Webp | OutputFormat::Avif
        )
    }

    /// Whether animated sources keep their frames in this format.
    pub fn supports_animation(self) -> bool {
        matches!(self, OutputFormat::Gif)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Quality
// =============================================================================

/// Encoder quality in the range 1-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quality(u8);

impl Quality {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    /// Accept a quality only if it is already in range.
    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN && value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Clamp values above 100 down to 100; zero is not a quality.
    pub fn clamped(value: u64) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value.min(Self::MAX as u64) as u8))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Operations
// =============================================================================

/// A non-empty set of transformation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operations {
    format: Option<OutputFormat>,
    quality: Option<Quality>,
    width: Option<NonZeroU32>,
    height: Option<NonZeroU32>,
}

impl Operations {
    /// Build an operation set. Returns `None` when every field is absent,
    /// since such a request is the `original` variant.
    pub fn new(
        format: Option<OutputFormat>,
        quality: Option<Quality>,
        width: Option<NonZeroU32>,
        height: Option<NonZeroU32>,
    ) -> Option<Self> {
        if format.is_none() && quality.is_none() && width.is_none() && height.is_none() {
            return None;
        }
        Some(Self {
            format,
            quality,
            width,
            height,
        })
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.format
    }

    pub fn quality(&self) -> Option<Quality> {
        self.quality
    }

    pub fn width(&self) -> Option<NonZeroU32> {
        self.width
    }

    pub fn height(&self) -> Option<NonZeroU32> {
        self.height
    }

    /// Whether a resize box was requested.
    pub fn has_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// `(name, value)` pairs in canonical order, omitting absent fields.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::with_capacity(4);
        if let Some(format) = self.format {
            fields.push((FIELD_FORMAT, format.as_str().to_string()));
        }
        if let Some(quality) = self.quality {
            fields.push((FIELD_QUALITY, quality.to_string()));
        }
        if let Some(width) = self.width {
            fields.push((FIELD_WIDTH, width.to_string()));
        }
        if let Some(height) = self.height {
            fields.push((FIELD_HEIGHT, height.to_string()));
        }
        fields
    }

    /// The operations as edge query parameters, which normalize back to
    /// this same operation set.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        self.fields()
            .into_iter()
            .map(|(name, value)| {
                let key = match name {
                    FIELD_FORMAT => PARAM_FORMAT,
                    FIELD_QUALITY => PARAM_QUALITY,
                    FIELD_WIDTH => PARAM_WIDTH,
                    _ => PARAM_HEIGHT,
                };
                (key, value)
            })
            .collect()
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// The transformation applied to a stored asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Descriptor {
    /// Untransformed source bytes.
    Original,

    /// Source decoded, transformed and re-encoded.
    Resized(Operations),
}

impl Descriptor {
    /// Build a descriptor from optional fields, collapsing to `Original` when empty.
    pub fn from_parts(
        format: Option<OutputFormat>,
        quality: Option<Quality>,
        width: Option<NonZeroU32>,
        height: Option<NonZeroU32>,
    ) -> Self {
        match Operations::new(format, quality, width, height) {
            Some(ops) => Descriptor::Resized(ops),
            None => Descriptor::Original,
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self, Descriptor::Original)
    }

    /// Serialize to the path-segment form.
    pub fn serialize(&self) -> String {
        match self {
            Descriptor::Original => ORIGINAL.to_string(),
            Descriptor::Resized(ops) => ops
                .fields()
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Parse the path-segment form.
    pub fn parse(segment: &str) -> Result<Self, DescriptorError> {
        if segment.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if segment == ORIGINAL {
            return Ok(Descriptor::Original);
        }

        let mut format = None;
        let mut quality = None;
        let mut width = None;
        let mut height = None;

        // Index into FIELD_ORDER of the next field allowed to appear
        let mut next_field = 0;

        for field in segment.split(',') {
            let (name, value) = field
                .split_once('=')
                .ok_or_else(|| DescriptorError::MalformedField(field.to_string()))?;

            let position = FIELD_ORDER
                .iter()
                .position(|known| *known == name)
                .ok_or_else(|| DescriptorError::UnknownField(name.to_string()))?;
            if position < next_field {
                return Err(DescriptorError::FieldOrder(name.to_string()));
            }
            next_field = position + 1;

            match position {
                0 => {
                    format = Some(OutputFormat::from_token(value).ok_or_else(|| {
                        DescriptorError::InvalidValue {
                            field: FIELD_FORMAT,
                            value: value.to_string(),
                        }
                    })?);
                }
                1 => {
                    quality = Some(
                        parse_canonical_u32(value)
                            .and_then(|q| u8::try_from(q).ok())
                            .and_then(Quality::new)
                            .ok_or_else(|| DescriptorError::InvalidValue {
                                field: FIELD_QUALITY,
                                value: value.to_string(),
                            })?,
                    );
                }
                2 => {
                    width = Some(parse_dimension(FIELD_WIDTH, value)?);
                }
                _ => {
                    height = Some(parse_dimension(FIELD_HEIGHT, value)?);
                }
            }
        }

        Operations::new(format, quality, width, height)
            .map(Descriptor::Resized)
            .ok_or(DescriptorError::Empty)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// Parse a decimal integer in canonical spelling: digits only, no leading zero.
fn parse_canonical_u32(value: &str) -> Option<u32> {
    let canonical = !value.is_empty()
        && value.bytes().all(|b| b.is_ascii_digit())
        && (value == "0" || !value.starts_with('0'));
    if canonical {
        value.parse().ok()
    } else {
        None
    }
}

fn parse_dimension(field: &'static str, value: &str) -> Result<NonZeroU32, DescriptorError> {
    parse_canonical_u32(value)
        .and_then(NonZeroU32::new)
        .ok_or_else(|| DescriptorError::InvalidValue {
            field,
            value: value.to_string(),
        })
}

// =============================================================================
// Canonical Path
// =============================================================================

/// A resource path paired with its descriptor.
///
/// The string form is `<resourcePath>/<descriptor>`, which is both the rewritten
/// edge request path and (minus leading slashes) the transformed-store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalPath {
    resource_path: String,
    descriptor: Descriptor,
}

impl CanonicalPath {
    pub fn new(resource_path: impl Into<String>, descriptor: Descriptor) -> Self {
        Self {
            resource_path: resource_path.into(),
            descriptor,
        }
    }

    /// Split a canonical path at its last segment and parse the descriptor.
    pub fn parse(path: &str) -> Result<Self, DescriptorError> {
        let (resource_path, segment) = path
            .rsplit_once('/')
            .ok_or(DescriptorError::MissingResource)?;

        if resource_path.trim_start_matches('/').is_empty() {
            return Err(DescriptorError::MissingResource);
        }

        let descriptor = Descriptor::parse(segment)?;

        Ok(Self {
            resource_path: resource_path.to_string(),
            descriptor,
        })
    }

    /// Resource path as it appeared in the request.
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Key of the original asset in the original-asset store.
    pub fn source_key(&self) -> &str {
        self.resource_path.trim_start_matches('/')
    }

    /// Key of this variant in the transformed-asset store.
    pub fn store_key(&self) -> String {
        format!("{}/{}", self.source_key(), self.descriptor)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_path, self.descriptor)
    }
}

// =============================================================================
// Tests
// =============================================================================
