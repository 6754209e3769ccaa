//! Validation helpers for untrusted edge query parameters.
//!
//! Every helper returns `None` for values that should be dropped. None of
//! them can fail the request.

use std::num::NonZeroU32;

use crate::descriptor::{OutputFormat, Quality};

/// Value of the `f` parameter before content negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatParam {
    /// Pick the best format the client accepts
    Auto,
    /// A concrete format
    Explicit(OutputFormat),
}

/// Parse the `f` parameter against the allow-list (case-insensitive).
pub fn parse_format(value: &str) -> Option<FormatParam> {
    let token = value.trim().to_ascii_lowercase();
    if token == "auto" {
        return Some(FormatParam::Auto);
    }
    OutputFormat::from_token(&token).map(FormatParam::Explicit)
}

/// Resolve `f=auto` from an `Accept` header.
///
/// AVIF wins over WebP; anything else falls back to JPEG.
pub fn negotiate_format(accept: Option<&str>) -> OutputFormat {
    let accept = accept.unwrap_or_default().to_ascii_lowercase();
    if accept.contains("avif") {
        OutputFormat::Avif
    } else if accept.contains("webp") {
        OutputFormat::Webp
    } else {
        OutputFormat::Jpeg
    }
}

/// Parse a positive integer, saturating on overflow.
///
/// Returns `None` for empty, signed-negative, fractional or non-numeric input
/// and for zero. A digit string too long for `u64` saturates so that it still
/// clamps to the policy maximum.
pub fn parse_positive(value: &str) -> Option<u64> {
    let value = value.trim();
    let digits = value.strip_prefix('+').unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let parsed = digits.parse::<u64>().unwrap_or(u64::MAX);
    (parsed > 0).then_some(parsed)
}

/// Parse a width or height and clamp it to `max`.
pub fn parse_dimension(value: &str, max: NonZeroU32) -> Option<NonZeroU32> {
    let parsed = parse_positive(value)?;
    let clamped = parsed.min(max.get() as u64) as u32;
    NonZeroU32::new(clamped)
}

/// Parse a quality value, clamping values above 100.
pub fn parse_quality(value: &str) -> Option<Quality> {
    parse_positive(value).and_then(Quality::clamped)
}
