//! Edge-tier request normalization.
//!
//! Runs before any cache lookup and rewrites `GET <path>?f=&w=&h=&q=` into the
//! canonical path `<path>/<descriptor>`:
//!
//! ```text
//!   /img/cat.jpg?h=100&w=200&utm=x          Accept: image/webp
//!                  │
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │               Normalizer                │
//! │  params: validate, clamp, drop unknown  │
//! │  f=auto: negotiate against Accept       │
//! └────────────────────┬────────────────────┘
//!                      ▼
//!   /img/cat.jpg/quality=80,width=200,height=100
//! ```

mod normalizer;
mod params;

pub use normalizer::{
    keeps_quality, Normalizer, NormalizerConfig, DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY,
};
pub use params::{
    negotiate_format, parse_dimension, parse_format, parse_positive, parse_quality, FormatParam,
};
