use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// An object read from or written to a store, with its HTTP metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object payload
    pub data: Bytes,

    /// `Content-Type` recorded with the object, if any
    pub content_type: Option<String>,

    /// `Cache-Control` recorded with the object, if any
    pub cache_control: Option<String>,
}

impl StoredObject {
    /// Create an object with no metadata.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            cache_control: None,
        }
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the cache-control directive.
    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Passive key/value object storage.
///
/// Both the original-asset store and the transformed-asset store implement
/// this trait. Implementations must map a missing key to [`IoError::NotFound`]
/// so callers can tell "absent" apart from "unavailable".
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object by key.
    async fn get(&self, key: &str) -> Result<StoredObject, IoError>;

    /// Store an object under a key, replacing any previous value.
    async fn put(&self, key: &str, object: StoredObject) -> Result<(), IoError>;

    /// Identifier used in logs (e.g. `s3://bucket`).
    fn identifier(&self) -> &str;
}
