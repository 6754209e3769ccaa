use thiserror::Error;

/// I/O errors that can occur when talking to the object stores
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Access to the object was denied
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// The storage call did not complete in time
    #[error("Storage operation timed out: {0}")]
    Timeout(String),
}

impl IoError {
    /// HTTP status the storage origin would have answered with.
    ///
    /// The delivery router compares this against its soft-miss set to decide
    /// whether to fall through to the transform service.
    pub fn status_code(&self) -> u16 {
        match self {
            IoError::NotFound(_) => 404,
            IoError::Forbidden(_) => 403,
            IoError::S3(_) => 500,
            IoError::Connection(_) => 503,
            IoError::Timeout(_) => 504,
        }
    }
}

/// Errors raised while producing a transformed image.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// The canonical path could not be parsed or is outside the service limits
    #[error("Invalid canonical path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The original asset does not exist
    #[error("Source not found: {key}")]
    SourceNotFound { key: String },

    /// The original asset could not be fetched
    #[error("Failed to fetch source: {0}")]
    SourceFetchFailed(IoError),

    /// The original asset exceeds the configured input limit
    #[error("Source too large: {size} bytes (limit {limit})")]
    SourceTooLarge { size: usize, limit: usize },

    /// The source bytes could not be decoded
    #[error("Failed to decode image: {message}")]
    DecodeError { message: String },

    /// The output could not be encoded
    #[error("Failed to encode image: {message}")]
    EncodeError { message: String },

    /// The requested conversion is not possible for this source
    #[error("Unsupported transformation: {reason}")]
    Unsupported { reason: String },

    /// The hard wall-clock budget was exceeded
    #[error("Transformation timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl TransformError {
    /// Whether this error belongs to the "transform failed" class.
    ///
    /// These fail again on retry with the same input.
    pub fn is_transform_failure(&self) -> bool {
        matches!(
            self,
            TransformError::SourceTooLarge { .. }
                | TransformError::DecodeError { .. }
                | TransformError::EncodeError { .. }
                | TransformError::Unsupported { .. }
        )
    }
}

/// Errors surfaced by the local delivery router.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The transformed-asset store failed with a status outside the soft-miss set
    #[error("Upstream storage error: {0}")]
    Upstream(IoError),

    /// The transform service failed
    #[error(transparent)]
    Transform(#[from] TransformError),
}
