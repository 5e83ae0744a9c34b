//! Error types for cube loading and spectral extraction.

use thiserror::Error;

/// Errors that can occur while loading, calibrating or sampling a cube.
#[derive(Error, Debug)]
pub enum HsiError {
    /// Operation needs state that has not been loaded yet
    #[error("Uninitialized state: {0}")]
    UninitializedState(String),

    /// Header is missing dimensions or declares zero-sized ones
    #[error("Invalid metadata: {message}")]
    InvalidMetadata {
        /// Description of the metadata problem
        message: String,
    },

    /// Byte buffer is not word aligned or shorter than the declared cube
    #[error("Malformed buffer: {message}")]
    MalformedBuffer {
        /// Description of the buffer problem
        message: String,
    },

    /// Band or pixel index outside the declared cube
    #[error("Invalid {kind} index {index} (limit {limit})")]
    InvalidIndex {
        /// What was indexed ("band", "line", "sample")
        kind: &'static str,
        /// The offending index
        index: i64,
        /// Exclusive upper bound
        limit: usize,
    },

    /// Annotation type code not recognised
    #[error("Unknown annotation type: {0}")]
    UnknownAnnotationKind(i64),

    /// Annotation geometry does not fit its shape kind
    #[error("Invalid geometry for annotation '{label}': {message}")]
    InvalidGeometry {
        /// Label of the annotation
        label: String,
        /// Description of the geometry problem
        message: String,
    },

    /// Annotation produced no pixels inside the cube
    #[error("Annotation '{label}' covers no pixels inside the cube")]
    EmptyRegion {
        /// Label of the annotation
        label: String,
    },

    /// Required header field is absent
    #[error("Missing required field: {field}")]
    MissingField {
        /// Name of the missing field
        field: String,
    },

    /// Header field exists but holds a different value type
    #[error("Field '{field}' is not a {expected}")]
    MetadataType {
        /// Name of the field
        field: String,
        /// Expected value type
        expected: &'static str,
    },

    /// I/O error from the backing store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HsiError {
    /// Create an invalid metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
        }
    }

    /// Create a malformed buffer error.
    pub fn malformed_buffer(message: impl Into<String>) -> Self {
        Self::MalformedBuffer {
            message: message.into(),
        }
    }

    /// Create an invalid index error.
    pub fn invalid_index(kind: &'static str, index: i64, limit: usize) -> Self {
        Self::InvalidIndex { kind, index, limit }
    }

    /// Create an invalid geometry error.
    pub fn invalid_geometry(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            label: label.into(),
            message: message.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create a metadata type mismatch error.
    pub fn metadata_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self::MetadataType {
            field: field.into(),
            expected,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HsiError>;
