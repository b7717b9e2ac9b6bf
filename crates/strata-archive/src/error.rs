use thiserror::Error;

/// Errors from archive reading and writing.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid archive magic: expected {expected:#010x}, got {actual:#010x}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u32),

    #[error("malformed archive document: {0}")]
    InvalidDocument(String),

    #[error("missing field: {field}")]
    MissingField { field: String },

    #[error("invalid value for field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("enum value {value} out of range for field {field} ({count} variants)")]
    EnumOutOfRange {
        field: String,
        value: u64,
        count: usize,
    },

    #[error("unknown enum name {name:?} for field {field}")]
    UnknownEnumName { field: String, name: String },

    #[error("field access outside of an object")]
    NoActiveObject,

    #[error("archive has data after its last declared object")]
    TrailingData,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "json")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "json")]
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl ArchiveError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;
