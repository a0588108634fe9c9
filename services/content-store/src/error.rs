//! Error taxonomy shared by the store and its HTTP boundary.
//!
//! Every failure carries a stable machine-readable code, a human message and
//! the transport status it maps to. The core raises `UnsupportedMime`,
//! `LargeSource` and `MissingContent`; the remaining kinds belong to the
//! boundary layer but live here so both sides agree on one table.

use thiserror::Error;
use uuid::Uuid;

/// Request field that failed boundary validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    File,
    Json,
    Data,
    Name,
    Tags,
    Time,
    Token,
    Uuid,
}

/// Errors raised by content store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Source file MIME type is not accepted.")]
    UnsupportedMime,

    #[error("Source file exceeds limit.")]
    LargeSource,

    #[error("Content not found: {0}")]
    MissingContent(Uuid),

    #[error("Asset not found.")]
    MissingAsset,

    #[error("Resource not found.")]
    MissingResource,

    #[error("Invalid field: {0:?}")]
    InvalidField(Field),

    #[error("Access unauthorized.")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed catalog row: {0}")]
    Corrupt(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Stable code string reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedMime => "UNSUPPORTED_MIME",
            Self::LargeSource => "LARGE_SOURCE",
            Self::MissingContent(_) => "MISSING_CONTENT",
            Self::MissingAsset => "MISSING_ASSET",
            Self::MissingResource => "MISSING_RESOURCE",
            Self::InvalidField(field) => match field {
                Field::File => "BAD_FILE",
                Field::Json => "BAD_JSON",
                Field::Data => "INVALID_DATA",
                Field::Name => "INVALID_NAME",
                Field::Tags => "INVALID_TAGS",
                Field::Time => "INVALID_TIME",
                Field::Token => "INVALID_TOKEN",
                Field::Uuid => "INVALID_UUID",
            },
            Self::Unauthorized => "UNAUTHORIZED_TOKEN",
            Self::Database(_) | Self::Io(_) | Self::Corrupt(_) | Self::Task(_) => "SERVER_ERROR",
        }
    }

    /// Transport status code for this failure.
    pub fn status(&self) -> u16 {
        match self {
            Self::UnsupportedMime => 415,
            Self::LargeSource => 413,
            Self::MissingContent(_) | Self::MissingAsset | Self::MissingResource => 404,
            Self::InvalidField(_) => 400,
            Self::Unauthorized => 401,
            Self::Database(_) | Self::Io(_) | Self::Corrupt(_) | Self::Task(_) => 500,
        }
    }

    /// Client-facing message. Internal failures never leak their details.
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnsupportedMime => "Source file MIME type is not accepted.",
            Self::LargeSource => "Source file exceeds limit.",
            Self::MissingContent(_) => "Content not found.",
            Self::MissingAsset => "Asset not found.",
            Self::MissingResource => "Resource not found.",
            Self::InvalidField(field) => match field {
                Field::File => "File is not a valid blob.",
                Field::Json => "JSON is structurally invalid or contains missing fields.",
                Field::Data => "Invalid or missing 'data' field in JSON.",
                Field::Name => "Invalid or missing 'name' field in JSON.",
                Field::Tags => "Invalid or missing 'tags' field in JSON.",
                Field::Time => "Invalid or missing 'time' field in JSON.",
                Field::Token => "Invalid or missing 'token' field in JSON.",
                Field::Uuid => "Invalid or missing 'uuid' field in JSON.",
            },
            Self::Unauthorized => "Access unauthorized.",
            Self::Database(_) | Self::Io(_) | Self::Corrupt(_) | Self::Task(_) => {
                "Internal server error."
            }
        }
    }

    /// Whether this failure is an internal fault rather than a client error.
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        assert_eq!(StoreError::UnsupportedMime.status(), 415);
        assert_eq!(StoreError::LargeSource.code(), "LARGE_SOURCE");
        assert_eq!(StoreError::LargeSource.status(), 413);

        let missing = StoreError::MissingContent(Uuid::nil());
        assert_eq!(missing.code(), "MISSING_CONTENT");
        assert_eq!(missing.status(), 404);
    }

    #[test]
    fn test_invalid_field_codes() {
        assert_eq!(StoreError::InvalidField(Field::File).code(), "BAD_FILE");
        assert_eq!(StoreError::InvalidField(Field::Json).code(), "BAD_JSON");
        assert_eq!(StoreError::InvalidField(Field::Time).code(), "INVALID_TIME");
        assert_eq!(StoreError::InvalidField(Field::Tags).status(), 400);
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err = StoreError::Io(std::io::Error::other("disk on fire"));
        assert_eq!(err.code(), "SERVER_ERROR");
        assert_eq!(err.message(), "Internal server error.");
        assert!(err.is_server_error());
        assert!(!StoreError::Unauthorized.is_server_error());
    }
}
