//! Error types for the sitegraft migration engine.

use thiserror::Error;

/// Result type alias using sitegraft's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for migration operations.
///
/// Only [`Error::Connection`] and [`Error::Config`] abort a run; every
/// other class is accumulated into the run summary and reported back to
/// the caller. See [`Error::is_fatal`].
#[derive(Error, Debug)]
pub enum Error {
    /// Remote source unreachable or authentication failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed filter or statement preparation failure.
    #[error("Query error: {0}")]
    Query(String),

    /// Missing or invalid configuration, surfaced before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single row's create/update/hook/resolve step failed.
    #[error("Row error (source {source_id}): {message}")]
    Row { source_id: i64, message: String },

    /// Attachment or file not found under any candidate path.
    #[error("Resource missing: {0}")]
    ResourceMissing(String),

    /// Database operation failed (wraps sqlx::Error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed.
    #[error("Request error: {0}")]
    Request(String),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error aborts the whole run.
    ///
    /// Connection and configuration failures are fatal; pool acquisition
    /// and protocol-level database errors are treated as connection-level.
    /// Everything else is recorded per row/resource and the run continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Config(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
            ),
            _ => false,
        }
    }

    /// Shorthand for a per-row error.
    pub fn row(source_id: i64, message: impl Into<String>) -> Self {
        Error::Row {
            source_id,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connection() {
        let err = Error::Connection("host unreachable".to_string());
        assert_eq!(err.to_string(), "Connection error: host unreachable");
    }

    #[test]
    fn test_error_display_query() {
        let err = Error::Query("prepare failed".to_string());
        assert_eq!(err.to_string(), "Query error: prepare failed");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing database name".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing database name");
    }

    #[test]
    fn test_error_display_row() {
        let err = Error::row(42, "hook failed");
        assert_eq!(err.to_string(), "Row error (source 42): hook failed");
    }

    #[test]
    fn test_error_display_resource_missing() {
        let err = Error::ResourceMissing("2024/01/x.jpg".to_string());
        assert_eq!(err.to_string(), "Resource missing: 2024/01/x.jpg");
    }

    #[test]
    fn test_connection_is_fatal() {
        assert!(Error::Connection("down".into()).is_fatal());
        assert!(Error::Config("bad".into()).is_fatal());
    }

    #[test]
    fn test_row_errors_are_not_fatal() {
        assert!(!Error::row(1, "boom").is_fatal());
        assert!(!Error::ResourceMissing("f".into()).is_fatal());
        assert!(!Error::Query("q".into()).is_fatal());
    }

    #[test]
    fn test_pool_timeout_is_fatal() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_fatal());
    }

    #[test]
    fn test_row_not_found_is_not_fatal() {
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_fatal());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
