// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ssm-cloud.

use thiserror::Error;

/// Control plane errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Object storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Queried entity is absent.
    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness constraint violated.
    #[error("{0}")]
    Conflict(String),

    /// Missing or invalid credential.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Retry budget exhausted or timeout exceeded.
    #[error("{0}")]
    Terminal(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the control plane Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by the transport layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity absent.
    NotFound,
    /// Uniqueness violated.
    Conflict,
    /// Missing/invalid credential.
    AuthFailed,
    /// Malformed input.
    Validation,
    /// Recoverable fault (store, storage, network).
    Transient,
    /// Non-recoverable failure.
    Terminal,
}

impl ErrorKind {
    /// Whether the failing operation may succeed on retry.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::AuthFailed(_) => ErrorKind::AuthFailed,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Terminal(_) | Error::Config(_) => ErrorKind::Terminal,
            Error::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            Error::Database(e) if is_unique_violation(e) => ErrorKind::Conflict,
            Error::Json(_) => ErrorKind::Validation,
            _ => ErrorKind::Transient,
        }
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::AuthFailed => 401,
            ErrorKind::Validation => 400,
            ErrorKind::Transient | ErrorKind::Terminal => 500,
        }
    }

    /// Map a unique-constraint violation to [`Error::Conflict`] with `message`.
    pub fn conflict_on_unique(err: sqlx::Error, message: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            Error::Conflict(message.into())
        } else {
            Error::Database(err)
        }
    }
}

/// Whether a database error is a PostgreSQL unique violation (23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::NotFound => tonic::Status::not_found(message),
            ErrorKind::Conflict => tonic::Status::already_exists(message),
            ErrorKind::AuthFailed => tonic::Status::unauthenticated(message),
            ErrorKind::Validation => tonic::Status::invalid_argument(message),
            ErrorKind::Transient | ErrorKind::Terminal => tonic::Status::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::NotFound("agent".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::Conflict("dup".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::Database(sqlx::Error::RowNotFound).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Transient
        );
        assert!(Error::Storage("boom".into()).kind().is_transient());
        assert!(!Error::Terminal("timeout".into()).kind().is_transient());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Error::NotFound("x".into()).http_status(), 404);
        assert_eq!(Error::Conflict("x".into()).http_status(), 409);
        assert_eq!(Error::AuthFailed("x".into()).http_status(), 401);
        assert_eq!(Error::Validation("x".into()).http_status(), 400);
        assert_eq!(Error::Other("x".into()).http_status(), 500);
    }

    #[test]
    fn test_tonic_status_mapping() {
        let status: tonic::Status = Error::AuthFailed("no key".into()).into();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        let status: tonic::Status = Error::NotFound("Agent".into()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "Agent not found");

        let status: tonic::Status = Error::Conflict("exists".into()).into();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);
    }

    #[test]
    fn test_conflict_on_unique_passthrough() {
        let err = Error::conflict_on_unique(sqlx::Error::PoolClosed, "dup");
        assert!(matches!(err, Error::Database(_)));
    }
}
