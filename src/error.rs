//! Error types for the Shelfmark engine
//!
//! This module provides a comprehensive error hierarchy following Rust best practices:
//! - `thiserror` for ergonomic error definitions
//! - Domain-specific error variants for actionable error handling
//! - Proper error context and source chaining
//! - HTTP status code mapping for API responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

/// Result type alias for Shelfmark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Shelfmark engine
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    #[error("Configuration error: {message}")]
    Config {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: &'static str },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig {
        key: &'static str,
        message: Cow<'static, str>,
    },

    // ========================================================================
    // Database Errors
    // ========================================================================
    #[error("Database error: {message}")]
    Database {
        message: Cow<'static, str>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Database connection pool exhausted")]
    PoolExhausted,

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: Cow<'static, str> },

    #[error("Migration error: {0}")]
    Migration(String),

    // ========================================================================
    // Validation Errors
    // ========================================================================
    #[error("User id must not be empty")]
    InvalidUserId,

    #[error("Bookmark id must be a positive integer")]
    InvalidBookmarkId,

    #[error("Unknown action type: {value}")]
    InvalidAction { value: String },

    #[error("Score {value} is outside the valid range [0, 1]")]
    InvalidScore { value: f64 },

    #[error("Unknown time window: {value}")]
    InvalidTimeWindow { value: String },

    #[error("Unknown recommendation algorithm: {value}")]
    InvalidAlgorithm { value: String },

    #[error("Unknown sync event type: {value}")]
    InvalidSyncEventType { value: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue {
        field: &'static str,
        value: String,
    },

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    // ========================================================================
    // Conflict Errors
    // ========================================================================
    #[error("Already following this user")]
    AlreadyFollowing,

    #[error("Cannot follow yourself")]
    CannotFollowSelf,

    #[error("Not following this user")]
    NotFollowing,

    #[error("Cannot fork your own collection")]
    CannotForkOwnCollection,

    #[error("Collection does not allow forking")]
    ForkNotAllowed,

    #[error("User is already a collaborator on this collection")]
    CollaboratorExists,

    #[error("Collaboration invite is not pending")]
    CollaborationNotPending,

    #[error("Share has been deactivated")]
    ShareInactive,

    // ========================================================================
    // Expiry Errors
    // ========================================================================
    #[error("Share has expired")]
    ShareExpired,

    // ========================================================================
    // Authorization Errors
    // ========================================================================
    #[error("Unauthorized: {message}")]
    Unauthorized { message: Cow<'static, str> },

    #[error("Forbidden: {message}")]
    Forbidden { message: Cow<'static, str> },

    #[error("Share password does not match")]
    InvalidPassword,

    // ========================================================================
    // Recommendation Errors
    // ========================================================================
    #[error("Not enough behavior history to generate recommendations")]
    InsufficientData,

    // ========================================================================
    // Worker / Queue Errors
    // ========================================================================
    #[error("Worker queue is full")]
    QueueFull,

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("Password hashing failed: {message}")]
    PasswordHash { message: Cow<'static, str> },

    #[error("Internal server error")]
    Internal {
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    // ========================================================================
    // Constructors for common error patterns
    // ========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error
    pub fn database(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source
    pub fn database_with_source(
        message: impl Into<Cow<'static, str>>,
        source: sqlx::Error,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal {
            source: Some(Box::new(source)),
        }
    }

    // ========================================================================
    // Error Classification
    // ========================================================================

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database { .. } | Error::PoolExhausted)
    }

    /// Returns true if this error should be logged at error level
    pub fn is_error_level(&self) -> bool {
        matches!(
            self,
            Error::Database { .. }
                | Error::PoolExhausted
                | Error::Internal { .. }
                | Error::Migration(_)
                | Error::PasswordHash { .. }
        )
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidUserId
            | Error::InvalidBookmarkId
            | Error::InvalidAction { .. }
            | Error::InvalidScore { .. }
            | Error::InvalidTimeWindow { .. }
            | Error::InvalidAlgorithm { .. }
            | Error::InvalidSyncEventType { .. }
            | Error::InvalidValue { .. }
            | Error::MissingField { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized { .. } | Error::InvalidPassword => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::AlreadyFollowing
            | Error::CannotFollowSelf
            | Error::NotFollowing
            | Error::CannotForkOwnCollection
            | Error::ForkNotAllowed
            | Error::CollaboratorExists
            | Error::CollaborationNotPending
            | Error::ShareInactive
            | Error::ConstraintViolation { .. } => StatusCode::CONFLICT,
            Error::ShareExpired => StatusCode::GONE,
            Error::InsufficientData => StatusCode::UNPROCESSABLE_ENTITY,
            Error::PoolExhausted | Error::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } | Error::MissingEnvVar { .. } | Error::InvalidConfig { .. } => {
                "CONFIG_ERROR"
            }
            Error::Database { .. }
            | Error::PoolExhausted
            | Error::ConstraintViolation { .. }
            | Error::Migration(_) => "DATABASE_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::InvalidUserId
            | Error::InvalidBookmarkId
            | Error::InvalidAction { .. }
            | Error::InvalidScore { .. }
            | Error::InvalidTimeWindow { .. }
            | Error::InvalidAlgorithm { .. }
            | Error::InvalidSyncEventType { .. }
            | Error::InvalidValue { .. }
            | Error::MissingField { .. } => "VALIDATION_ERROR",
            Error::AlreadyFollowing => "ALREADY_FOLLOWING",
            Error::CannotFollowSelf => "CANNOT_FOLLOW_SELF",
            Error::NotFollowing => "NOT_FOLLOWING",
            Error::CannotForkOwnCollection => "CANNOT_FORK_OWN_COLLECTION",
            Error::ForkNotAllowed => "FORK_NOT_ALLOWED",
            Error::CollaboratorExists => "COLLABORATOR_EXISTS",
            Error::CollaborationNotPending => "COLLABORATION_NOT_PENDING",
            Error::ShareInactive => "SHARE_INACTIVE",
            Error::ShareExpired => "SHARE_EXPIRED",
            Error::Unauthorized { .. } => "UNAUTHORIZED",
            Error::Forbidden { .. } => "FORBIDDEN",
            Error::InvalidPassword => "INVALID_PASSWORD",
            Error::InsufficientData => "INSUFFICIENT_DATA",
            Error::QueueFull => "QUEUE_FULL",
            Error::Json(_) => "SERIALIZATION_ERROR",
            Error::PasswordHash { .. } | Error::Internal { .. } | Error::Other(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

// ============================================================================
// Error Response for API
// ============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        // Don't expose internal error details in production
        let safe_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred".to_string()
        } else {
            message
        };

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code,
                message: safe_message,
                details: None,
            },
            request_id: uuid::Uuid::new_v4().to_string(),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound {
                entity_type: "record",
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => Error::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                // Check for constraint violations
                if let Some(constraint) = db_err.constraint() {
                    return Error::ConstraintViolation {
                        message: format!("Constraint '{}' violated", constraint).into(),
                    };
                }
                Error::Database {
                    message: db_err.message().to_string().into(),
                    source: Some(err),
                }
            }
            _ => Error::Database {
                message: err.to_string().into(),
                source: Some(err),
            },
        }
    }
}

impl From<std::env::VarError> for Error {
    fn from(_err: std::env::VarError) -> Self {
        Error::Config {
            message: "Environment variable error".into(),
            source: None,
        }
    }
}
