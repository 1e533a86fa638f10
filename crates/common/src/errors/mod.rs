//! Error types for Presail services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    UnsupportedFormat,
    PayloadTooLarge,
    InvalidDocument,

    // Identity errors (2xxx)
    MissingIdentity,

    // Resource errors (4xxx)
    NotFound,
    DocumentNotFound,
    ProposalNotFound,

    // Workflow errors (5xxx)
    InvalidTransition,
    ConcurrentModification,

    // Database errors (7xxx)
    DatabaseError,
    StorageError,

    // External oracle errors (8xxx)
    EmbeddingUnavailable,
    GenerationUnavailable,
    UpstreamError,

    // Index integrity (9xxx is internal)
    IndexCorrupted,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::UnsupportedFormat => 1002,
            ErrorCode::PayloadTooLarge => 1003,
            ErrorCode::InvalidDocument => 1004,

            // Identity (2xxx)
            ErrorCode::MissingIdentity => 2001,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::DocumentNotFound => 4002,
            ErrorCode::ProposalNotFound => 4003,

            // Workflow (5xxx)
            ErrorCode::InvalidTransition => 5001,
            ErrorCode::ConcurrentModification => 5002,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::StorageError => 7002,

            // External (8xxx)
            ErrorCode::EmbeddingUnavailable => 8001,
            ErrorCode::GenerationUnavailable => 8002,
            ErrorCode::UpstreamError => 8003,

            // Internal (9xxx)
            ErrorCode::IndexCorrupted => 9001,
            ErrorCode::InternalError => 9002,
            ErrorCode::ConfigurationError => 9003,
            ErrorCode::SerializationError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Ingestion input errors: reported to the caller, never retried
    #[error("Unsupported document format: .{extension}")]
    UnsupportedFormat { extension: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid document: {reason}")]
    InvalidDocument { reason: String },

    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Identity errors
    #[error("Actor identity missing or malformed")]
    MissingIdentity,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Proposal not found: {id}")]
    ProposalNotFound { id: String },

    // Workflow errors
    #[error("Invalid transition: cannot {action} a proposal in status {from}")]
    InvalidTransition { from: String, action: String },

    #[error("Concurrent modification of proposal {id}: state changed underneath the request")]
    ConcurrentModification { id: String },

    // Oracle exhaustion: retryable from the caller's side, not fatal here
    #[error("Embedding oracle unavailable: {reason}")]
    EmbeddingUnavailable { reason: String },

    #[error("Generation oracle unavailable: {reason}")]
    GenerationUnavailable { reason: String },

    // Index integrity: fatal to the affected collection until rebuilt
    #[error("Vector index corrupted in collection {collection}: {reason}")]
    IndexCorrupted { collection: String, reason: String },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored value in column {column}: {value}")]
    InvalidStoredValue { column: String, value: String },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    // External transport
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::InvalidDocument { .. } => ErrorCode::InvalidDocument,
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingIdentity => ErrorCode::MissingIdentity,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::ProposalNotFound { .. } => ErrorCode::ProposalNotFound,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
            AppError::EmbeddingUnavailable { .. } => ErrorCode::EmbeddingUnavailable,
            AppError::GenerationUnavailable { .. } => ErrorCode::GenerationUnavailable,
            AppError::IndexCorrupted { .. } => ErrorCode::IndexCorrupted,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::InvalidStoredValue { .. } => ErrorCode::DatabaseError,
            AppError::Storage(_) => ErrorCode::StorageError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::MissingIdentity => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::NotFound { .. } |
            AppError::DocumentNotFound { .. } |
            AppError::ProposalNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::ConcurrentModification { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 415 Unsupported Media Type
            AppError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            // 422 Unprocessable Entity
            AppError::InvalidDocument { .. } |
            AppError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 500 Internal Server Error
            AppError::IndexCorrupted { .. } |
            AppError::Database(_) |
            AppError::InvalidStoredValue { .. } |
            AppError::Storage(_) |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::EmbeddingUnavailable { .. } |
            AppError::GenerationUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Whether the caller may sensibly retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingUnavailable { .. }
                | AppError::GenerationUnavailable { .. }
                | AppError::ConcurrentModification { .. }
        )
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation {
            message: err.to_string(),
            field: None,
        }
    }
}
