//! Error types for QAForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each failure mode of answer resolution
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

    // Rate limiting (6xxx)
    RateLimited,

    // External service errors (8xxx)
    CompletionTransport,
    CompletionTimeout,
    EmptyCompletion,
    CollaboratorError,
    CacheComputation,
    CacheError,

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

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // External (8xxx)
            ErrorCode::CompletionTransport => 8001,
            ErrorCode::CompletionTimeout => 8002,
            ErrorCode::EmptyCompletion => 8003,
            ErrorCode::CollaboratorError => 8004,
            ErrorCode::CacheComputation => 8005,
            ErrorCode::CacheError => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Completion provider errors
    #[error("Completion request failed: {message}")]
    CompletionTransport { message: String },

    #[error("Completion request timed out after {timeout_ms}ms")]
    CompletionTimeout { timeout_ms: u64 },

    #[error("Completion response from model {model} carried no usable content")]
    EmptyCompletion { model: String },

    // Knowledge / history collaborators
    #[error("{collaborator} service error: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    // Single-flight replay of a failed computation to a waiter
    #[error("Answer computation for '{key}' failed: {message}")]
    CacheComputation { key: String, message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

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
    /// Build a collaborator error for the named service
    pub fn collaborator(collaborator: &str, message: impl Into<String>) -> Self {
        AppError::Collaborator {
            collaborator: collaborator.to_string(),
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::CompletionTransport { .. } => ErrorCode::CompletionTransport,
            AppError::CompletionTimeout { .. } => ErrorCode::CompletionTimeout,
            AppError::EmptyCompletion { .. } => ErrorCode::EmptyCompletion,
            AppError::Collaborator { .. } => ErrorCode::CollaboratorError,
            AppError::CacheComputation { .. } => ErrorCode::CacheComputation,
            AppError::CacheError { .. } => ErrorCode::CacheError,
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

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::CompletionTransport { .. } |
            AppError::EmptyCompletion { .. } |
            AppError::Collaborator { .. } |
            AppError::CacheComputation { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::CompletionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable
            AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Transport-class failures of the completion provider
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::CompletionTransport { .. } | AppError::CompletionTimeout { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
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
        let details = match &self {
            AppError::Validation { field: Some(field), .. } => Some(serde_json::json!({ "field": field })),
            AppError::RateLimited { limit } => Some(serde_json::json!({ "limit": limit })),
            _ => None,
        };

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
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}
