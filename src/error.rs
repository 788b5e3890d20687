//! Error types for the catalog engine and its REST API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;


/// Errors raised by the catalog pipeline.
///
/// None of these abort a batch: the builder and synthesizer log them and
/// move on to the next entity or derivative.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    /// Entity cannot be minted (e.g. no usable name).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A ticker string does not follow the grammar.
    #[error("Malformed ticker '{ticker}': {reason}")]
    MalformedTicker {
        /// The offending ticker.
        ticker: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Concurrent counter update detected. Retried inside the allocator.
    #[error("Allocation conflict on {0}")]
    AllocationConflict(String),

    /// Provider kept rate-limiting after all retries.
    #[error("Provider rate limit exceeded: {provider}")]
    ProviderRateLimit {
        /// Provider name.
        provider: String,
    },

    /// Provider failed for another reason.
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Failure description.
        message: String,
    },

    /// Base ticker missing when a derivative was synthesized or stored.
    #[error("Derivative reference error: {0}")]
    DerivativeReference(String),

    /// Catalog store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl CatalogError {
    /// Builds a [`CatalogError::MalformedTicker`].
    pub fn malformed(ticker: &str, reason: impl Into<String>) -> Self {
        Self::MalformedTicker {
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        CatalogError::Store(err.to_string())
    }
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
}

/// API error types.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Instrument not found.
    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A run is already in progress.
    #[error("Run already in progress")]
    RunInProgress,

    /// Internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::InstrumentNotFound(_) => (StatusCode::NOT_FOUND, "INSTRUMENT_NOT_FOUND"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::RunInProgress => (StatusCode::CONFLICT, "RUN_IN_PROGRESS"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::MalformedTicker { .. } | CatalogError::InvalidInput(_) => {
                ApiError::InvalidRequest(err.to_string())
            }
            CatalogError::DerivativeReference(ticker) => ApiError::InstrumentNotFound(ticker),
            CatalogError::Store(msg) => ApiError::Database(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
