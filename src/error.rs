//! Error taxonomy for the aggregation core.
//!
//! Providers and the transport return typed failures; the sync engine is the
//! only component that turns a call failure into a run failure. HTTP mapping
//! lives here so handlers can `?` straight through.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Transient upstream failure that survived every retry.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any network call (bad page index, bad query, ...).
    #[error("invalid request: {0}")]
    Validation(String),

    /// A sync batch failed; recorded on SyncProgress, never raised to readers.
    #[error("sync failed: {0}")]
    SyncFailed(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("upstream payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
