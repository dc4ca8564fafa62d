use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::time::Duration;

use crate::store::StoreError;

/// Errors surfaced by the lifecycle and rating operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Blank or out-of-range input, caught before any store call.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    /// The operation is not allowed from the request's current status.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// A concurrent writer won, or a uniqueness rule was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store error: {0}")]
    Remote(#[source] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, id } => CoreError::NotFound(format!("{collection}/{id}")),
            StoreError::AlreadyExists { collection, id } => {
                CoreError::Conflict(format!("{collection}/{id} already exists"))
            }
            StoreError::PreconditionFailed(p) => {
                CoreError::Conflict(format!("document changed concurrently ({p})"))
            }
            other => CoreError::Remote(other),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Remote(StoreError::InvalidDocument(e.to_string()))
    }
}

impl ResponseError for CoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Remote(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string(),
        }))
    }
}
