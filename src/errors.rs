use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

/// Failures inside the acquisition pipeline.
///
/// `Transient` and `SchemaMismatch` are recoverable: callers move on to the
/// next candidate field, dataset or tier. Only `InvalidSpatialIdentifier` is
/// a client-input error that ends the request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("upstream fetch failed: {0}")]
    Transient(String),

    #[error("no candidate field matched: {0}")]
    SchemaMismatch(String),

    #[error("invalid area id: {0}")]
    InvalidSpatialIdentifier(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Transient(format!("request timed out: {}", err))
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

/// Why a historical tier produced nothing usable.
///
/// Variants carrying `capacity` hand the observed bay count to the next tier
/// so a weaker tier can still scale against real capacity.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TierFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("series unusable (capacity {capacity})")]
    Unusable { capacity: u32 },

    #[error("no pedestrian data near origin (capacity {capacity})")]
    NoPedestrianData { capacity: u32 },
}

impl TierFailure {
    /// Capacity observed before failing, if any.
    pub fn capacity_hint(&self) -> Option<u32> {
        match self {
            TierFailure::Fetch(_) => None,
            TierFailure::Unusable { capacity } | TierFailure::NoPedestrianData { capacity } => {
                (*capacity > 0).then_some(*capacity)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ExternalServiceError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidSpatialIdentifier(id) => {
                AppError::BadRequest(format!("Invalid area id: {}", id))
            }
            other => AppError::ExternalServiceError(other.to_string()),
        }
    }
}
