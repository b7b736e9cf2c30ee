//! Error taxonomy of the delivery API and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use quickchat_proto::api::Failure;
use quickchat_proto::message::ValidationError;

use crate::store::StoreError;

/// Errors returned by delivery operations.
///
/// Every variant is recoverable from the caller's point of view; none of them
/// leave partially committed state behind.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Unknown user or message. Callers log and continue.
    #[error("{0} not found")]
    NotFound(String),

    /// The request itself is invalid (empty message, self-send, bad body).
    #[error("{0}")]
    Rejected(String),

    /// The store could not be reached. Nothing was persisted; retry the
    /// whole operation.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Missing, malformed, or unknown bearer credential.
    #[error("not authorized")]
    Unauthorized,
}

impl DeliveryError {
    /// HTTP status used for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<ValidationError> for DeliveryError {
    fn from(err: ValidationError) -> Self {
        Self::Rejected(err.to_string())
    }
}

impl From<StoreError> for DeliveryError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        (self.status(), Json(Failure::new(self.to_string()))).into_response()
    }
}
