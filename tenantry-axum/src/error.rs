//! HTTP mapping of tenancy errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tenantry_core::TenancyError;
use thiserror::Error;

/// A [`TenancyError`] rejected as an HTTP response.
///
/// The body is `{ "error": <message>, "code": <code> }`.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct TenancyRejection(#[from] pub TenancyError);

impl TenancyRejection {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

/// HTTP status for a tenancy error.
pub fn status_for(err: &TenancyError) -> StatusCode {
    match err {
        TenancyError::TenantNameMissing => StatusCode::BAD_REQUEST,
        TenancyError::TenantNotFound(_) => StatusCode::NOT_FOUND,
        TenancyError::InactiveTenant(_) | TenancyError::Forbidden => StatusCode::FORBIDDEN,
        TenancyError::Duplicate { .. } => StatusCode::CONFLICT,
        TenancyError::Connection { .. } | TenancyError::Directory(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TenancyError::SchemaRegistration { .. } | TenancyError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for TenancyRejection {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.code().code(),
        }));
        (self.status(), body).into_response()
    }
}
