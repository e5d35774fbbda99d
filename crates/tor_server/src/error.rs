//! HTTP error mapping. Every failure leaves as `{message, code, field?}`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tor_core::error::{ErrorCategory, TorError};
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug)]
pub struct AppError(pub TorError);

impl From<TorError> for AppError {
    fn from(e: TorError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TorError::invalid(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self(TorError::invalid_field("view", rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match err.category() {
            ErrorCategory::Configuration => {
                error!(code = err.code(), error = %err, "configuration error");
                err.to_string()
            }
            ErrorCategory::Internal => {
                error!(error = ?err, "unexpected failure");
                "internal server error".to_string()
            }
            ErrorCategory::Transient => {
                warn!(error = %err, "giving up after retries");
                "service temporarily unavailable, try again".to_string()
            }
            _ => err.to_string(),
        };

        let body = ErrorBody {
            message,
            code: err.code().to_string(),
            field: err.field().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}
