use attribution::AttributionError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use model::ModelError;
use serde_json::json;

/// Request-level failures map to 400 with the reason in the body; everything
/// else is a 500 with the detail kept in the logs.
pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(error) => {
                tracing::error!(error = %error, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        if e.is_input_error() {
            ApiError::BadRequest(e.to_string())
        } else {
            ApiError::Internal(e.into())
        }
    }
}

impl From<AttributionError> for ApiError {
    fn from(e: AttributionError) -> Self {
        match e {
            AttributionError::Model(inner) => inner.into(),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<overlay::OverlayError> for ApiError {
    fn from(e: overlay::OverlayError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<report::ReportError> for ApiError {
    fn from(e: report::ReportError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}
