use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use walkworthy_core::error::{self, ApiError};
use walkworthy_scan::ScanError;
use walkworthy_scan::delivery::DeliveryError;
use walkworthy_scan::store::StoreError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or unusable caller identity (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Resource does not exist for this caller (404)
    NotFound { message: String },
    /// Precondition not met, e.g. Canvas not linked (409)
    Conflict {
        message: String,
        docs_hint: Option<String>,
    },
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    fn parts(self, request_id: String) -> (StatusCode, ApiError) {
        let envelope = |code: &str, message: String| ApiError {
            error: code.to_string(),
            message,
            field: None,
            received: None,
            request_id: request_id.clone(),
            docs_hint: None,
        };

        match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..envelope(error::codes::VALIDATION_FAILED, message)
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    docs_hint,
                    ..envelope(error::codes::UNAUTHORIZED, message)
                },
            ),
            AppError::NotFound { message } => (
                StatusCode::NOT_FOUND,
                envelope(error::codes::NOT_FOUND, message),
            ),
            AppError::Conflict { message, docs_hint } => (
                StatusCode::CONFLICT,
                ApiError {
                    docs_hint,
                    ..envelope(error::codes::CONFLICT, message)
                },
            ),
            AppError::Database(err) => {
                tracing::error!(request_id = %request_id, "Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    envelope(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = %request_id, "Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    envelope(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let (status, api_error) = self.parts(request_id);
        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(db) => AppError::Database(db),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::LinkMissing(_) => AppError::Conflict {
                message: "Canvas account not linked".to_string(),
                docs_hint: Some(
                    "Link a Canvas account before requesting a scan.".to_string(),
                ),
            },
            ScanError::Store(store) => store.into(),
            ScanError::Credential(msg) => AppError::Internal(msg),
        }
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::NotFound(_) => AppError::NotFound {
                message: "Encouragement not found".to_string(),
            },
            DeliveryError::Store(store) => store.into(),
        }
    }
}
