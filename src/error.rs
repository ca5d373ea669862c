use axum::response::{IntoResponse, Response};
use axum::{http::StatusCode, Json};

use crate::models::{ErrorBody, ErrorEnvelope, FieldError};

#[derive(Debug)]
pub enum AppError {
    Database(String),
    Unauthorized,
    NotFound,
    Validation {
        message: String,
        details: Vec<FieldError>,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn field(field: &str, message: &str) -> Self {
        AppError::Validation {
            message: format!("Invalid value for '{field}'"),
            details: vec![FieldError {
                field: field.to_string(),
                message: message.to_string(),
            }],
        }
    }
}

pub fn error_envelope(
    status: StatusCode,
    code: &str,
    message: String,
    details: Option<Vec<FieldError>>,
) -> ErrorEnvelope {
    ErrorEnvelope {
        success: false,
        status: status.as_u16(),
        error: ErrorBody {
            code: code.to_string(),
            message,
        },
        details,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            AppError::Database(msg) => {
                // Storage internals stay server-side.
                tracing::error!(error = %msg, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                    None,
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
                None,
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Task not found".to_string(),
                None,
            ),
            AppError::Validation { message, details } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                message,
                if details.is_empty() {
                    None
                } else {
                    Some(details)
                },
            ),
        };

        (status, Json(error_envelope(status, code, message, details))).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}
