use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

use crate::supervisor::Fault;

/// Unified error response body
#[derive(Serialize)]
pub struct ErrorResponse<'a> {
    pub code: &'a str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DbError(#[from] DbErr),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Too many requests, please try again later.")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal server error")]
    Internal,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::DbError(DbErr::RecordNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::DbError(_) | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::JsonError(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        render(self, None)
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DbError(_) => "DB_ERROR",
            AppError::JsonError(_) => "JSON_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
            AppError::NotImplemented(_) => "NOT_IMPLEMENTED",
            AppError::Internal => "INTERNAL",
        }
    }
}

/// Renders an `AppError` into the JSON envelope, tagged with the request id.
pub fn render(err: &AppError, trace_id: Option<&str>) -> HttpResponse {
    let mut builder = HttpResponse::build(err.status_code());
    if let AppError::TooManyRequests { retry_after_secs } = err {
        builder.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
    }
    builder.json(ErrorResponse {
        code: err.code(),
        message: err.to_string(),
        details: None,
        trace_id: trace_id.map(str::to_owned),
    })
}

/// Renders any actix error (extractor failures, errors from handlers) into
/// the same envelope. `AppError`s keep their own code.
pub fn render_any(err: &actix_web::Error, trace_id: Option<&str>) -> HttpResponse {
    if let Some(app_err) = err.as_error::<AppError>() {
        return render(app_err, trace_id);
    }

    let status = err.as_response_error().status_code();
    let code = status_code_name(status);
    HttpResponse::build(status).json(ErrorResponse {
        code: &code,
        message: err.to_string(),
        details: None,
        trace_id: trace_id.map(str::to_owned),
    })
}

fn status_code_name(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("HTTP_ERROR")
        .to_ascii_uppercase()
        .replace([' ', '-', '\''], "_")
}

/// Errors that stop the process: failed bootstrap or a fault observed while
/// serving.
#[derive(Error, Debug)]
pub enum BootError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Fault(Fault),
}
