use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// HTTP-facing errors. Config failures carry a stable machine code; the
/// rest map to plain status + message.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest { code: &'static str, message: String },
    Internal(String),
}

pub const INVALID_PROPORTIONS: &str = "INVALID_PROPORTIONS";
pub const INVALID_ACCOUNT: &str = "INVALID_ACCOUNT";
pub const INVALID_SYMBOL: &str = "INVALID_SYMBOL";
pub const PARSE_ERROR: &str = "PARSE_ERROR";

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": msg, "code": "NOT_FOUND" }),
            ),
            ApiError::BadRequest { code, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "code": code }),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

impl From<crate::accounts::ConfigError> for ApiError {
    fn from(err: crate::accounts::ConfigError) -> Self {
        match err {
            crate::accounts::ConfigError::Parse(e) => ApiError::BadRequest {
                code: PARSE_ERROR,
                message: format!("accounts file is not valid JSON: {e}"),
            },
            other => ApiError::Internal(format!("{other:#}")),
        }
    }
}
