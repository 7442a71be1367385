use thiserror::Error;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Details stay in the logs, callers only learn that the store is down.
    #[error("Backend unavailable")]
    Backend(#[from] crate::store::BackendError),

    #[error("bad JSON data")]
    InvalidPayload,

    #[error("No such secret")]
    NotFound,

    #[error("Could not store secret")]
    StoreFailed,

    #[error("Could not read secret")]
    RetrieveFailed,
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convert AppError to HTTP status codes for web responses
impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidPayload => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::StoreFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RetrieveFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16()
        });
        (status, axum::Json(body)).into_response()
    }
}
