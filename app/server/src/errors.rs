use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use legal_rag::RagError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    InvalidRequest(String),
    /// A model or the store is not available yet; a later request retries.
    ServiceUnavailable(String),
    InternalError(String),
}

impl ApiError {
    pub fn to_response(&self) -> ErrorResponse {
        let (error_type, message) = match self {
            ApiError::InvalidRequest(msg) => ("invalid_request", msg),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
            ApiError::InternalError(msg) => ("internal_error", msg),
        };
        ErrorResponse {
            error_type: error_type.to_string(),
            message: message.clone(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        if err.is_unavailable() {
            ApiError::ServiceUnavailable(err.to_string())
        } else {
            ApiError::InternalError(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::InternalError(_) => tracing::error!("{}", self),
            _ => tracing::warn!("{}", self),
        }
        (self.status_code(), Json(self.to_response())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_rag_errors_map_to_status() {
        let missing: ApiError = RagError::ModelNotFound(PathBuf::from("models/m.gguf")).into();
        assert_eq!(missing.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(missing.to_response().message.contains("models/m.gguf"));

        let failed: ApiError = RagError::Generation("context overflow".into()).into();
        assert_eq!(failed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.to_response().error_type, "internal_error");
    }

    #[test]
    fn test_invalid_request_is_400() {
        let err = ApiError::InvalidRequest("query must not be empty".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_response(),
            ErrorResponse {
                error_type: "invalid_request".into(),
                message: "query must not be empty".into(),
            }
        );
    }
}
