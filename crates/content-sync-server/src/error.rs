//! Error types for the content service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use content_sync_core::{ApiEnvelope, ResourceType, ValidationError};

/// Request-level errors, rendered as `{ "success": false, "message": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("{resource} {id} not found")]
    NotFound { resource: ResourceType, id: String },

    #[error("Invalid content: {0}")]
    Validation(#[from] ValidationError),

    #[error("Payload is a {found} but was submitted as a {expected}")]
    TypeMismatch {
        expected: ResourceType,
        found: ResourceType,
    },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownResource(_) | ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::TypeMismatch { .. } | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiEnvelope::<()>::error(self.to_string());
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError::NotFound {
            resource: ResourceType::Event,
            id: "9".to_string(),
        };
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.to_string(), "event 9 not found");

        let invalid = ApiError::from(ValidationError::new("slug", "must not be empty"));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Internal("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_renders_json_envelope() {
        let response = ApiError::BadRequest("bad limit".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type, "application/json");
    }
}
