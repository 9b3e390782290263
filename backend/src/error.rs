use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::InferenceError;
use crate::upload::UploadError;

/// Errors surfaced to HTTP clients. Processing failures render a fixed
/// message; their detail only goes to the server log.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("Failed to process image")]
    Processing(#[source] InferenceError),
    #[error("Failed to process image")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_are_client_errors() {
        assert_eq!(
            ApiError::from(UploadError::MissingFile).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(UploadError::InvalidType("a.gif".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(UploadError::TooLarge { limit: 10 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn processing_errors_do_not_leak_detail() {
        let err = ApiError::Processing(InferenceError::Preprocessing(
            "/srv/uploads/secret.png exploded".into(),
        ));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to process image");
    }
}
