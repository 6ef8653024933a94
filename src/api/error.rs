use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::analytics::{FormatError, IngestError};
use crate::storage::StorageError;

use super::handlers::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("website '{0}' is not registered")]
    NotFound(String),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Format(#[from] FormatError),
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::Conflict => StatusCode::CONFLICT,
        StorageError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        StorageError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Ingest(IngestError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Ingest(IngestError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Ingest(IngestError::Storage(e)) | ApiError::Storage(e) => storage_status(e),
            ApiError::Format(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side details stay in the logs
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Storage temporarily unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::normalizer::ValidationError;
    use crate::analytics::Granularity;

    #[test]
    fn test_status_mapping() {
        let validation = ApiError::from(IngestError::from(ValidationError::MissingHost(
            "mailto:x".to_string(),
        )));
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let missing = ApiError::from(IngestError::NotFound("example.com".to_string()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let timeout = ApiError::from(IngestError::from(StorageError::Timeout));
        assert_eq!(timeout.status(), StatusCode::SERVICE_UNAVAILABLE);

        let down = ApiError::from(StorageError::Unavailable(anyhow::anyhow!("pool closed")));
        assert_eq!(down.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let format = ApiError::from(FormatError {
            label: "25".to_string(),
            granularity: Granularity::Hour,
        });
        assert_eq!(format.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
