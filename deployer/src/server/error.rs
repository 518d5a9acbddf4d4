//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::errors::DeployerError;

/// Error body returned by every API route
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// Wraps a library error for the HTTP boundary
#[derive(Debug)]
pub struct ApiError(pub DeployerError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DeployerError::ValidationError(_) | DeployerError::JsonError(_) => {
                StatusCode::BAD_REQUEST
            }
            DeployerError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            DeployerError::UnknownTarget(_) | DeployerError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            error: message,
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DeployerError> for ApiError {
    fn from(err: DeployerError) -> Self {
        ApiError(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
