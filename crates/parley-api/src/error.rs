use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use parley_db::StoreError;
use parley_types::api::ErrorResponse;

pub type ApiResult<T> = Result<T, ApiError>;

/// Every failure a handler can answer with. Each variant maps to one HTTP
/// status and one stable error code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Auth(_) => "AUTH_ERROR",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the client. Internal details stay in the log.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_code = %code, "Request failed");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, error_code = %code, "Authentication rejected");
        } else {
            tracing::debug!(error = %self, error_code = %code, "Client error");
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(msg) => ApiError::Validation(msg),
            StoreError::Auth => ApiError::Auth("unknown or invalid identity".into()),
            StoreError::Forbidden(msg) => ApiError::Forbidden(msg),
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Internal(err) => ApiError::Internal(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_category() {
        let cases = [
            (StoreError::validation("bad"), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (StoreError::Auth, StatusCode::UNAUTHORIZED, "AUTH_ERROR"),
            (StoreError::forbidden("no"), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (StoreError::NotFound("message"), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (StoreError::conflict("taken"), StatusCode::CONFLICT, "CONFLICT"),
        ];
        for (store, status, code) in cases {
            let api = ApiError::from(store);
            assert_eq!(api.status_code(), status);
            assert_eq!(api.error_code(), code);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::from(StoreError::Internal(anyhow::anyhow!("disk I/O error at /var/db")));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Internal server error");
    }

    #[test]
    fn not_found_names_the_entity() {
        assert_eq!(ApiError::NotFound("group").user_message(), "group not found");
    }
}
