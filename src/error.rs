use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side failures keep their detail in the log, not the body.
        let (mensaje, error) = if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
            ("Internal server error".to_string(), None)
        } else {
            if status == StatusCode::UNAUTHORIZED {
                tracing::warn!("Rejected request: {}", self);
            }
            (self.to_string(), Some(status.canonical_reason().unwrap_or("error")))
        };

        let body = json!({
            "success": false,
            "mensaje": mensaje,
            "error": error,
        });

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::bad_request("x"), StatusCode::BAD_REQUEST)]
    #[case(AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED)]
    #[case(AppError::forbidden("x"), StatusCode::FORBIDDEN)]
    #[case(AppError::not_found("x"), StatusCode::NOT_FOUND)]
    #[case(AppError::Conflict("x".into()), StatusCode::CONFLICT)]
    #[case(AppError::Storage("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_to_status(#[case] err: AppError, #[case] expected: StatusCode) {
        assert_eq!(err.status(), expected);
    }

    #[tokio::test]
    async fn client_error_body_carries_message() {
        let response = AppError::not_found("Article not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["mensaje"], "Article not found");
        assert_eq!(body["error"], "Not Found");
    }

    #[tokio::test]
    async fn server_error_body_hides_detail() {
        let response = AppError::Internal("secret path /var/x".into()).into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["mensaje"], "Internal server error");
        assert!(body["error"].is_null());
    }
}
