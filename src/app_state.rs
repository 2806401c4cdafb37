use std::{fmt::Display, sync::Arc};

use axum::{
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fingerprint::FingerprintError;
use serde::Serialize;

use crate::{
    config::ServerConfiguration,
    recognition::Recognizer,
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub recognizer: Recognizer,
    pub configuration: Arc<ServerConfiguration>,
}

impl FromRef<AppState> for Recognizer {
    fn from_ref(app_state: &AppState) -> Recognizer {
        app_state.recognizer.clone()
    }
}

impl FromRef<AppState> for Arc<ServerConfiguration> {
    fn from_ref(app_state: &AppState) -> Arc<ServerConfiguration> {
        app_state.configuration.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorKind {
    InternalError,
    NotFound,
    BadRequest,
}

impl From<AppErrorKind> for StatusCode {
    fn from(kind: AppErrorKind) -> Self {
        match kind {
            AppErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::NotFound => StatusCode::NOT_FOUND,
            AppErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AppError {
    pub message: String,
    pub kind: AppErrorKind,
}

impl AppError {
    pub fn new(message: impl Into<String>, kind: AppErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, AppErrorKind::BadRequest)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, AppErrorKind::NotFound)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(message, AppErrorKind::InternalError)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status: StatusCode = self.kind.into();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.message);
        }
        (status, Json(serde_json::json!({ "message": self.message }))).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_error(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("requested row is not found"),
            rest => Self::internal_error(format!("store failure: {rest}")),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::internal_error(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal_error(format!("fingerprinting task failed: {err}"))
    }
}

impl From<FingerprintError> for AppError {
    fn from(err: FingerprintError) -> Self {
        match err {
            FingerprintError::EmptyInput | FingerprintError::SampleRateMismatch { .. } => {
                Self::bad_request(err.to_string())
            }
            FingerprintError::InvalidConfiguration(_) | FingerprintError::Transform(_) => {
                Self::internal_error(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};
    use fingerprint::FingerprintError;

    use super::{AppError, AppErrorKind};

    #[test]
    fn error_kinds_map_to_status_codes() {
        let err: AppError = FingerprintError::EmptyInput.into();
        assert_eq!(err.kind, AppErrorKind::BadRequest);
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind, AppErrorKind::InternalError);
        assert!(err.message.starts_with("store failure"));
    }
}
