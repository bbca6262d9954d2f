use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use device_control::ControlError;
use preview::PreviewError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error("camera {0} is not started")]
    NotStarted(String),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The camera failed or could not be reached
    #[error("camera error: {0}")]
    Camera(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Camera(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::NotStarted(_) => ApiError::Conflict(message),
            SessionError::Control(ControlError::PresetNotFound(_)) => ApiError::NotFound(message),
            SessionError::Control(ControlError::DuplicatePresetName(_)) => {
                ApiError::Conflict(message)
            }
            SessionError::Control(_) => ApiError::Camera(message),
            SessionError::Preview(PreviewError::AlreadyStreaming) => ApiError::Conflict(message),
            SessionError::Preview(PreviewError::Encode(_)) => ApiError::Internal(message),
            SessionError::Preview(_) => ApiError::Camera(message),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(format!("{err:#}"))
    }
}
