use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use gridclaim_core::game::GameError;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Conflict(m) => write!(f, "{m}"),
        }
    }
}

impl From<GameError> for AppError {
    fn from(e: GameError) -> Self {
        let message = e.to_string();
        match e {
            GameError::GameNotFound(_) | GameError::PlayerNotFound(_) => Self::NotFound(message),
            GameError::Capacity { .. } | GameError::InvalidState { .. } => Self::Conflict(message),
            GameError::InvalidMove { .. } => Self::BadRequest(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
