//! Error types and handling
//!
//! Common error types used across the server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::room::registry::RegistryError;

/// Server-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No available sounds")]
    CapacityExceeded,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] RegistryError),

    #[error("Room unavailable: {0}")]
    RoomUnavailable(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::CapacityExceeded => StatusCode::BAD_REQUEST,
            AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(RegistryError::InvalidRoomId(_)) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RoomUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Error frame sent back over a channel
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::CapacityExceeded => "CAPACITY_EXCEEDED",
            AppError::MalformedRequest(_) => "MALFORMED_REQUEST",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::RoomUnavailable(_) => "ROOM_UNAVAILABLE",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
