//! JSON envelopes shared by the API handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::healthcheck::CheckError;

/// Confirmation and error payloads: `{"messages": ["…"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Messages {
    pub messages: Vec<String>,
}

impl Messages {
    pub fn one(message: impl Into<String>) -> Self {
        Messages {
            messages: vec![message.into()],
        }
    }
}

/// An API failure carrying the HTTP status and the message envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub messages: Messages,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            messages: Messages::one(message),
        }
    }

    pub fn not_found() -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            messages: Messages::one("not found"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            messages: Messages::one(message),
        }
    }
}

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Validation(_) | CheckError::Initialization(_) => {
                ApiError::bad_request(err.to_string())
            }
            CheckError::Execution(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.messages)).into_response()
    }
}
