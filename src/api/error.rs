//! HTTP error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::{ErrorCode, MessengerError};

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Messenger(MessengerError),
    /// Malformed request (missing field, bad JSON, unsupported upload)
    BadRequest(String),
    PayloadTooLarge(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    code: &'static str,
}

impl From<MessengerError> for ApiError {
    fn from(error: MessengerError) -> Self {
        Self::Messenger(error)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Messenger(e) => match e.code() {
                ErrorCode::SessionUnavailable | ErrorCode::PairingRequired => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ErrorCode::InvalidRecipient | ErrorCode::InThePast => StatusCode::BAD_REQUEST,
                ErrorCode::JobNotFound => StatusCode::NOT_FOUND,
                ErrorCode::JobNotCancellable => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Messenger(e) => e.to_string(),
            Self::BadRequest(m) | Self::PayloadTooLarge(m) => m.clone(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Messenger(e) => e.code().as_str(),
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.message());
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.message());
        }

        let body = Json(ErrorResponse {
            success: false,
            message: self.message(),
            code: self.code(),
        });
        (status, body).into_response()
    }
}
