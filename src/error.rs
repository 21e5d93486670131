//! Error types for wa-dispatcher.
//!
//! Every operator-facing failure maps to one [`MessengerError`] variant and a
//! stable [`ErrorCode`] that the HTTP layer turns into a status and a
//! `{success: false, message, code}` body.

use serde::Serialize;
use thiserror::Error;

use crate::scheduler::{JobId, JobStatus};

/// Result type alias using [`MessengerError`]
pub type Result<T> = std::result::Result<T, MessengerError>;

/// Core error types
#[derive(Error, Debug)]
pub enum MessengerError {
    // Session lifecycle
    #[error("WhatsApp session is not ready (state: {state})")]
    SessionUnavailable { state: String },

    #[error("No active WhatsApp session. Scan the pairing code first.")]
    PairingRequired,

    #[error("Session store at {path} is still locked after {attempts} attempt(s)")]
    CleanupLocked { path: String, attempts: u32 },

    // Recipients and dispatch
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Scheduled time must be in the future")]
    InThePast,

    #[error("Scheduled job not found: {0}")]
    JobNotFound(JobId),

    #[error("Scheduled job {id} cannot be cancelled (status: {status})")]
    JobNotCancellable { id: JobId, status: JobStatus },

    #[error("Failed to deliver to {recipient}: {reason}")]
    ProviderSendFailure { recipient: String, reason: String },

    // Provider plumbing
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Session manager has stopped")]
    ManagerStopped,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionUnavailable,
    PairingRequired,
    CleanupLocked,
    InvalidRecipient,
    InThePast,
    JobNotFound,
    JobNotCancellable,
    ProviderSendFailure,
    Provider,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionUnavailable => "SESSION_UNAVAILABLE",
            Self::PairingRequired => "PAIRING_REQUIRED",
            Self::CleanupLocked => "CLEANUP_LOCKED",
            Self::InvalidRecipient => "INVALID_RECIPIENT",
            Self::InThePast => "IN_THE_PAST",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::JobNotCancellable => "JOB_NOT_CANCELLABLE",
            Self::ProviderSendFailure => "PROVIDER_SEND_FAILURE",
            Self::Provider => "PROVIDER",
            Self::Internal => "INTERNAL",
        }
    }
}

impl MessengerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SessionUnavailable { .. } => ErrorCode::SessionUnavailable,
            Self::PairingRequired => ErrorCode::PairingRequired,
            Self::CleanupLocked { .. } => ErrorCode::CleanupLocked,
            Self::InvalidRecipient(_) => ErrorCode::InvalidRecipient,
            Self::InThePast => ErrorCode::InThePast,
            Self::JobNotFound(_) => ErrorCode::JobNotFound,
            Self::JobNotCancellable { .. } => ErrorCode::JobNotCancellable,
            Self::ProviderSendFailure { .. } => ErrorCode::ProviderSendFailure,
            Self::Provider(_) => ErrorCode::Provider,
            Self::ManagerStopped | Self::Io(_) | Self::Serialization(_) | Self::Config(_) => {
                ErrorCode::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_variants() {
        let err = MessengerError::SessionUnavailable {
            state: "awaiting_pairing".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::SessionUnavailable);

        let err = MessengerError::JobNotCancellable {
            id: JobId::from(7),
            status: JobStatus::Firing,
        };
        assert_eq!(err.code(), ErrorCode::JobNotCancellable);
        assert!(err.to_string().contains("firing"));
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::CleanupLocked).unwrap();
        assert_eq!(json, "\"CLEANUP_LOCKED\"");
        assert_eq!(
            serde_json::to_string(&ErrorCode::InThePast).unwrap(),
            format!("\"{}\"", ErrorCode::InThePast.as_str())
        );
    }
}
