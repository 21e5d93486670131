//! API route modules.

pub mod contacts;
pub mod events;
pub mod health;
pub mod messages;
pub mod scheduled;
pub mod session;

use serde::Serialize;

use crate::contacts::RecipientAddress;
use crate::error::MessengerError;

/// `{success, message?}` acknowledgement.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }
}

/// Parse operator-supplied recipients, rejecting the request if any is invalid.
pub(crate) fn parse_recipients(raw: &[String]) -> Result<Vec<RecipientAddress>, MessengerError> {
    let mut recipients = Vec::with_capacity(raw.len());
    let mut invalid = Vec::new();
    for input in raw {
        match RecipientAddress::parse(input) {
            Ok(address) => recipients.push(address),
            Err(_) => invalid.push(input.as_str()),
        }
    }
    if !invalid.is_empty() {
        return Err(MessengerError::InvalidRecipient(invalid.join(", ")));
    }
    if recipients.is_empty() {
        return Err(MessengerError::InvalidRecipient(
            "at least one recipient is required".to_string(),
        ));
    }
    Ok(recipients)
}
