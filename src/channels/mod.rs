//! Channel Integrations
//!
//! The messaging provider is a black box behind two traits: a [`Provider`]
//! builds live [`ProviderSession`] handles, and each handle reports lifecycle
//! changes through a [`ProviderEvent`] channel handed over at connect time.

pub mod whatsapp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::contacts::{RawContact, RecipientAddress};
use crate::error::Result;

/// Lifecycle notifications emitted by a provider session handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// A new pairing code superseding any previous one
    PairingCode(String),
    Authenticated,
    Ready,
    Disconnected(String),
    AuthFailure(String),
    /// Raw connection state change (`CONNECTED`, `CONFLICT`, `UNPAIRED`, ...)
    StateChanged(String),
}

pub type ProviderEventSender = mpsc::UnboundedSender<ProviderEvent>;

/// A file to attach to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl MediaRef {
    /// Explicit MIME type, else one derived from the file extension.
    pub fn resolved_mime_type(&self) -> &str {
        match self.mime_type.as_deref() {
            Some(mime) => mime,
            None => mime_type_for_path(&self.path),
        }
    }

    /// Explicit file name, else the last path component.
    pub fn resolved_file_name(&self) -> String {
        self.file_name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "media".to_string())
        })
    }
}

/// MIME type for the media formats the provider accepts as attachments.
pub fn mime_type_for_path(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Text {
        text: String,
    },
    Media {
        #[serde(default)]
        text: String,
        media: MediaRef,
    },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Body text, or the caption for media.
    pub fn body(&self) -> &str {
        match self {
            Self::Text { text } | Self::Media { text, .. } => text,
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Self::Text { .. } => None,
            Self::Media { media, .. } => Some(media),
        }
    }
}

/// Builds provider session handles.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Construct a fresh session handle and start it. Lifecycle events for this
    /// handle, and only this handle, are pushed into `events`.
    async fn connect(&self, events: ProviderEventSender) -> Result<Arc<dyn ProviderSession>>;
}

/// A live, stateful connection to the messaging network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn send(&self, to: &RecipientAddress, payload: &Payload) -> Result<()>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<()>;

    /// Tear the handle down and release its resources. The session store is
    /// left on disk.
    async fn destroy(&self) -> Result<()>;

    async fn contacts(&self) -> Result<Vec<RawContact>>;
}
