//! In-process WhatsApp client
//!
//! Each [`Provider::connect`] builds a fresh `whatsapp-rust` bot over the
//! SQLite credential store in the session directory. Client events are reduced
//! to [`Signal`]s and relayed as [`ProviderEvent`]s to the session manager.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use wacore::download::MediaType;
use wacore::types::events::Event;
use wacore_binary::jid::Jid;
use waproto::whatsapp as wa;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use super::store::SessionStore;
use crate::channels::{MediaRef, Payload, Provider, ProviderEvent, ProviderEventSender, ProviderSession};
use crate::contacts::{RawContact, RecipientAddress};
use crate::error::{MessengerError, Result};
use crate::utils::truncate_str;

/// Connection states that mean the phone unlinked this device.
pub const UNPAIRED_STATES: [&str; 3] = ["CONFLICT", "UNPAIRED", "UNPAIRED_IDLE"];

/// Disconnect reason reported when the phone logs this device out.
pub const LOGOUT_REASON: &str = "LOGOUT";

const USER_SERVER: &str = "s.whatsapp.net";
const GROUP_SERVER: &str = "g.us";

/// The part of a client event the session lifecycle cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    Qr(String),
    Paired,
    Connected,
    LoggedOut(String),
    Dropped,
    Contact { jid: String, name: Option<String> },
}

impl Signal {
    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::PairingQrCode { code, .. } => Some(Self::Qr(code.clone())),
            Event::PairSuccess(_) => Some(Self::Paired),
            Event::Connected(_) => Some(Self::Connected),
            Event::LoggedOut(details) => Some(Self::LoggedOut(format!("{:?}", details))),
            Event::Disconnected(_) => Some(Self::Dropped),
            Event::ContactUpdate(update) => Some(Self::Contact {
                jid: update.jid.to_string(),
                name: update
                    .action
                    .full_name
                    .clone()
                    .or_else(|| update.action.first_name.clone()),
            }),
            other => {
                tracing::trace!("WhatsApp: unhandled event: {:?}", other);
                None
            }
        }
    }
}

/// Turns signals into provider events and keeps the synced address book.
struct EventRelay {
    events: ProviderEventSender,
    authenticated: bool,
    contacts: BTreeMap<String, RawContact>,
}

impl EventRelay {
    fn new(events: ProviderEventSender) -> Self {
        Self {
            events,
            authenticated: false,
            contacts: BTreeMap::new(),
        }
    }

    fn relay(&mut self, signal: Signal) {
        let mut out = Vec::with_capacity(2);
        match signal {
            Signal::Qr(code) => {
                tracing::info!("WhatsApp: QR code available (scan with your phone)");
                out.push(ProviderEvent::PairingCode(code));
            }
            Signal::Paired => {
                tracing::info!("WhatsApp: pairing successful");
                self.authenticated = true;
                out.push(ProviderEvent::Authenticated);
            }
            Signal::Connected => {
                // A stored device connects without a pairing step
                if !self.authenticated {
                    self.authenticated = true;
                    out.push(ProviderEvent::Authenticated);
                }
                tracing::info!("WhatsApp: connected successfully");
                out.push(ProviderEvent::Ready);
            }
            Signal::LoggedOut(details) => {
                tracing::warn!("WhatsApp: logged out: {}", details);
                self.authenticated = false;
                out.push(ProviderEvent::Disconnected(LOGOUT_REASON.to_string()));
            }
            Signal::Dropped => {
                tracing::warn!("WhatsApp: disconnected");
                out.push(ProviderEvent::Disconnected("connection closed".to_string()));
            }
            Signal::Contact { jid, name } => {
                if let Some(contact) = contact_from_jid(&jid, name) {
                    self.contacts.insert(contact.id.clone(), contact);
                }
            }
        }

        for event in out {
            if self.events.send(event).is_err() {
                tracing::debug!("WhatsApp: event receiver dropped");
                return;
            }
        }
    }

    fn contacts(&self) -> Vec<RawContact> {
        self.contacts.values().cloned().collect()
    }
}

/// Address-book entry for a phone-number or group JID; LID and other servers
/// are skipped.
fn contact_from_jid(jid: &str, name: Option<String>) -> Option<RawContact> {
    let (user, server) = jid.split_once('@')?;
    match server {
        GROUP_SERVER => Some(RawContact {
            name,
            number: user.to_string(),
            id: jid.to_string(),
            is_my_contact: false,
            is_group: true,
        }),
        USER_SERVER => {
            // Device suffixes (`user:3@server`) name the same account
            let user = user.split(':').next().unwrap_or(user);
            let address = RecipientAddress::parse(user).ok()?;
            Some(RawContact {
                is_my_contact: name.is_some(),
                name,
                number: address.digits().to_string(),
                id: address.chat_id(),
                is_group: false,
            })
        }
        _ => None,
    }
}

/// Protocol JID for a recipient in `@c.us` / `@g.us` notation.
fn jid_for(to: &RecipientAddress) -> String {
    let server = if to.domain() == GROUP_SERVER {
        GROUP_SERVER
    } else {
        USER_SERVER
    };
    format!("{}@{}", to.digits(), server)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Document,
}

impl MediaKind {
    fn for_mime(mime: &str) -> Self {
        match mime {
            "image/jpeg" | "image/png" | "image/webp" => Self::Image,
            _ => Self::Document,
        }
    }

    fn media_type(self) -> MediaType {
        match self {
            Self::Image => MediaType::Image,
            Self::Document => MediaType::Document,
        }
    }
}

/// Builds in-process client sessions over the store in `store_dir`.
pub struct WhatsAppClient {
    store_dir: PathBuf,
}

impl WhatsAppClient {
    pub fn new(store_dir: PathBuf) -> Self {
        Self { store_dir }
    }
}

struct Shared {
    client: Mutex<Option<Arc<Client>>>,
    relay: Mutex<EventRelay>,
}

#[async_trait]
impl Provider for WhatsAppClient {
    async fn connect(&self, events: ProviderEventSender) -> Result<Arc<dyn ProviderSession>> {
        let store = SessionStore::open(&self.store_dir)
            .await
            .map_err(|e| MessengerError::Provider(format!("Failed to open session store: {}", e)))?;

        match store.is_paired().await {
            Ok(true) => tracing::info!("WhatsApp: resuming paired device"),
            Ok(false) => tracing::info!("WhatsApp: no paired device, a QR code will follow"),
            Err(e) => tracing::warn!("WhatsApp: couldn't check device state: {}", e),
        }

        let shared = Arc::new(Shared {
            client: Mutex::new(None),
            relay: Mutex::new(EventRelay::new(events)),
        });

        let handler_shared = shared.clone();
        let mut bot = Bot::builder()
            .with_backend(Arc::new(store.clone()))
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, client| {
                let shared = handler_shared.clone();
                async move {
                    *shared.client.lock().await = Some(client);
                    if let Some(signal) = Signal::from_event(&event) {
                        shared.relay.lock().await.relay(signal);
                    }
                }
            })
            .build()
            .await
            .map_err(|e| MessengerError::Provider(format!("Failed to build WhatsApp client: {}", e)))?;

        let task = bot
            .run()
            .await
            .map_err(|e| MessengerError::Provider(format!("Failed to start WhatsApp client: {}", e)))?;

        Ok(Arc::new(WhatsAppSession {
            shared,
            task: Mutex::new(Some(task)),
            store,
        }))
    }
}

/// One running bot plus its store.
pub struct WhatsAppSession {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    store: SessionStore,
}

impl WhatsAppSession {
    async fn client(&self) -> Option<Arc<Client>> {
        self.shared.client.lock().await.clone()
    }

    async fn media_message(client: &Client, caption: &str, media: &MediaRef) -> std::result::Result<wa::Message, String> {
        let bytes = tokio::fs::read(&media.path)
            .await
            .map_err(|e| format!("Failed to read media {}: {}", media.path.display(), e))?;
        let mime = media.resolved_mime_type().to_string();
        let kind = MediaKind::for_mime(&mime);

        let upload = client
            .upload(bytes, kind.media_type())
            .await
            .map_err(|e| format!("Media upload failed: {}", e))?;
        let caption = (!caption.is_empty()).then(|| caption.to_string());

        Ok(match kind {
            MediaKind::Image => wa::Message {
                image_message: Some(Box::new(wa::message::ImageMessage {
                    url: Some(upload.url),
                    direct_path: Some(upload.direct_path),
                    media_key: Some(upload.media_key),
                    file_sha256: Some(upload.file_sha256),
                    file_enc_sha256: Some(upload.file_enc_sha256),
                    file_length: Some(upload.file_length),
                    mimetype: Some(mime),
                    caption,
                    ..Default::default()
                })),
                ..Default::default()
            },
            MediaKind::Document => {
                let file_name = media.resolved_file_name();
                wa::Message {
                    document_message: Some(Box::new(wa::message::DocumentMessage {
                        url: Some(upload.url),
                        direct_path: Some(upload.direct_path),
                        media_key: Some(upload.media_key),
                        file_sha256: Some(upload.file_sha256),
                        file_enc_sha256: Some(upload.file_enc_sha256),
                        file_length: Some(upload.file_length),
                        mimetype: Some(mime),
                        title: Some(file_name.clone()),
                        file_name: Some(file_name),
                        caption,
                        ..Default::default()
                    })),
                    ..Default::default()
                }
            }
        })
    }
}

#[async_trait]
impl ProviderSession for WhatsAppSession {
    async fn send(&self, to: &RecipientAddress, payload: &Payload) -> Result<()> {
        let failure = |reason: String| MessengerError::ProviderSendFailure {
            recipient: to.to_string(),
            reason,
        };

        let client = self
            .client()
            .await
            .ok_or_else(|| failure("client is not connected".to_string()))?;
        let jid: Jid = jid_for(to)
            .parse()
            .map_err(|e| failure(format!("Invalid JID: {}", e)))?;

        let message = match payload {
            Payload::Text { text } => wa::Message {
                conversation: Some(text.clone()),
                ..Default::default()
            },
            Payload::Media { text, media } => Self::media_message(&client, text, media)
                .await
                .map_err(failure)?,
        };

        client
            .send_message(jid, message)
            .await
            .map_err(|e| failure(e.to_string()))?;

        tracing::debug!("WhatsApp: sent to {}: {}", to, truncate_str(payload.body(), 50));
        Ok(())
    }

    /// Drops the connection. Credentials are removed by the store wipe that
    /// follows every logout.
    async fn logout(&self) -> Result<()> {
        match self.client().await {
            Some(client) => {
                client.disconnect().await;
                Ok(())
            }
            None => Err(MessengerError::Provider("client is not connected".to_string())),
        }
    }

    async fn destroy(&self) -> Result<()> {
        if let Some(client) = self.shared.client.lock().await.take() {
            client.disconnect().await;
        }
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        self.store.close().await;
        Ok(())
    }

    async fn contacts(&self) -> Result<Vec<RawContact>> {
        Ok(self.shared.relay.lock().await.contacts())
    }
}
