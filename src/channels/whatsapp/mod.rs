//! WhatsApp Integration
//!
//! Runs the WhatsApp multi-device client in-process. Credentials live in a
//! SQLite store inside the session directory, and pairing codes arrive as QR
//! payloads that can be rendered in the terminal for scanning.

mod client;
mod qr;
mod store;

pub use client::{LOGOUT_REASON, UNPAIRED_STATES, WhatsAppClient, WhatsAppSession};
pub use qr::render_qr_unicode;
pub use store::{STORE_FILE, SessionStore};
