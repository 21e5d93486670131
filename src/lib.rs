//! wa-dispatcher - Bulk and Scheduled WhatsApp Messaging
//!
//! Keeps one WhatsApp Web session paired for the life of the process and
//! exposes it over HTTP for one-off sends, bulk sends, and deferred dispatch
//! jobs.
//!
//! ## Building blocks
//!
//! - **Session manager:** actor owning the provider handle; pairing, readiness,
//!   disconnect recovery and serialized resets
//! - **Store cleaner:** retrying removal of the on-disk session credentials
//! - **Dispatch scheduler:** timed multi-recipient jobs with cancellation
//! - **Contact reconciler:** one canonical number per address-book name
//! - **HTTP API:** axum routes plus a lifecycle event stream
//!
//! ## Quick Start
//!
//! ```bash
//! # Write ~/.config/wa-dispatcher/config.toml
//! wa-dispatcher init
//!
//! # Serve on 127.0.0.1:3001 and print the pairing QR
//! wa-dispatcher serve
//! ```

pub mod api;
pub mod app;
pub mod channels;
pub mod cli;
pub mod config;
pub mod contacts;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use error::{ErrorCode, MessengerError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
