//! HTTP API
//!
//! Thin axum adapter over the session manager, the dispatch scheduler and the
//! contact store. Handlers parse and validate input, call exactly one domain
//! operation, and map [`MessengerError`](crate::error::MessengerError) onto a
//! status code with a `{success, message, code}` body.

mod error;
mod extract;
pub mod routes;
mod state;
pub mod upload;

pub use error::ApiError;
pub use extract::ApiJson;
pub use state::AppState;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and text fields on top of the file itself.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(routes::session::router())
        .merge(routes::messages::router())
        .merge(routes::scheduled::router())
        .merge(routes::contacts::router())
        .merge(routes::events::router());

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(
            state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
