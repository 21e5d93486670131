//! Health check endpoint.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::api::AppState;
use crate::session::SessionState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub whatsapp: &'static str,
    pub state: SessionState,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let session_state = state.session.current_state();
    Json(HealthStatus {
        status: "OK",
        whatsapp: if session_state.is_usable() {
            "connected"
        } else {
            "disconnected"
        },
        state: session_state,
    })
}
