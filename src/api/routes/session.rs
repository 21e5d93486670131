//! Session status and control routes.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::{ApiError, AppState};
use crate::session::{ResetOutcome, SessionState, SessionStatus};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pairing-code", get(pairing_code))
        .route("/status", get(status))
        .route("/logout", post(logout))
        .route("/force-reset", post(force_reset))
        .route("/refresh-qr", get(refresh_pairing).post(refresh_pairing))
}

#[derive(Debug, Serialize)]
pub struct PairingCodeResponse {
    /// `null` until the provider issues a code
    pub code: Option<String>,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
    pub outcome: ResetOutcome,
}

async fn pairing_code(State(state): State<Arc<AppState>>) -> Json<PairingCodeResponse> {
    let status = state.session.status();
    Json(PairingCodeResponse {
        code: status.pairing_code,
        state: status.state,
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    Json(state.session.status())
}

fn reset_response(outcome: ResetOutcome, done: &str) -> Json<ResetResponse> {
    let message = match outcome {
        ResetOutcome::Completed => done.to_string(),
        ResetOutcome::AlreadyInProgress => {
            "A session reset is already in progress; wait for it to finish".to_string()
        }
    };
    Json(ResetResponse {
        success: true,
        message,
        outcome,
    })
}

async fn logout(State(state): State<Arc<AppState>>) -> Result<Json<ResetResponse>, ApiError> {
    let outcome = state.session.logout().await?;
    Ok(reset_response(
        outcome,
        "Session closed. Scan the new pairing code to continue.",
    ))
}

async fn force_reset(State(state): State<Arc<AppState>>) -> Result<Json<ResetResponse>, ApiError> {
    let outcome = state.session.force_reset().await?;
    Ok(reset_response(
        outcome,
        "Session reset. Scan the new pairing code to continue.",
    ))
}

async fn refresh_pairing(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, ApiError> {
    let outcome = state.session.refresh_pairing().await?;
    Ok(reset_response(
        outcome,
        "Session restarted. A new pairing code follows unless the device is still linked.",
    ))
}
