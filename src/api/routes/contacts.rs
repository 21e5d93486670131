//! Contact listing and segment tags.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{ApiError, ApiJson, AppState};
use crate::contacts::{Contact, reconcile};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/contacts", get(list_contacts))
        .route("/update-segments", post(update_segments))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSegmentsRequest {
    /// Contact id or normalized number to tag; an empty tag clears it
    pub segments: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateSegmentsResponse {
    pub success: bool,
    pub total: usize,
}

/// Reconciled address book, 503 until the session is ready
async fn list_contacts(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Contact>>, ApiError> {
    let raw = state.session.contacts().await?;
    let segments = state.segments.snapshot().await;
    let contacts = reconcile(&raw, &segments);
    tracing::info!("Reconciled {} raw contact(s) into {}", raw.len(), contacts.len());
    Ok(Json(contacts))
}

async fn update_segments(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<UpdateSegmentsRequest>,
) -> Result<Json<UpdateSegmentsResponse>, ApiError> {
    let total = state.segments.update(req.segments).await?;
    Ok(Json(UpdateSegmentsResponse {
        success: true,
        total,
    }))
}
