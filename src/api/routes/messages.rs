//! Immediate send routes.

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{SuccessResponse, parse_recipients};
use crate::api::upload::{UploadForm, read_upload_form};
use crate::api::{ApiError, ApiJson, AppState};
use crate::channels::Payload;
use crate::contacts::RecipientAddress;
use crate::error::MessengerError;
use crate::scheduler::{RecipientFailure, fan_out};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send", post(send_text))
        .route("/send-media", post(send_media))
        .route("/send-bulk", post(send_bulk))
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendBulkRequest {
    pub recipients: Vec<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendBulkResponse {
    pub success: bool,
    pub sent: usize,
    pub failures: Vec<RecipientFailure>,
}

async fn send_text(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SendTextRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let to = RecipientAddress::parse(&req.to)?;
    state.session.send(&to, &Payload::text(req.message)).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn send_uploaded(state: &AppState, form: &UploadForm) -> Result<(), ApiError> {
    let to = RecipientAddress::parse(form.required("to")?)?;
    let payload = Payload::Media {
        text: form.field("caption").unwrap_or_default().to_string(),
        media: form.upload()?.media_ref(),
    };
    state.session.send(&to, &payload).await?;
    Ok(())
}

/// Multipart: `to`, optional `caption`, and the `media` file.
async fn send_media(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<SuccessResponse>, ApiError> {
    let form = read_upload_form(multipart, &state.uploads_dir, state.max_upload_bytes).await?;
    let result = send_uploaded(&state, &form).await;
    // The temporary file goes away whatever happened
    form.discard().await;
    result.map(|()| Json(SuccessResponse::ok()))
}

async fn send_bulk(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SendBulkRequest>,
) -> Result<Json<SendBulkResponse>, ApiError> {
    let recipients = parse_recipients(&req.recipients)?;
    if !state.session.is_usable() {
        return Err(MessengerError::SessionUnavailable {
            state: state.session.current_state().to_string(),
        }
        .into());
    }

    let failures = fan_out(&state.session, &recipients, &Payload::text(req.message)).await;
    Ok(Json(SendBulkResponse {
        success: failures.is_empty(),
        sent: recipients.len() - failures.len(),
        failures,
    }))
}
