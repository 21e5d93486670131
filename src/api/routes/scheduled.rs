//! Scheduled dispatch routes.

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::parse_recipients;
use crate::api::upload::{UploadForm, read_upload_form};
use crate::api::{ApiError, ApiJson, AppState};
use crate::channels::Payload;
use crate::scheduler::{DispatchJob, JobId};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/schedule-message", post(schedule_message))
        .route("/schedule-media", post(schedule_media))
        .route("/scheduled-messages", get(list_scheduled))
        .route("/cancel-scheduled", post(cancel_scheduled))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub recipients: Vec<String>,
    pub payload: Payload,
    pub fire_at: DateTime<Utc>,
}

/// The `data` field of a `schedule-media` form.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMediaData {
    pub recipients: Vec<String>,
    #[serde(default)]
    pub text: String,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub success: bool,
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub job: DispatchJob,
}

async fn schedule_message(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ScheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    // Attachments must come through schedule-media so the job owns an uploaded copy
    if req.payload.media().is_some() {
        return Err(ApiError::bad_request(
            "Media payloads must be uploaded through schedule-media",
        ));
    }
    let recipients = parse_recipients(&req.recipients)?;
    let job_id = state.scheduler.schedule(recipients, req.payload, req.fire_at)?;
    Ok(Json(ScheduleResponse {
        success: true,
        job_id,
    }))
}

fn schedule_uploaded(state: &AppState, form: &mut UploadForm) -> Result<JobId, ApiError> {
    let data: ScheduleMediaData = serde_json::from_str(form.required("data")?)
        .map_err(|e| ApiError::bad_request(format!("Invalid data field: {}", e)))?;
    let recipients = parse_recipients(&data.recipients)?;
    let payload = Payload::Media {
        text: data.text,
        media: form.upload()?.media_ref(),
    };
    let job_id = state
        .scheduler
        .schedule_owning_media(recipients, payload, data.fire_at)?;
    // The job owns the file from here on
    form.take_upload();
    Ok(job_id)
}

/// Multipart: `data` (JSON `{recipients, text, fireAt}`) and the `media` file.
async fn schedule_media(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let mut form = read_upload_form(multipart, &state.uploads_dir, state.max_upload_bytes).await?;
    let result = schedule_uploaded(&state, &mut form);
    form.discard().await;
    let job_id = result?;
    Ok(Json(ScheduleResponse {
        success: true,
        job_id,
    }))
}

async fn list_scheduled(State(state): State<Arc<AppState>>) -> Json<Vec<DispatchJob>> {
    Json(state.scheduler.list_jobs())
}

async fn cancel_scheduled(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let job = state.scheduler.cancel(req.job_id).await?;
    Ok(Json(CancelResponse { success: true, job }))
}
