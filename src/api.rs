//! HTTP endpoints for document management and administration

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::collab::{SessionInfo, Statistics};
use crate::error::Result;
use crate::models::{DocumentRecord, DocumentSummary, NewDocument, WorkflowStatus};
use crate::AppState;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRequest {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub document_id: String,
    pub old_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub document_id: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyResponse {
    pub document_id: String,
    pub block_id: String,
    pub previous_holder: Option<String>,
}

pub async fn create_document(
    State(state): State<Arc<AppState>>,
    Json(doc): Json<NewDocument>,
) -> Result<(StatusCode, Json<DocumentRecord>)> {
    let record = state.coordinator.store().create(doc).await?;
    tracing::info!(document_id = %record.id, "Document created");
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DocumentSummary>>> {
    Ok(Json(state.coordinator.store().list().await?))
}

pub async fn save_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<StatusCode> {
    state.coordinator.save(&document_id, &req.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<PublishResponse>> {
    let published_at = state.coordinator.publish(&document_id, &req.user_id).await?;
    Ok(Json(PublishResponse {
        document_id,
        published_at,
    }))
}

pub async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<SessionInfo>> {
    Ok(Json(state.coordinator.session_info(&document_id).await?))
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> Json<Statistics> {
    Json(state.coordinator.aggregate_statistics().await)
}

pub async fn force_disconnect(
    State(state): State<Arc<AppState>>,
    Path((document_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state
        .coordinator
        .force_disconnect(&document_id, &user_id, "Removed by an administrator")
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn lock_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let transition = state.coordinator.lock_document(&document_id, "admin").await?;
    Ok(Json(StatusResponse {
        document_id,
        old_status: transition.from,
        new_status: transition.to,
    }))
}

pub async fn unlock_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let transition = state
        .coordinator
        .unlock_document(&document_id, "admin")
        .await?;
    Ok(Json(StatusResponse {
        document_id,
        old_status: transition.from,
        new_status: transition.to,
    }))
}

pub async fn emergency_unlock(
    State(state): State<Arc<AppState>>,
    Path((document_id, block_id)): Path<(String, String)>,
    Json(req): Json<EmergencyRequest>,
) -> Result<Json<EmergencyResponse>> {
    let previous_holder = state
        .coordinator
        .emergency_release(&document_id, &block_id, &req.user_id, &req.role)
        .await?;
    Ok(Json(EmergencyResponse {
        document_id,
        block_id,
        previous_holder,
    }))
}
