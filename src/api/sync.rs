//! Sync fabric endpoints

use crate::api::{ok, ApiResponse, AppState, AuthUser};
use crate::error::Result;
use crate::models::{OfflineQueuedChange, SyncEvent, SyncState};
use crate::sync::service;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/state", get(get_state).put(put_state))
        .route("/sync/events", post(create_event))
        .route("/sync/delta", get(get_delta))
        .route(
            "/sync/offline-queue",
            post(queue_offline).get(list_offline),
        )
        .route("/sync/offline-queue/process", post(process_offline))
}

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    device_id: String,
}

async fn get_state(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<ApiResponse<SyncState>>> {
    let checkpoint = service::get_state(state.db.pool(), &user_id, &query.device_id).await?;
    Ok(ok("sync state", checkpoint))
}

#[derive(Debug, Deserialize)]
struct UpdateStateBody {
    device_id: String,
    last_sync_time: DateTime<Utc>,
}

async fn put_state(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<UpdateStateBody>,
) -> Result<Json<ApiResponse<SyncState>>> {
    let checkpoint = service::update_state(
        state.db.pool(),
        &user_id,
        &body.device_id,
        body.last_sync_time,
    )
    .await?;
    Ok(ok("sync state updated", checkpoint))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<service::CreateEventRequest>,
) -> Result<Json<ApiResponse<SyncEvent>>> {
    let event =
        service::create_event(state.db.pool(), &state.broker, &user_id, request).await?;
    Ok(ok("sync event recorded", event))
}

#[derive(Debug, Deserialize)]
struct DeltaQuery {
    device_id: String,
    last_sync_time: DateTime<Utc>,
}

async fn get_delta(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<DeltaQuery>,
) -> Result<Json<ApiResponse<Vec<SyncEvent>>>> {
    let events = service::delta(
        state.db.pool(),
        &user_id,
        &query.device_id,
        query.last_sync_time,
    )
    .await?;
    Ok(ok("sync delta", events))
}

async fn queue_offline(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<service::QueueOfflineRequest>,
) -> Result<Json<ApiResponse<OfflineQueuedChange>>> {
    let queued = service::queue_offline(state.db.pool(), &user_id, request).await?;
    Ok(ok("offline change queued", queued))
}

async fn list_offline(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<ApiResponse<Vec<OfflineQueuedChange>>>> {
    let pending = service::list_offline(state.db.pool(), &user_id, &query.device_id).await?;
    Ok(ok("offline queue", pending))
}

async fn process_offline(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<ApiResponse<service::OfflineProcessOutcome>>> {
    let outcome = service::process_offline(
        state.db.pool(),
        &state.broker,
        &user_id,
        &query.device_id,
    )
    .await?;
    Ok(ok("offline queue processed", outcome))
}
