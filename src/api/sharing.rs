//! Sharing and collaboration endpoints

use crate::api::{ok, ApiResponse, AppState, AuthUser};
use crate::error::Result;
use crate::models::{ActivityType, CollectionFork, CollectionShare, ShareActivity};
use crate::sharing::{collab, fork, shares};
use crate::sync::RealtimeMessage;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shares", post(create_share).get(list_own_shares))
        .route("/shared/:token", get(resolve_share))
        .route("/shares/:id", put(update_share).delete(delete_share))
        .route("/shares/:id/activity", get(share_activity))
        .route("/collections/:id/shares", get(collection_shares))
        .route("/collections/:id/fork", post(fork_collection))
        .route("/collections/:id/collaborators", post(invite_collaborator))
        .route("/collaborations/:id/accept", post(accept_collaboration))
        .route("/collaborations/:id/decline", post(decline_collaboration))
}

/// Tell the acting user's other devices that shared state changed. Fan-out
/// is best-effort; durable rows are the source of truth.
fn notify(state: &AppState, user_id: &str, event: serde_json::Value) {
    state
        .broker
        .broadcast(user_id, None, &RealtimeMessage::sync_event(event));
}

#[derive(Debug, Deserialize)]
struct CreateShareBody {
    collection_id: i64,
    #[serde(flatten)]
    share: shares::CreateShareRequest,
}

async fn create_share(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateShareBody>,
) -> Result<Json<ApiResponse<CollectionShare>>> {
    let share =
        shares::create_share(state.db.pool(), &user_id, body.collection_id, body.share).await?;
    notify(
        &state,
        &user_id,
        json!({ "event_type": "share", "action": "create", "share_id": share.id }),
    );
    Ok(ok("share created", share))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    crate::validation::DEFAULT_LIMIT
}

async fn list_own_shares(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<CollectionShare>>>> {
    let rows =
        shares::list_for_user(state.db.pool(), &user_id, page.limit, page.offset).await?;
    Ok(ok("shares", rows))
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    password: Option<String>,
}

async fn resolve_share(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<ResolveQuery>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<CollectionShare>>> {
    let share =
        shares::get_by_token(state.db.pool(), &token, query.password.as_deref()).await?;

    // The resolve itself is the view; recording it never fails the read
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim().to_string());
    let user_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if let Err(e) = shares::record_activity(
        state.db.pool(),
        share.id,
        None,
        ActivityType::View,
        ip.as_deref(),
        user_agent.as_deref(),
        None,
    )
    .await
    {
        warn!(share_id = share.id, "failed to record share view: {}", e);
    }

    Ok(ok("share", share))
}

async fn update_share(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(share_id): Path<i64>,
    Json(request): Json<shares::UpdateShareRequest>,
) -> Result<Json<ApiResponse<CollectionShare>>> {
    let share = shares::update_share(state.db.pool(), &user_id, share_id, request).await?;
    notify(
        &state,
        &user_id,
        json!({ "event_type": "share", "action": "update", "share_id": share.id }),
    );
    Ok(ok("share updated", share))
}

async fn delete_share(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(share_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    shares::delete_share(state.db.pool(), &user_id, share_id).await?;
    notify(
        &state,
        &user_id,
        json!({ "event_type": "share", "action": "delete", "share_id": share_id }),
    );
    Ok(ok("share deleted", ()))
}

async fn share_activity(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(share_id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<ShareActivity>>>> {
    let log = shares::list_activity(state.db.pool(), &user_id, share_id, page.limit, page.offset)
        .await?;
    Ok(ok("share activity", log))
}

async fn collection_shares(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(collection_id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<CollectionShare>>>> {
    let rows = shares::list_for_collection(
        state.db.pool(),
        &user_id,
        collection_id,
        page.limit,
        page.offset,
    )
    .await?;
    Ok(ok("collection shares", rows))
}

async fn fork_collection(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(collection_id): Path<i64>,
    Json(request): Json<fork::ForkRequest>,
) -> Result<Json<ApiResponse<CollectionFork>>> {
    let forked =
        fork::fork_collection(state.db.pool(), &user_id, collection_id, request).await?;
    notify(
        &state,
        &user_id,
        json!({
            "event_type": "collection",
            "action": "create",
            "collection_id": forked.forked_collection_id,
            "forked_from": forked.original_collection_id,
        }),
    );
    Ok(ok("collection forked", forked))
}

async fn invite_collaborator(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(collection_id): Path<i64>,
    Json(request): Json<collab::AddCollaboratorRequest>,
) -> Result<Json<ApiResponse<crate::models::CollectionCollaborator>>> {
    let invite =
        collab::add_collaborator(state.db.pool(), &user_id, collection_id, request).await?;
    Ok(ok("collaborator invited", invite))
}

async fn accept_collaboration(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(collaborator_id): Path<i64>,
) -> Result<Json<ApiResponse<crate::models::CollectionCollaborator>>> {
    let invite =
        collab::accept_collaboration(state.db.pool(), &user_id, collaborator_id).await?;
    Ok(ok("collaboration accepted", invite))
}

async fn decline_collaboration(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(collaborator_id): Path<i64>,
) -> Result<Json<ApiResponse<crate::models::CollectionCollaborator>>> {
    let invite =
        collab::decline_collaboration(state.db.pool(), &user_id, collaborator_id).await?;
    Ok(ok("collaboration declined", invite))
}
