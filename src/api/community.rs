//! Community endpoints

use crate::api::{ok, AdminUser, ApiResponse, AppState, AuthUser};
use crate::community::{behavior, feed, follows, metrics, recommend, trending};
use crate::error::Result;
use crate::models::{Algorithm, FeedSourceType, TimeWindow};
use crate::validation;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/community/behavior", post(track_behavior))
        .route("/community/follow", post(follow_user))
        .route("/community/follow/:user_id", delete(unfollow_user))
        .route("/community/recommendations", get(list_recommendations))
        .route(
            "/community/recommendations/generate",
            post(generate_recommendations),
        )
        .route("/community/trending", get(list_trending))
        .route("/community/trending/calculate", post(calculate_trending))
        .route("/community/feed", get(read_feed))
        .route("/community/metrics/:bookmark_id", get(bookmark_metrics))
        .route("/community/users/:user_id/stats", get(user_stats))
}

async fn track_behavior(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<behavior::TrackRequest>,
) -> Result<Json<ApiResponse<crate::models::UserBehavior>>> {
    let recorded = behavior::track(state.db.pool(), &state.workers, &user_id, request).await?;
    Ok(ok("behavior tracked", recorded))
}

#[derive(Debug, Deserialize)]
struct FollowBody {
    followee_id: String,
}

async fn follow_user(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<FollowBody>,
) -> Result<Json<ApiResponse<crate::models::UserFollow>>> {
    let edge = follows::follow(state.db.pool(), &state.cache, &user_id, &body.followee_id).await?;
    Ok(ok("follow created", edge))
}

async fn unfollow_user(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(followee_id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    follows::unfollow(state.db.pool(), &state.cache, &user_id, &followee_id).await?;
    Ok(ok("follow removed", ()))
}

#[derive(Debug, Deserialize)]
struct RecommendationsQuery {
    algorithm: Option<String>,
    context: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    validation::DEFAULT_LIMIT
}

async fn list_recommendations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<ApiResponse<Vec<recommend::RecommendationItem>>>> {
    let algorithm = match &query.algorithm {
        Some(value) => Some(Algorithm::parse(value)?),
        None => None,
    };

    let request = recommend::RecommendationRequest {
        user_id,
        algorithm,
        context: query.context,
        limit: query.limit,
    };
    let items = recommend::get(state.db.pool(), &state.cache, &request).await?;
    Ok(ok("recommendations", items))
}

#[derive(Debug, Deserialize)]
struct GenerateQuery {
    algorithm: String,
}

async fn generate_recommendations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<GenerateQuery>,
) -> Result<Json<ApiResponse<Vec<crate::models::BookmarkRecommendation>>>> {
    let algorithm = validation::validate_algorithm(&query.algorithm)?;
    let generated =
        recommend::generate(state.db.pool(), &state.cache, &user_id, algorithm).await?;
    Ok(ok("recommendations generated", generated))
}

#[derive(Debug, Deserialize)]
struct TrendingQuery {
    time_window: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    min_score: Option<f64>,
}

async fn list_trending(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendingQuery>,
) -> Result<Json<ApiResponse<Vec<crate::models::TrendingBookmark>>>> {
    let window = match &query.time_window {
        Some(value) => validation::validate_time_window(value)?,
        None => TimeWindow::Daily,
    };
    let limit = validation::validate_limit(query.limit);

    let rows = trending::list(state.db.pool(), window, query.min_score, limit).await?;
    Ok(ok("trending bookmarks", rows))
}

#[derive(Debug, Deserialize)]
struct CalculateQuery {
    time_window: String,
}

async fn calculate_trending(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<CalculateQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>> {
    let window = validation::validate_time_window(&query.time_window)?;
    let scored = trending::calculate(state.db.pool(), window).await?;
    Ok(ok(
        "trending window recalculated",
        serde_json::json!({ "time_window": window, "bookmarks_scored": scored }),
    ))
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    source_type: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

async fn read_feed(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<ApiResponse<Vec<crate::models::UserFeedEntry>>>> {
    let source_type = match &query.source_type {
        Some(value) => Some(FeedSourceType::parse(value)?),
        None => None,
    };

    let entries = feed::generate_feed(
        state.db.pool(),
        &user_id,
        source_type,
        query.limit,
        query.offset,
    )
    .await?;
    Ok(ok("feed", entries))
}

async fn bookmark_metrics(
    State(state): State<Arc<AppState>>,
    Path(bookmark_id): Path<i64>,
) -> Result<Json<ApiResponse<crate::models::SocialMetrics>>> {
    validation::validate_bookmark_id(bookmark_id)?;
    let aggregate = metrics::get_metrics(state.db.pool(), bookmark_id).await?;
    Ok(ok("social metrics", aggregate))
}

async fn user_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<follows::UserStats>>> {
    let stats = follows::get_user_stats(state.db.pool(), &state.cache, &user_id).await?;
    Ok(ok("user stats", stats))
}
