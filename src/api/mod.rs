//! HTTP API surface
//!
//! Axum routers for the community, sharing and sync subsystems under
//! `/api/v1`, plus the WebSocket upgrade and the health endpoint. Request
//! identity arrives as an opaque `x-user-id` header; token validation is
//! the gateway's job and out of scope here.

pub mod community;
pub mod sharing;
pub mod sync;
pub mod ws;

use crate::cache::Cache;
use crate::config::Config;
use crate::database::Database;
use crate::sync::Broker;
use crate::worker::WorkerPool;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub cache: Arc<Cache>,
    pub workers: Arc<WorkerPool>,
    pub broker: Arc<Broker>,
}

/// Success envelope for API responses
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
    pub request_id: String,
}

/// Wrap a payload in the success envelope
pub fn ok<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.to_string(),
        data,
        request_id: uuid::Uuid::new_v4().to_string(),
    })
}

/// Authenticated caller, extracted from the `x-user-id` header the gateway
/// sets after validating the bearer token
pub struct AuthUser(pub String);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = crate::error::Error;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|value| AuthUser(value.to_string()))
            .ok_or_else(|| crate::error::Error::unauthorized("missing user identity"))
    }
}

/// Caller with the admin role (`x-user-role: admin`)
pub struct AdminUser(pub String);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = crate::error::Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        let role = parts
            .headers
            .get("x-user-role")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if role != "admin" {
            return Err(crate::error::Error::forbidden("admin role required"));
        }
        Ok(AdminUser(user_id))
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
}

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(community::router())
        .merge(sharing::router())
        .merge(sync::router());

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .nest("/api/v1", api)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.api.request_timeout))
        .layer(CompressionLayer::new());

    if state.config.api.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// Start the API server
pub async fn start_server(state: Arc<AppState>) -> crate::error::Result<()> {
    let addr = format!("{}:{}", state.config.api.host, state.config.api.port);
    let app = router(state);

    info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::Error::config(format!("failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(crate::error::Error::internal)?;

    Ok(())
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match state.db.health_check().await {
        Ok(()) => "healthy".to_string(),
        Err(e) => format!("unhealthy: {}", e),
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    })
}
