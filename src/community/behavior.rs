//! Behavior tracking
//!
//! Validates and durably records user actions, then hands follow-up
//! aggregation to the worker pool. A full worker queue never fails the
//! track call: the behavior row is already committed and the aggregates
//! will catch up on the next relevant action.

use crate::error::Result;
use crate::models::{ActionType, UserBehavior};
use crate::validation;
use crate::worker::{Job, WorkerPool};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, warn};

/// Incoming track request
#[derive(Debug, Clone, Deserialize)]
pub struct TrackRequest {
    pub bookmark_id: i64,
    pub action: String,
    #[serde(default)]
    pub duration_secs: i64,
    pub context: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Record a behavior event and schedule the downstream aggregation
pub async fn track(
    pool: &PgPool,
    workers: &WorkerPool,
    user_id: &str,
    request: TrackRequest,
) -> Result<UserBehavior> {
    validation::validate_user_id(user_id)?;
    validation::validate_bookmark_id(request.bookmark_id)?;
    let action = validation::validate_action_type(&request.action)?;

    // Metadata is best-effort: anything that does not serialize to a JSON
    // object is dropped rather than failing the track call.
    let metadata = request.metadata.filter(|value| value.is_object());

    let behavior = UserBehavior {
        id: 0,
        user_id: user_id.to_string(),
        bookmark_id: request.bookmark_id,
        action,
        duration_secs: request.duration_secs,
        context: request.context,
        metadata,
        created_at: Utc::now(),
    };
    behavior.validate()?;

    let (id, created_at) = insert_behavior(pool, &behavior).await?;
    let behavior = UserBehavior {
        id,
        created_at,
        ..behavior
    };

    counter!("shelfmark_behaviors_total", "action" => action.as_str()).increment(1);
    debug!(
        user_id,
        bookmark_id = behavior.bookmark_id,
        action = %action,
        "behavior recorded"
    );

    // Aggregation is deferred; a saturated queue is logged and ignored.
    if let Err(e) = workers.submit(Job::SocialMetricsUpdate {
        bookmark_id: behavior.bookmark_id,
        action,
    }) {
        warn!(bookmark_id = behavior.bookmark_id, "metrics job not queued: {}", e);
    }

    if action.is_significant() {
        if let Err(e) = workers.submit(Job::TrendingCacheUpdate {
            bookmark_id: behavior.bookmark_id,
            action,
        }) {
            warn!(bookmark_id = behavior.bookmark_id, "trending job not queued: {}", e);
        }
    }

    Ok(behavior)
}

async fn insert_behavior(
    pool: &PgPool,
    behavior: &UserBehavior,
) -> Result<(i64, DateTime<Utc>)> {
    let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        INSERT INTO user_behaviors
            (user_id, bookmark_id, action, duration_secs, context, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        RETURNING id, created_at
        "#,
    )
    .bind(&behavior.user_id)
    .bind(behavior.bookmark_id)
    .bind(behavior.action.as_str())
    .bind(behavior.duration_secs)
    .bind(&behavior.context)
    .bind(&behavior.metadata)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Behaviors for a user, newest first. Used by recommendation generation.
pub async fn recent_for_user(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<UserBehavior>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        id: i64,
        user_id: String,
        bookmark_id: i64,
        action: String,
        duration_secs: i64,
        context: Option<String>,
        metadata: Option<serde_json::Value>,
        created_at: DateTime<Utc>,
    }

    let rows = sqlx::query_as::<_, Row>(
        r#"
        SELECT id, user_id, bookmark_id, action, duration_secs, context, metadata, created_at
        FROM user_behaviors
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(UserBehavior {
                id: row.id,
                user_id: row.user_id,
                bookmark_id: row.bookmark_id,
                action: ActionType::parse(&row.action)?,
                duration_secs: row.duration_secs,
                context: row.context,
                metadata: row.metadata,
                created_at: row.created_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str) -> TrackRequest {
        TrackRequest {
            bookmark_id: 42,
            action: action.to_string(),
            duration_secs: 0,
            context: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_track_rejects_bad_input_before_touching_storage() {
        // A pool pointed at nothing: validation must fail first
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unreachable").unwrap();
        let workers = WorkerPool::start(1, 4, |_job| async { Ok(()) });

        let err = track(&pool, &workers, "", request("view")).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidUserId));

        let err = track(
            &pool,
            &workers,
            "u-1",
            TrackRequest {
                bookmark_id: 0,
                ..request("view")
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidBookmarkId));

        let err = track(&pool, &workers, "u-1", request("teleport"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidAction { .. }));

        workers.stop().await;
    }

    #[tokio::test]
    async fn test_track_submits_jobs_per_action_class() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let trending_jobs = Arc::new(AtomicUsize::new(0));
        let seen = trending_jobs.clone();
        let workers = WorkerPool::start(1, 16, move |job| {
            let seen = seen.clone();
            async move {
                if matches!(job, Job::TrendingCacheUpdate { .. }) {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        });

        // Significant action queues both jobs, dismiss only the metrics one
        track(&pool, &workers, "u-track", request("view")).await.unwrap();
        track(&pool, &workers, "u-track", request("dismiss")).await.unwrap();
        workers.stop().await;

        assert_eq!(trending_jobs.load(Ordering::SeqCst), 1);
    }
}
