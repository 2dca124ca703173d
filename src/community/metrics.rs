//! Social metrics aggregation
//!
//! Maintains the per-bookmark counter row and its derived scores. Counter
//! bumps are single atomic upserts so concurrent workers targeting the same
//! bookmark never lose increments; the derived fields are recomputed from
//! the committed counters in a second atomic statement.

use crate::error::{Error, Result};
use crate::models::{ActionType, SocialMetrics};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct MetricsRow {
    bookmark_id: i64,
    views: i64,
    clicks: i64,
    saves: i64,
    shares: i64,
    likes: i64,
    unique_viewers: i64,
    engagement_rate: f64,
    virality_score: f64,
    quality_score: f64,
    last_calculated: Option<DateTime<Utc>>,
}

impl From<MetricsRow> for SocialMetrics {
    fn from(row: MetricsRow) -> Self {
        SocialMetrics {
            bookmark_id: row.bookmark_id,
            views: row.views,
            clicks: row.clicks,
            saves: row.saves,
            shares: row.shares,
            likes: row.likes,
            unique_viewers: row.unique_viewers,
            engagement_rate: row.engagement_rate,
            virality_score: row.virality_score,
            quality_score: row.quality_score,
            last_calculated: row.last_calculated,
        }
    }
}

/// Fetch the aggregate for a bookmark
pub async fn get_metrics(pool: &PgPool, bookmark_id: i64) -> Result<SocialMetrics> {
    let row = sqlx::query_as::<_, MetricsRow>(
        r#"
        SELECT bookmark_id, views, clicks, saves, shares, likes, unique_viewers,
               engagement_rate, virality_score, quality_score, last_calculated
        FROM social_metrics
        WHERE bookmark_id = $1
        "#,
    )
    .bind(bookmark_id)
    .fetch_optional(pool)
    .await?;

    row.map(SocialMetrics::from)
        .ok_or_else(|| Error::not_found("bookmark", bookmark_id))
}

/// Apply one action to a bookmark's aggregate: bump the matching counter
/// (creating the row lazily), refresh unique viewers on views, then
/// recompute the derived scores from the committed counters.
pub async fn update_metrics(pool: &PgPool, bookmark_id: i64, action: ActionType) -> Result<()> {
    let (views, clicks, saves, shares, likes) = one_hot(action);

    sqlx::query(
        r#"
        INSERT INTO social_metrics
            (bookmark_id, views, clicks, saves, shares, likes, unique_viewers,
             engagement_rate, virality_score, quality_score, last_calculated)
        VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, 0, NOW())
        ON CONFLICT (bookmark_id) DO UPDATE SET
            views = social_metrics.views + EXCLUDED.views,
            clicks = social_metrics.clicks + EXCLUDED.clicks,
            saves = social_metrics.saves + EXCLUDED.saves,
            shares = social_metrics.shares + EXCLUDED.shares,
            likes = social_metrics.likes + EXCLUDED.likes,
            last_calculated = NOW()
        "#,
    )
    .bind(bookmark_id)
    .bind(views)
    .bind(clicks)
    .bind(saves)
    .bind(shares)
    .bind(likes)
    .execute(pool)
    .await?;

    // Unique viewers come from the behavior log, so the count stays exact
    // under concurrent updates.
    if action == ActionType::View {
        sqlx::query(
            r#"
            UPDATE social_metrics SET unique_viewers = (
                SELECT COUNT(DISTINCT user_id)
                FROM user_behaviors
                WHERE bookmark_id = $1 AND action = 'view'
            )
            WHERE bookmark_id = $1
            "#,
        )
        .bind(bookmark_id)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE social_metrics SET
            engagement_rate = CASE WHEN views > 0
                THEN (clicks + saves + shares + likes)::float8 / views
                ELSE 0 END,
            virality_score = 2.0 * shares + 1.5 * saves,
            quality_score = CASE WHEN views > 0
                THEN 0.6 * ((clicks + saves + shares + likes)::float8 / views)
                     + 0.4 * (likes::float8 / views)
                ELSE 0 END
        WHERE bookmark_id = $1
        "#,
    )
    .bind(bookmark_id)
    .execute(pool)
    .await?;

    debug!(bookmark_id, action = %action, "social metrics updated");
    Ok(())
}

/// One-hot counter deltas for an action; non-counter actions contribute nothing
fn one_hot(action: ActionType) -> (i64, i64, i64, i64, i64) {
    match action {
        ActionType::View => (1, 0, 0, 0, 0),
        ActionType::Click => (0, 1, 0, 0, 0),
        ActionType::Save => (0, 0, 1, 0, 0),
        ActionType::Share => (0, 0, 0, 1, 0),
        ActionType::Like => (0, 0, 0, 0, 1),
        _ => (0, 0, 0, 0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot_counters() {
        assert_eq!(one_hot(ActionType::View), (1, 0, 0, 0, 0));
        assert_eq!(one_hot(ActionType::Share), (0, 0, 0, 1, 0));
        assert_eq!(one_hot(ActionType::Dismiss), (0, 0, 0, 0, 0));
        assert_eq!(one_hot(ActionType::Report), (0, 0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_metrics_flow_against_database() {
        // This test requires a running database
        // Skip in CI without database
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        let bookmark_id = rand::random::<u32>() as i64 + 1;
        for _ in 0..3 {
            update_metrics(&pool, bookmark_id, ActionType::View)
                .await
                .unwrap();
        }
        update_metrics(&pool, bookmark_id, ActionType::Share)
            .await
            .unwrap();

        let metrics = get_metrics(&pool, bookmark_id).await.unwrap();
        assert_eq!(metrics.views, 3);
        assert_eq!(metrics.shares, 1);
        assert!((metrics.engagement_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((metrics.virality_score - 2.0).abs() < 1e-9);
        assert!((metrics.quality_score - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_get_metrics_missing_bookmark() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        let missing = i64::MAX - rand::random::<u16>() as i64;
        assert!(matches!(
            get_metrics(&pool, missing).await,
            Err(Error::NotFound { .. })
        ));
    }
}
