//! Personalized feed reads
//!
//! The feed is materialized into per-user rows by the aggregation pipeline;
//! this module is the read path: source-type filtering, score-descending
//! order and pagination.

use crate::error::Result;
use crate::models::{FeedSourceType, UserFeedEntry};
use crate::validation;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    user_id: String,
    bookmark_id: i64,
    source_type: String,
    source_id: Option<String>,
    score: f64,
    position: i32,
    viewed: bool,
    clicked: bool,
    created_at: DateTime<Utc>,
}

impl FeedRow {
    fn into_domain(self) -> Result<UserFeedEntry> {
        Ok(UserFeedEntry {
            id: self.id,
            user_id: self.user_id,
            bookmark_id: self.bookmark_id,
            source_type: FeedSourceType::parse(&self.source_type)?,
            source_id: self.source_id,
            score: self.score,
            position: self.position,
            viewed: self.viewed,
            clicked: self.clicked,
            created_at: self.created_at,
        })
    }
}

/// Read a user's feed: best score first, newest breaking ties. A source
/// type of `all` (or none) returns every source.
pub async fn generate_feed(
    pool: &PgPool,
    user_id: &str,
    source_type: Option<FeedSourceType>,
    limit: i64,
    offset: i64,
) -> Result<Vec<UserFeedEntry>> {
    validation::validate_user_id(user_id)?;
    let limit = validation::validate_limit(limit);
    let offset = offset.max(0);

    let filter = match source_type {
        Some(FeedSourceType::All) | None => None,
        Some(other) => Some(other),
    };

    let rows = match filter {
        Some(source) => {
            sqlx::query_as::<_, FeedRow>(
                r#"
                SELECT id, user_id, bookmark_id, source_type, source_id,
                       score, position, viewed, clicked, created_at
                FROM user_feed
                WHERE user_id = $1 AND source_type = $2
                ORDER BY score DESC, created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(user_id)
            .bind(source.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, FeedRow>(
                r#"
                SELECT id, user_id, bookmark_id, source_type, source_id,
                       score, position, viewed, clicked, created_at
                FROM user_feed
                WHERE user_id = $1
                ORDER BY score DESC, created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    debug!(user_id, count = rows.len(), "feed read");
    rows.into_iter().map(FeedRow::into_domain).collect()
}
