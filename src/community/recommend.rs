//! Recommendation engine
//!
//! Five deterministic strategies over observed behavior. Reads are served
//! through the cache with a 15 minute TTL; generation writes durable rows
//! that expire 24 hours after creation.
//!
//! The collaborative and content-based strategies are deliberately simple
//! heuristics over the user's recent activity; real similarity computation
//! is a separate concern and the stored reason data makes the provenance of
//! every row explicit.

use crate::cache::{recommendations_key, Cache, RECOMMENDATIONS_TTL};
use crate::community::{behavior, trending};
use crate::error::{Error, Result};
use crate::models::{Algorithm, BookmarkRecommendation, TimeWindow, TrendingBookmark, UserBehavior};
use crate::validation;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// How long generated recommendations stay servable
const RECOMMENDATION_LIFETIME_HOURS: i64 = 24;

/// Bookmarks produced by the trending and popularity strategies
const STRATEGY_BATCH: usize = 10;

/// Human-readable reason for each strategy
static REASON_TEXT: Lazy<HashMap<Algorithm, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            Algorithm::Collaborative,
            "People with similar activity saved this",
        ),
        (
            Algorithm::ContentBased,
            "Similar to bookmarks you have engaged with",
        ),
        (Algorithm::Trending, "Trending right now"),
        (Algorithm::Popularity, "Popular with the whole community"),
        (Algorithm::Category, "More from a category you engage with"),
        (Algorithm::Hybrid, "Picked for you from several signals"),
        (Algorithm::SimilarUsers, "Saved by users like you"),
    ])
});

/// Reason text for a strategy
pub fn reason_text(reason: Algorithm) -> &'static str {
    REASON_TEXT.get(&reason).copied().unwrap_or("Recommended for you")
}

/// Read request for cached recommendations
#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub user_id: String,
    pub algorithm: Option<Algorithm>,
    pub context: Option<String>,
    pub limit: i64,
}

/// One recommendation as served to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub id: i64,
    pub bookmark_id: i64,
    pub score: f64,
    pub reason_type: Algorithm,
    pub reason_text: String,
    pub reason_data: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

/// Feedback a user can leave on a served recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Viewed,
    Clicked,
    Dismissed,
}

#[derive(Debug, sqlx::FromRow)]
struct RecommendationRow {
    id: i64,
    bookmark_id: i64,
    score: f64,
    reason_type: String,
    reason_data: serde_json::Value,
    expires_at: DateTime<Utc>,
}

/// Cached read of a user's current recommendations
pub async fn get(
    pool: &PgPool,
    cache: &Cache,
    request: &RecommendationRequest,
) -> Result<Vec<RecommendationItem>> {
    validation::validate_user_id(&request.user_id)?;
    let limit = validation::validate_limit(request.limit);

    let key = recommendations_key(
        &request.user_id,
        request.algorithm.map(Algorithm::as_str),
        request.context.as_deref(),
    );

    cache
        .get_or_set(&key, RECOMMENDATIONS_TTL, || async {
            load_current(pool, &request.user_id, request.algorithm, limit).await
        })
        .await
}

async fn load_current(
    pool: &PgPool,
    user_id: &str,
    algorithm: Option<Algorithm>,
    limit: i64,
) -> Result<Vec<RecommendationItem>> {
    let rows = match algorithm {
        Some(algorithm) => {
            sqlx::query_as::<_, RecommendationRow>(
                r#"
                SELECT id, bookmark_id, score, reason_type, reason_data, expires_at
                FROM bookmark_recommendations
                WHERE user_id = $1 AND expires_at > NOW() AND reason_type = $2
                ORDER BY score DESC
                LIMIT $3
                "#,
            )
            .bind(user_id)
            .bind(algorithm.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, RecommendationRow>(
                r#"
                SELECT id, bookmark_id, score, reason_type, reason_data, expires_at
                FROM bookmark_recommendations
                WHERE user_id = $1 AND expires_at > NOW()
                ORDER BY score DESC
                LIMIT $2
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    let items = rows
        .into_iter()
        .map(|row| {
            let reason_type = Algorithm::parse(&row.reason_type)?;
            Ok(RecommendationItem {
                id: row.id,
                bookmark_id: row.bookmark_id,
                score: row.score,
                reason_type,
                reason_text: reason_text(reason_type).to_string(),
                reason_data: row.reason_data,
                expires_at: row.expires_at,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(user_id, count = items.len(), "loaded recommendations");
    Ok(items)
}

/// Generate fresh recommendations for a user with the given strategy and
/// persist them. Rows that fail validation or insertion are logged and
/// skipped; the remainder still lands.
pub async fn generate(
    pool: &PgPool,
    cache: &Cache,
    user_id: &str,
    algorithm: Algorithm,
) -> Result<Vec<BookmarkRecommendation>> {
    validation::validate_user_id(user_id)?;
    if !Algorithm::GENERATABLE.contains(&algorithm) {
        return Err(Error::InvalidAlgorithm {
            value: algorithm.to_string(),
        });
    }

    let behaviors = behavior::recent_for_user(pool, user_id, 100).await?;
    if behaviors.is_empty() {
        return Err(Error::InsufficientData);
    }
    let recent = distinct_bookmarks(&behaviors);

    let drafts = match algorithm {
        Algorithm::Collaborative => collaborative_drafts(&recent),
        Algorithm::ContentBased => content_drafts(&recent, Algorithm::ContentBased),
        Algorithm::Category => content_drafts(&recent, Algorithm::Category),
        Algorithm::Trending => {
            let rows = trending::list(pool, TimeWindow::Daily, None, STRATEGY_BATCH as i64).await?;
            trending_drafts(&rows)
        }
        Algorithm::Popularity => {
            let rows = popular_bookmarks(pool, STRATEGY_BATCH as i64).await?;
            popularity_drafts(&rows)
        }
        Algorithm::Hybrid => {
            let rows = trending::list(pool, TimeWindow::Daily, None, STRATEGY_BATCH as i64).await?;
            hybrid_drafts(&collaborative_drafts(&recent), &trending_drafts(&rows))
        }
        Algorithm::SimilarUsers => unreachable!("rejected above"),
    };

    let now = Utc::now();
    let expires_at = now + Duration::hours(RECOMMENDATION_LIFETIME_HOURS);
    let mut stored = Vec::with_capacity(drafts.len());

    for draft in drafts {
        let rec = BookmarkRecommendation {
            id: 0,
            user_id: user_id.to_string(),
            bookmark_id: draft.bookmark_id,
            score: draft.score,
            reason_type: draft.reason_type,
            reason_data: draft.reason_data,
            viewed: false,
            clicked: false,
            dismissed: false,
            expires_at,
            created_at: now,
        };

        if let Err(e) = rec.validate() {
            warn!(user_id, bookmark_id = rec.bookmark_id, "skipping invalid recommendation: {}", e);
            continue;
        }

        match insert_recommendation(pool, &rec).await {
            Ok(id) => stored.push(BookmarkRecommendation { id, ..rec }),
            Err(e) => {
                warn!(user_id, bookmark_id = rec.bookmark_id, "failed to store recommendation: {}", e);
            }
        }
    }

    // Fresh rows supersede whatever reads were cached for this user
    cache
        .delete_prefix(&format!("recommendations:{}:", user_id))
        .await;

    info!(
        user_id,
        algorithm = %algorithm,
        count = stored.len(),
        "recommendations generated"
    );

    Ok(stored)
}

/// Flag a served recommendation as viewed, clicked or dismissed
pub async fn record_feedback(
    pool: &PgPool,
    user_id: &str,
    recommendation_id: i64,
    feedback: Feedback,
) -> Result<()> {
    let column = match feedback {
        Feedback::Viewed => "viewed",
        Feedback::Clicked => "clicked",
        Feedback::Dismissed => "dismissed",
    };

    let result = sqlx::query(&format!(
        "UPDATE bookmark_recommendations SET {} = TRUE WHERE id = $1 AND user_id = $2",
        column
    ))
    .bind(recommendation_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::not_found("recommendation", recommendation_id));
    }
    Ok(())
}

// ---- Strategy drafts (pure functions over fetched inputs) ----

/// An unsaved recommendation produced by a strategy
#[derive(Debug, Clone)]
pub struct Draft {
    pub bookmark_id: i64,
    pub score: f64,
    pub reason_type: Algorithm,
    pub reason_data: serde_json::Value,
}

/// Collaborative placeholder: every recently acted-on bookmark at 0.7
pub fn collaborative_drafts(recent: &[i64]) -> Vec<Draft> {
    recent
        .iter()
        .map(|&bookmark_id| Draft {
            bookmark_id,
            score: 0.7,
            reason_type: Algorithm::Collaborative,
            reason_data: json!({ "similar_users": [], "based_on": "recent_activity" }),
        })
        .collect()
}

/// Content-based placeholder: tag-similarity stand-in at 0.6. Also backs the
/// category strategy, which differs only in its stored reason type.
pub fn content_drafts(recent: &[i64], reason_type: Algorithm) -> Vec<Draft> {
    recent
        .iter()
        .map(|&bookmark_id| Draft {
            bookmark_id,
            score: 0.6,
            reason_type,
            reason_data: json!({ "matching_tags": [] }),
        })
        .collect()
}

/// Daily trending rows scaled into [0, 1]
pub fn trending_drafts(rows: &[TrendingBookmark]) -> Vec<Draft> {
    rows.iter()
        .map(|row| Draft {
            bookmark_id: row.bookmark_id,
            score: trending_to_score(row.trending_score),
            reason_type: Algorithm::Trending,
            reason_data: json!({
                "trending_score": row.trending_score,
                "time_window": row.time_window,
            }),
        })
        .collect()
}

/// View-count leaders scaled into [0, 1]
pub fn popularity_drafts(rows: &[(i64, i64)]) -> Vec<Draft> {
    rows.iter()
        .map(|&(bookmark_id, views)| Draft {
            bookmark_id,
            score: views_to_score(views),
            reason_type: Algorithm::Popularity,
            reason_data: json!({ "views": views }),
        })
        .collect()
}

/// Blend: first five collaborative at 0.8 weight, then first five trending
/// at 0.6 weight, all rewritten to the hybrid reason type.
pub fn hybrid_drafts(collaborative: &[Draft], trending: &[Draft]) -> Vec<Draft> {
    let reweight = |draft: &Draft, weight: f64| Draft {
        bookmark_id: draft.bookmark_id,
        score: (draft.score * weight).clamp(0.0, 1.0),
        reason_type: Algorithm::Hybrid,
        reason_data: json!({
            "strategy": draft.reason_type,
            "source": draft.reason_data,
        }),
    };

    collaborative
        .iter()
        .take(5)
        .map(|d| reweight(d, 0.8))
        .chain(trending.iter().take(5).map(|d| reweight(d, 0.6)))
        .collect()
}

/// Scale a windowed trending score into [0, 1]
pub fn trending_to_score(trending_score: f64) -> f64 {
    (trending_score / 100.0).clamp(0.0, 1.0)
}

/// Scale a view count into [0, 1]
pub fn views_to_score(views: i64) -> f64 {
    (views as f64 / 1000.0).clamp(0.0, 1.0)
}

// ---- Database query helpers ----

async fn insert_recommendation(pool: &PgPool, rec: &BookmarkRecommendation) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO bookmark_recommendations
            (user_id, bookmark_id, score, reason_type, reason_data,
             viewed, clicked, dismissed, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, FALSE, FALSE, FALSE, $6, $7)
        RETURNING id
        "#,
    )
    .bind(&rec.user_id)
    .bind(rec.bookmark_id)
    .bind(rec.score)
    .bind(rec.reason_type.as_str())
    .bind(&rec.reason_data)
    .bind(rec.expires_at)
    .bind(rec.created_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Distinct bookmark ids from a newest-first behavior slice, keeping the
/// first (most recent) occurrence of each
pub fn distinct_bookmarks(behaviors: &[UserBehavior]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    behaviors
        .iter()
        .filter(|b| seen.insert(b.bookmark_id))
        .map(|b| b.bookmark_id)
        .collect()
}

async fn popular_bookmarks(pool: &PgPool, limit: i64) -> Result<Vec<(i64, i64)>> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT bookmark_id, views
        FROM social_metrics
        ORDER BY views DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_row(bookmark_id: i64, score: f64) -> TrendingBookmark {
        TrendingBookmark {
            id: 0,
            bookmark_id,
            views: 0,
            clicks: 0,
            saves: 0,
            shares: 0,
            likes: 0,
            trending_score: score,
            time_window: TimeWindow::Daily,
            calculated_at: Utc::now(),
        }
    }

    #[test]
    fn test_collaborative_placeholder_score() {
        let drafts = collaborative_drafts(&[1, 2, 3]);
        assert_eq!(drafts.len(), 3);
        assert!(drafts.iter().all(|d| (d.score - 0.7).abs() < 1e-9));
        assert!(drafts
            .iter()
            .all(|d| d.reason_type == Algorithm::Collaborative));
    }

    #[test]
    fn test_content_placeholder_score_and_category_variant() {
        let drafts = content_drafts(&[9], Algorithm::ContentBased);
        assert!((drafts[0].score - 0.6).abs() < 1e-9);

        let category = content_drafts(&[9], Algorithm::Category);
        assert_eq!(category[0].reason_type, Algorithm::Category);
    }

    #[test]
    fn test_trending_score_scaling() {
        assert!((trending_to_score(50.0) - 0.5).abs() < 1e-9);
        assert_eq!(trending_to_score(250.0), 1.0);
        assert_eq!(trending_to_score(0.0), 0.0);
    }

    #[test]
    fn test_views_score_scaling() {
        assert!((views_to_score(500) - 0.5).abs() < 1e-9);
        assert_eq!(views_to_score(5000), 1.0);
    }

    #[test]
    fn test_trending_drafts_are_in_range() {
        let rows = vec![trending_row(1, 30.0), trending_row(2, 900.0)];
        let drafts = trending_drafts(&rows);
        assert!((drafts[0].score - 0.3).abs() < 1e-9);
        assert_eq!(drafts[1].score, 1.0);
        for draft in &drafts {
            assert!((0.0..=1.0).contains(&draft.score));
        }
    }

    #[test]
    fn test_hybrid_blend_weights_and_reason_rewrite() {
        let collaborative = collaborative_drafts(&[1, 2, 3, 4, 5, 6, 7]);
        let trending = trending_drafts(&[trending_row(10, 100.0), trending_row(11, 50.0)]);

        let blended = hybrid_drafts(&collaborative, &trending);

        // Five collaborative entries then the two trending entries
        assert_eq!(blended.len(), 7);
        assert!((blended[0].score - 0.7 * 0.8).abs() < 1e-9);
        assert!((blended[5].score - 1.0 * 0.6).abs() < 1e-9);
        assert!((blended[6].score - 0.5 * 0.6).abs() < 1e-9);
        assert!(blended.iter().all(|d| d.reason_type == Algorithm::Hybrid));
        assert!(blended
            .iter()
            .all(|d| d.reason_data.get("strategy").is_some()));
    }

    #[test]
    fn test_distinct_bookmarks_keeps_recency_order() {
        let behavior = |bookmark_id: i64| UserBehavior {
            id: 0,
            user_id: "u-1".to_string(),
            bookmark_id,
            action: crate::models::ActionType::View,
            duration_secs: 0,
            context: None,
            metadata: None,
            created_at: Utc::now(),
        };

        let behaviors = vec![behavior(3), behavior(1), behavior(3), behavior(2)];
        assert_eq!(distinct_bookmarks(&behaviors), vec![3, 1, 2]);
    }

    #[test]
    fn test_reason_text_covers_all_strategies() {
        for algorithm in [
            Algorithm::Collaborative,
            Algorithm::ContentBased,
            Algorithm::Trending,
            Algorithm::Popularity,
            Algorithm::Category,
            Algorithm::Hybrid,
            Algorithm::SimilarUsers,
        ] {
            assert!(!reason_text(algorithm).is_empty());
        }
    }

    #[tokio::test]
    async fn test_generate_and_feedback_against_database() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();
        let cache = Cache::new();

        let user = format!("u-{}", rand::random::<u64>());

        // No history yet
        assert!(matches!(
            generate(&pool, &cache, &user, Algorithm::Collaborative).await,
            Err(Error::InsufficientData)
        ));

        sqlx::query(
            "INSERT INTO user_behaviors (user_id, bookmark_id, action, duration_secs, created_at)
             VALUES ($1, 42, 'view', 0, NOW())",
        )
        .bind(&user)
        .execute(&pool)
        .await
        .unwrap();

        let generated = generate(&pool, &cache, &user, Algorithm::Collaborative)
            .await
            .unwrap();
        assert_eq!(generated.len(), 1);
        assert!((generated[0].score - 0.7).abs() < 1e-9);

        let request = RecommendationRequest {
            user_id: user.clone(),
            algorithm: None,
            context: None,
            limit: 20,
        };
        let served = get(&pool, &cache, &request).await.unwrap();
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].bookmark_id, 42);

        record_feedback(&pool, &user, generated[0].id, Feedback::Clicked)
            .await
            .unwrap();
        let clicked = sqlx::query_scalar::<_, bool>(
            "SELECT clicked FROM bookmark_recommendations WHERE id = $1",
        )
        .bind(generated[0].id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(clicked);

        // Feedback on someone else's row is a not-found
        assert!(matches!(
            record_feedback(&pool, "intruder", generated[0].id, Feedback::Viewed).await,
            Err(Error::NotFound { .. })
        ));
    }
}
