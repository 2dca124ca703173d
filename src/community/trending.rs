//! Trending computation
//!
//! Materializes per-window trending rows from the behavior log and keeps a
//! realtime sorted-set index per action. The windowed score is a weighted
//! sum of in-window actions multiplied by an exponential decay with a
//! 24-hour constant, so longer windows pay for their age.

use crate::cache::{trending_key, Cache};
use crate::error::Result;
use crate::models::{ActionType, TimeWindow, TrendingBookmark};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info};

/// Weight of each significant action in the raw trending score
pub fn action_weight(action: ActionType) -> f64 {
    match action {
        ActionType::View => 1.0,
        ActionType::Click => 2.0,
        ActionType::Save => 3.0,
        ActionType::Share => 4.0,
        ActionType::Like => 2.5,
        _ => 0.0,
    }
}

/// Exponential decay with a 24-hour constant
pub fn decay_factor(hours_since_window_start: f64) -> f64 {
    (-hours_since_window_start / 24.0).exp()
}

/// In-window action counters for one bookmark
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowCounters {
    pub views: i64,
    pub clicks: i64,
    pub saves: i64,
    pub shares: i64,
    pub likes: i64,
}

impl WindowCounters {
    pub fn apply(&mut self, action: ActionType) {
        match action {
            ActionType::View => self.views += 1,
            ActionType::Click => self.clicks += 1,
            ActionType::Save => self.saves += 1,
            ActionType::Share => self.shares += 1,
            ActionType::Like => self.likes += 1,
            _ => {}
        }
    }

    /// Weighted sum of the counters
    pub fn raw_score(&self) -> f64 {
        action_weight(ActionType::View) * self.views as f64
            + action_weight(ActionType::Click) * self.clicks as f64
            + action_weight(ActionType::Save) * self.saves as f64
            + action_weight(ActionType::Share) * self.shares as f64
            + action_weight(ActionType::Like) * self.likes as f64
    }
}

/// Windowed trending score: weighted counters decayed by window age
pub fn trending_score(counters: &WindowCounters, hours_since_window_start: f64) -> f64 {
    counters.raw_score() * decay_factor(hours_since_window_start)
}

#[derive(Debug, sqlx::FromRow)]
struct BehaviorActionRow {
    bookmark_id: i64,
    action: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TrendingRow {
    id: i64,
    bookmark_id: i64,
    views: i64,
    clicks: i64,
    saves: i64,
    shares: i64,
    likes: i64,
    trending_score: f64,
    time_window: String,
    calculated_at: DateTime<Utc>,
}

impl TrendingRow {
    fn into_domain(self) -> Result<TrendingBookmark> {
        Ok(TrendingBookmark {
            id: self.id,
            bookmark_id: self.bookmark_id,
            views: self.views,
            clicks: self.clicks,
            saves: self.saves,
            shares: self.shares,
            likes: self.likes,
            trending_score: self.trending_score,
            time_window: TimeWindow::parse(&self.time_window)?,
            calculated_at: self.calculated_at,
        })
    }
}

/// Recompute the trending rows for one window: fold in-window behaviors by
/// bookmark, score them and upsert. Returns the number of bookmarks scored;
/// an empty window produces no upserts.
pub async fn calculate(pool: &PgPool, window: TimeWindow) -> Result<usize> {
    let now = Utc::now();
    let window_start = now - window.length();

    let rows = sqlx::query_as::<_, BehaviorActionRow>(
        r#"
        SELECT bookmark_id, action
        FROM user_behaviors
        WHERE created_at > $1
          AND action IN ('view', 'click', 'save', 'share', 'like')
        "#,
    )
    .bind(window_start)
    .fetch_all(pool)
    .await?;

    let mut by_bookmark: HashMap<i64, WindowCounters> = HashMap::new();
    for row in rows {
        if let Ok(action) = ActionType::parse(&row.action) {
            by_bookmark.entry(row.bookmark_id).or_default().apply(action);
        }
    }

    let hours_since_window_start = (now - window_start).num_seconds() as f64 / 3600.0;

    for (bookmark_id, counters) in &by_bookmark {
        let score = trending_score(counters, hours_since_window_start);

        sqlx::query(
            r#"
            INSERT INTO trending_bookmarks
                (bookmark_id, views, clicks, saves, shares, likes,
                 trending_score, time_window, calculated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (bookmark_id, time_window) DO UPDATE SET
                views = EXCLUDED.views,
                clicks = EXCLUDED.clicks,
                saves = EXCLUDED.saves,
                shares = EXCLUDED.shares,
                likes = EXCLUDED.likes,
                trending_score = EXCLUDED.trending_score,
                calculated_at = EXCLUDED.calculated_at
            "#,
        )
        .bind(bookmark_id)
        .bind(counters.views)
        .bind(counters.clicks)
        .bind(counters.saves)
        .bind(counters.shares)
        .bind(counters.likes)
        .bind(score)
        .bind(window.as_str())
        .bind(now)
        .execute(pool)
        .await?;
    }

    info!(
        window = %window,
        bookmarks = by_bookmark.len(),
        "trending window recalculated"
    );

    Ok(by_bookmark.len())
}

/// Read the trending list for a window, highest score first
pub async fn list(
    pool: &PgPool,
    window: TimeWindow,
    min_score: Option<f64>,
    limit: i64,
) -> Result<Vec<TrendingBookmark>> {
    let rows = sqlx::query_as::<_, TrendingRow>(
        r#"
        SELECT id, bookmark_id, views, clicks, saves, shares, likes,
               trending_score, time_window, calculated_at
        FROM trending_bookmarks
        WHERE time_window = $1
          AND trending_score >= $2
        ORDER BY trending_score DESC
        LIMIT $3
        "#,
    )
    .bind(window.as_str())
    .bind(min_score.unwrap_or(0.0))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TrendingRow::into_domain).collect()
}

/// Record a significant action in the realtime sorted set for its action
/// type, scored by event time so readers can intersect recent windows.
pub async fn update_trending_cache(cache: &Cache, bookmark_id: i64, action: ActionType) {
    if !action.is_significant() {
        return;
    }

    let key = trending_key(action.as_str());
    cache
        .zadd(&key, Utc::now().timestamp() as f64, &bookmark_id.to_string())
        .await;
    debug!(bookmark_id, action = %action, "realtime trending updated");
}

/// Most recently active bookmarks for an action, newest first
pub async fn realtime_trending(cache: &Cache, action: ActionType, limit: i64) -> Vec<i64> {
    cache
        .zrevrange(&trending_key(action.as_str()), 0, limit - 1)
        .await
        .into_iter()
        .filter_map(|member| member.parse().ok())
        .collect()
}
