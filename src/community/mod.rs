//! Community engagement engine
//!
//! Behavior ingestion and the aggregation that hangs off it.
//!
//! ## Architecture
//!
//! 1. **Behavior** - validates and durably records user actions, then hands
//!    follow-up aggregation to the worker pool
//! 2. **Metrics** - per-bookmark counters and derived engagement scores
//! 3. **Trending** - per-window scoring with time decay plus a realtime
//!    sorted-set index
//! 4. **Recommend** - five deterministic strategies with a cached read path
//! 5. **Follows** - the follow graph with cached per-user stats
//! 6. **Feed** - materialized per-user feed reads
//!
//! Aggregators are only reached from behavior tracking through worker jobs,
//! never called inline from the request path.

pub mod behavior;
pub mod feed;
pub mod follows;
pub mod metrics;
pub mod recommend;
pub mod trending;

use crate::cache::Cache;
use crate::error::Result;
use crate::worker::Job;
use sqlx::PgPool;
use std::sync::Arc;

/// Execute one deferred aggregation job. Wired into the worker pool at
/// startup so the pool itself stays free of domain knowledge.
pub async fn dispatch_job(pool: &PgPool, cache: &Arc<Cache>, job: Job) -> Result<()> {
    match job {
        Job::SocialMetricsUpdate {
            bookmark_id,
            action,
        } => metrics::update_metrics(pool, bookmark_id, action).await,
        Job::TrendingCacheUpdate {
            bookmark_id,
            action,
        } => {
            trending::update_trending_cache(cache, bookmark_id, action).await;
            Ok(())
        }
    }
}
