//! Follow graph
//!
//! Follow/unfollow with uniqueness and self-follow rejection, plus cached
//! per-user stats. Both sides' stats entries are invalidated before a
//! mutation returns, so the next read recomputes from committed rows.

use crate::cache::{user_stats_key, Cache, USER_STATS_TTL};
use crate::error::{Error, Result};
use crate::models::{FollowStatus, UserFollow};
use crate::validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info};

/// Weight of the follower count in the influence score
const INFLUENCE_FOLLOWERS_WEIGHT: f64 = 0.7;

/// Weight of total engagement in the influence score. Engagement data is
/// not wired in yet; the term stays in the formula for when it is.
const INFLUENCE_ENGAGEMENT_WEIGHT: f64 = 0.3;

/// Aggregated follow stats for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub followers_count: i64,
    pub following_count: i64,
    pub influence_score: f64,
}

/// influence = 0.7 · followers + 0.3 · total engagement
pub fn influence_score(followers: i64, total_engagement: f64) -> f64 {
    INFLUENCE_FOLLOWERS_WEIGHT * followers as f64
        + INFLUENCE_ENGAGEMENT_WEIGHT * total_engagement
}

/// Create an active follow edge from `follower_id` to `followee_id`
pub async fn follow(
    pool: &PgPool,
    cache: &Cache,
    follower_id: &str,
    followee_id: &str,
) -> Result<UserFollow> {
    validation::validate_user_id(follower_id)?;
    validation::validate_user_id(followee_id)?;
    if follower_id == followee_id {
        return Err(Error::CannotFollowSelf);
    }

    if find_follow(pool, follower_id, followee_id).await?.is_some() {
        return Err(Error::AlreadyFollowing);
    }

    let follow = UserFollow {
        id: 0,
        follower_id: follower_id.to_string(),
        followee_id: followee_id.to_string(),
        status: FollowStatus::Active,
        created_at: Utc::now(),
    };
    follow.validate()?;

    let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        INSERT INTO user_follows (follower_id, followee_id, status, created_at)
        VALUES ($1, $2, $3, NOW())
        RETURNING id, created_at
        "#,
    )
    .bind(follower_id)
    .bind(followee_id)
    .bind(FollowStatus::Active.as_str())
    .fetch_one(pool)
    .await?;

    invalidate_stats(cache, follower_id, followee_id).await;
    info!(follower_id, followee_id, "follow created");

    Ok(UserFollow {
        id,
        created_at,
        ..follow
    })
}

/// Remove the follow edge from `follower_id` to `followee_id`
pub async fn unfollow(
    pool: &PgPool,
    cache: &Cache,
    follower_id: &str,
    followee_id: &str,
) -> Result<()> {
    validation::validate_user_id(follower_id)?;
    validation::validate_user_id(followee_id)?;
    if follower_id == followee_id {
        return Err(Error::CannotFollowSelf);
    }

    if find_follow(pool, follower_id, followee_id).await?.is_none() {
        return Err(Error::NotFollowing);
    }

    sqlx::query("DELETE FROM user_follows WHERE follower_id = $1 AND followee_id = $2")
        .bind(follower_id)
        .bind(followee_id)
        .execute(pool)
        .await?;

    invalidate_stats(cache, follower_id, followee_id).await;
    info!(follower_id, followee_id, "follow removed");
    Ok(())
}

/// Follower/following counts with the derived influence score, served
/// through the cache with a 30 minute TTL
pub async fn get_user_stats(pool: &PgPool, cache: &Cache, user_id: &str) -> Result<UserStats> {
    validation::validate_user_id(user_id)?;

    let key = user_stats_key(user_id);
    cache
        .get_or_set(&key, USER_STATS_TTL, || async {
            compute_user_stats(pool, user_id).await
        })
        .await
}

async fn compute_user_stats(pool: &PgPool, user_id: &str) -> Result<UserStats> {
    let followers = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM user_follows WHERE followee_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let following = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM user_follows WHERE follower_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    debug!(user_id, followers, following, "user stats computed");

    Ok(UserStats {
        user_id: user_id.to_string(),
        followers_count: followers,
        following_count: following,
        influence_score: influence_score(followers, 0.0),
    })
}

async fn find_follow(
    pool: &PgPool,
    follower_id: &str,
    followee_id: &str,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM user_follows WHERE follower_id = $1 AND followee_id = $2",
    )
    .bind(follower_id)
    .bind(followee_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

async fn invalidate_stats(cache: &Cache, follower_id: &str, followee_id: &str) {
    cache
        .delete(&[
            user_stats_key(follower_id).as_str(),
            user_stats_key(followee_id).as_str(),
        ])
        .await;
}
