//! Collection forking
//!
//! Creates a private copy of another user's collection in a single
//! transaction: the forked collection row, per-user copies of every
//! bookmark (when requested), the join rows, and the fork record. Any
//! failure rolls the whole thing back.

use crate::error::{Error, Result};
use crate::models::CollectionFork;
use crate::sharing::shares::collection_owner;
use crate::validation;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

/// Fork request
#[derive(Debug, Clone, Deserialize)]
pub struct ForkRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub reason: Option<String>,
    #[serde(default = "default_true")]
    pub preserve_bookmarks: bool,
    #[serde(default)]
    pub preserve_structure: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, sqlx::FromRow)]
struct CollectionRow {
    user_id: String,
    name: String,
    description: Option<String>,
}

/// Fork `collection_id` for `forker_id`. Forking is allowed only when the
/// source collection has at least one active share of a fork-permitting
/// type, and never against the forker's own collection.
pub async fn fork_collection(
    pool: &PgPool,
    forker_id: &str,
    collection_id: i64,
    request: ForkRequest,
) -> Result<CollectionFork> {
    validation::validate_user_id(forker_id)?;

    let original = sqlx::query_as::<_, CollectionRow>(
        "SELECT user_id, name, description FROM collections WHERE id = $1",
    )
    .bind(collection_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("collection", collection_id))?;

    if original.user_id == forker_id {
        return Err(Error::CannotForkOwnCollection);
    }

    if !fork_allowed(pool, collection_id).await? {
        return Err(Error::ForkNotAllowed);
    }

    let name = request
        .name
        .unwrap_or_else(|| format!("Fork of {}", original.name));
    let description = request.description.or(original.description);

    // Everything below is one atomic unit: no partial forks survive.
    let mut tx = pool.begin().await?;

    let forked_collection_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO collections (user_id, name, description, visibility, created_at, updated_at)
        VALUES ($1, $2, $3, 'private', NOW(), NOW())
        RETURNING id
        "#,
    )
    .bind(forker_id)
    .bind(&name)
    .bind(&description)
    .fetch_one(&mut *tx)
    .await?;

    if request.preserve_bookmarks {
        let bookmarks = sqlx::query_as::<_, (i64, i32)>(
            r#"
            SELECT bookmark_id, position
            FROM collection_bookmarks
            WHERE collection_id = $1
            ORDER BY position, bookmark_id
            "#,
        )
        .bind(collection_id)
        .fetch_all(&mut *tx)
        .await?;

        for (index, (bookmark_id, position)) in bookmarks.iter().enumerate() {
            let copied_id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO bookmarks (user_id, url, title, description, created_at)
                SELECT $1, url, title, description, NOW()
                FROM bookmarks
                WHERE id = $2
                RETURNING id
                "#,
            )
            .bind(forker_id)
            .bind(bookmark_id)
            .fetch_one(&mut *tx)
            .await?;

            let copied_position = if request.preserve_structure {
                *position
            } else {
                index as i32
            };

            sqlx::query(
                r#"
                INSERT INTO collection_bookmarks (collection_id, bookmark_id, position)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(forked_collection_id)
            .bind(copied_id)
            .bind(copied_position)
            .execute(&mut *tx)
            .await?;
        }
    }

    let (fork_id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        INSERT INTO collection_forks
            (original_collection_id, forked_collection_id, user_id, fork_reason,
             preserve_bookmarks, preserve_structure, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        RETURNING id, created_at
        "#,
    )
    .bind(collection_id)
    .bind(forked_collection_id)
    .bind(forker_id)
    .bind(&request.reason)
    .bind(request.preserve_bookmarks)
    .bind(request.preserve_structure)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        forker_id,
        collection_id, forked_collection_id, "collection forked"
    );

    Ok(CollectionFork {
        id: fork_id,
        original_collection_id: collection_id,
        forked_collection_id,
        user_id: forker_id.to_string(),
        fork_reason: request.reason,
        preserve_bookmarks: request.preserve_bookmarks,
        preserve_structure: request.preserve_structure,
        created_at,
    })
}

/// A collection is forkable when at least one of its active shares has a
/// share type that exposes it beyond the owner
async fn fork_allowed(pool: &PgPool, collection_id: i64) -> Result<bool> {
    let allowed = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM collection_shares
            WHERE collection_id = $1
              AND is_active = TRUE
              AND share_type IN ('public', 'shared', 'collaborate')
        )
        "#,
    )
    .bind(collection_id)
    .fetch_one(pool)
    .await?;
    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::shares::{create_share, CreateShareRequest};

    async fn seed_collection(pool: &PgPool, owner: &str, bookmarks: usize) -> i64 {
        let collection_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO collections (user_id, name, visibility, created_at, updated_at)
             VALUES ($1, 'source', 'private', NOW(), NOW()) RETURNING id",
        )
        .bind(owner)
        .fetch_one(pool)
        .await
        .unwrap();

        for i in 0..bookmarks {
            let bookmark_id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO bookmarks (user_id, url, title, created_at)
                 VALUES ($1, $2, $3, NOW()) RETURNING id",
            )
            .bind(owner)
            .bind(format!("https://example.com/{}", i))
            .bind(format!("link {}", i))
            .fetch_one(pool)
            .await
            .unwrap();

            sqlx::query(
                "INSERT INTO collection_bookmarks (collection_id, bookmark_id, position)
                 VALUES ($1, $2, $3)",
            )
            .bind(collection_id)
            .bind(bookmark_id)
            .bind(i as i32)
            .execute(pool)
            .await
            .unwrap();
        }

        collection_id
    }

    async fn make_forkable(pool: &PgPool, owner: &str, collection_id: i64) {
        create_share(
            pool,
            owner,
            collection_id,
            CreateShareRequest {
                share_type: "public".to_string(),
                permission: "view".to_string(),
                title: None,
                description: None,
                password: None,
                expires_at: None,
            },
        )
        .await
        .unwrap();
    }

    fn request() -> ForkRequest {
        ForkRequest {
            name: None,
            description: None,
            reason: Some("backup".to_string()),
            preserve_bookmarks: true,
            preserve_structure: false,
        }
    }

    #[tokio::test]
    async fn test_fork_copies_bookmarks() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        let owner = format!("u-{}", rand::random::<u64>());
        let forker = format!("u-{}", rand::random::<u64>());
        let collection_id = seed_collection(&pool, &owner, 3).await;
        make_forkable(&pool, &owner, collection_id).await;

        let fork = fork_collection(&pool, &forker, collection_id, request())
            .await
            .unwrap();
        assert_eq!(fork.original_collection_id, collection_id);
        assert_ne!(fork.forked_collection_id, collection_id);

        let (fork_owner, visibility) = sqlx::query_as::<_, (String, String)>(
            "SELECT user_id, visibility FROM collections WHERE id = $1",
        )
        .bind(fork.forked_collection_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(fork_owner, forker);
        assert_eq!(visibility, "private");

        let copied = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM collection_bookmarks WHERE collection_id = $1",
        )
        .bind(fork.forked_collection_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(copied, 3);
    }

    #[tokio::test]
    async fn test_fork_gates() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        let owner = format!("u-{}", rand::random::<u64>());
        let forker = format!("u-{}", rand::random::<u64>());
        let collection_id = seed_collection(&pool, &owner, 1).await;

        // Unshared collections are not forkable
        assert!(matches!(
            fork_collection(&pool, &forker, collection_id, request()).await,
            Err(Error::ForkNotAllowed)
        ));

        make_forkable(&pool, &owner, collection_id).await;

        // Owners cannot fork their own collections
        assert!(matches!(
            fork_collection(&pool, &owner, collection_id, request()).await,
            Err(Error::CannotForkOwnCollection)
        ));

        // Missing collections surface as not-found
        assert!(matches!(
            fork_collection(&pool, &forker, i64::MAX, request()).await,
            Err(Error::NotFound { .. })
        ));
    }
}
