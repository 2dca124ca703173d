//! Collection shares
//!
//! Issues unguessable share tokens, resolves them behind the inactive /
//! expired / password gates, and keeps the append-only activity log. Share
//! passwords are stored as Argon2id verifiers; the plaintext never touches
//! a table.

use crate::error::{Error, Result};
use crate::models::{
    ActivityType, CollectionShare, ShareActivity, SharePermission, ShareType,
};
use crate::validation;
use argon2::password_hash::{rand_core::OsRng as HashOsRng, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// Length of the raw share token in bytes; hex-encoded to 32 characters
const TOKEN_BYTES: usize = 16;

/// Generate a cryptographically random share token: 16 bytes as 32
/// lowercase hex characters
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a share password into an Argon2id PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut HashOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash {
            message: e.to_string().into(),
        })
}

/// Verify a candidate password against a stored verifier. Comparison is
/// constant-time inside the hash implementation.
pub fn verify_password(stored_hash: &str, candidate: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| Error::PasswordHash {
        message: e.to_string().into(),
    })?;
    Ok(Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok())
}

/// Request to share a collection
#[derive(Debug, Clone, Deserialize)]
pub struct CreateShareRequest {
    pub share_type: String,
    pub permission: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update; only provided fields are applied
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateShareRequest {
    pub share_type: Option<String>,
    pub permission: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, sqlx::FromRow)]
struct ShareRow {
    id: i64,
    user_id: String,
    collection_id: i64,
    token: String,
    share_type: String,
    permission: String,
    title: Option<String>,
    description: Option<String>,
    password_hash: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    view_count: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ShareRow {
    fn into_domain(self) -> Result<CollectionShare> {
        Ok(CollectionShare {
            id: self.id,
            user_id: self.user_id,
            collection_id: self.collection_id,
            token: self.token,
            share_type: ShareType::parse(&self.share_type)?,
            permission: SharePermission::parse(&self.permission)?,
            title: self.title,
            description: self.description,
            password_hash: self.password_hash,
            expires_at: self.expires_at,
            view_count: self.view_count,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SHARE_COLUMNS: &str = "id, user_id, collection_id, token, share_type, permission, \
     title, description, password_hash, expires_at, view_count, is_active, \
     created_at, updated_at";

/// Issue a share for a collection the caller owns
pub async fn create_share(
    pool: &PgPool,
    issuer_id: &str,
    collection_id: i64,
    request: CreateShareRequest,
) -> Result<CollectionShare> {
    validation::validate_user_id(issuer_id)?;
    let share_type = ShareType::parse(&request.share_type)?;
    let permission = SharePermission::parse(&request.permission)?;

    let owner = collection_owner(pool, collection_id).await?;
    if owner != issuer_id {
        return Err(Error::forbidden("only the collection owner can share it"));
    }

    let token = generate_token();
    let password_hash = match &request.password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let row = sqlx::query_as::<_, ShareRow>(&format!(
        r#"
        INSERT INTO collection_shares
            (user_id, collection_id, token, share_type, permission, title,
             description, password_hash, expires_at, view_count, is_active,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, TRUE, NOW(), NOW())
        RETURNING {SHARE_COLUMNS}
        "#
    ))
    .bind(issuer_id)
    .bind(collection_id)
    .bind(&token)
    .bind(share_type.as_str())
    .bind(permission.as_str())
    .bind(&request.title)
    .bind(&request.description)
    .bind(&password_hash)
    .bind(request.expires_at)
    .fetch_one(pool)
    .await?;

    info!(issuer_id, collection_id, share_id = row.id, "share created");
    row.into_domain()
}

/// Resolve a share by its token, applying the inactive, expiry and
/// password gates in that order
pub async fn get_by_token(
    pool: &PgPool,
    token: &str,
    password: Option<&str>,
) -> Result<CollectionShare> {
    let row = sqlx::query_as::<_, ShareRow>(&format!(
        "SELECT {SHARE_COLUMNS} FROM collection_shares WHERE token = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("share", token))?;

    let share = row.into_domain()?;

    if !share.is_active {
        return Err(Error::ShareInactive);
    }
    if share.is_expired(Utc::now()) {
        return Err(Error::ShareExpired);
    }
    if let Some(stored_hash) = &share.password_hash {
        let candidate = password.ok_or(Error::InvalidPassword)?;
        if !verify_password(stored_hash, candidate)? {
            return Err(Error::InvalidPassword);
        }
    }

    Ok(share)
}

/// Load a share by id without gating; internal ownership checks only
async fn get_by_id(pool: &PgPool, share_id: i64) -> Result<CollectionShare> {
    let row = sqlx::query_as::<_, ShareRow>(&format!(
        "SELECT {SHARE_COLUMNS} FROM collection_shares WHERE id = $1"
    ))
    .bind(share_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("share", share_id))?;
    row.into_domain()
}

/// Shares issued by a user, newest first
pub async fn list_for_user(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<CollectionShare>> {
    validation::validate_user_id(user_id)?;
    let limit = validation::validate_limit(limit);

    let rows = sqlx::query_as::<_, ShareRow>(&format!(
        r#"
        SELECT {SHARE_COLUMNS} FROM collection_shares
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ShareRow::into_domain).collect()
}

/// Shares of one collection; only its owner may list them
pub async fn list_for_collection(
    pool: &PgPool,
    caller_id: &str,
    collection_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<CollectionShare>> {
    let owner = collection_owner(pool, collection_id).await?;
    if owner != caller_id {
        return Err(Error::forbidden(
            "only the collection owner can list its shares",
        ));
    }

    let limit = validation::validate_limit(limit);
    let rows = sqlx::query_as::<_, ShareRow>(&format!(
        r#"
        SELECT {SHARE_COLUMNS} FROM collection_shares
        WHERE collection_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(collection_id)
    .bind(limit)
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ShareRow::into_domain).collect()
}

/// Apply a partial update to a share the caller owns
pub async fn update_share(
    pool: &PgPool,
    caller_id: &str,
    share_id: i64,
    request: UpdateShareRequest,
) -> Result<CollectionShare> {
    let share = get_by_id(pool, share_id).await?;
    if share.user_id != caller_id {
        return Err(Error::forbidden("only the share owner can update it"));
    }

    let share_type = match &request.share_type {
        Some(value) => Some(ShareType::parse(value)?),
        None => None,
    };
    let permission = match &request.permission {
        Some(value) => Some(SharePermission::parse(value)?),
        None => None,
    };
    let password_hash = match &request.password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let row = sqlx::query_as::<_, ShareRow>(&format!(
        r#"
        UPDATE collection_shares SET
            share_type = COALESCE($2, share_type),
            permission = COALESCE($3, permission),
            title = COALESCE($4, title),
            description = COALESCE($5, description),
            password_hash = COALESCE($6, password_hash),
            expires_at = COALESCE($7, expires_at),
            is_active = COALESCE($8, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {SHARE_COLUMNS}
        "#
    ))
    .bind(share_id)
    .bind(share_type.map(ShareType::as_str))
    .bind(permission.map(SharePermission::as_str))
    .bind(&request.title)
    .bind(&request.description)
    .bind(&password_hash)
    .bind(request.expires_at)
    .bind(request.is_active)
    .fetch_one(pool)
    .await?;

    info!(caller_id, share_id, "share updated");
    row.into_domain()
}

/// Delete a share the caller owns
pub async fn delete_share(pool: &PgPool, caller_id: &str, share_id: i64) -> Result<()> {
    let share = get_by_id(pool, share_id).await?;
    if share.user_id != caller_id {
        return Err(Error::forbidden("only the share owner can delete it"));
    }

    sqlx::query("DELETE FROM collection_shares WHERE id = $1")
        .bind(share_id)
        .execute(pool)
        .await?;

    info!(caller_id, share_id, "share deleted");
    Ok(())
}

/// Append an activity record. A view also bumps the share's view counter;
/// that bump is best-effort and never fails the append.
pub async fn record_activity(
    pool: &PgPool,
    share_id: i64,
    user_id: Option<&str>,
    activity: ActivityType,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    metadata: Option<serde_json::Value>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO share_activities
            (share_id, user_id, activity, ip_address, user_agent, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#,
    )
    .bind(share_id)
    .bind(user_id)
    .bind(activity.as_str())
    .bind(ip_address)
    .bind(user_agent)
    .bind(metadata)
    .execute(pool)
    .await?;

    if activity == ActivityType::View {
        let bump = sqlx::query(
            "UPDATE collection_shares SET view_count = view_count + 1 WHERE id = $1",
        )
        .bind(share_id)
        .execute(pool)
        .await;
        if let Err(e) = bump {
            warn!(share_id, "failed to bump share view count: {}", e);
        }
    }

    debug!(share_id, activity = %activity, "share activity recorded");
    Ok(())
}

/// Activity log of a share the caller owns, newest first
pub async fn list_activity(
    pool: &PgPool,
    caller_id: &str,
    share_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<ShareActivity>> {
    let share = get_by_id(pool, share_id).await?;
    if share.user_id != caller_id {
        return Err(Error::forbidden(
            "only the share owner can read its activity",
        ));
    }

    #[derive(sqlx::FromRow)]
    struct ActivityRow {
        id: i64,
        share_id: i64,
        user_id: Option<String>,
        activity: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
        metadata: Option<serde_json::Value>,
        created_at: DateTime<Utc>,
    }

    let limit = validation::validate_limit(limit);
    let rows = sqlx::query_as::<_, ActivityRow>(
        r#"
        SELECT id, share_id, user_id, activity, ip_address, user_agent, metadata, created_at
        FROM share_activities
        WHERE share_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(share_id)
    .bind(limit)
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(ShareActivity {
                id: row.id,
                share_id: row.share_id,
                user_id: row.user_id,
                activity: ActivityType::parse(&row.activity)?,
                ip_address: row.ip_address,
                user_agent: row.user_agent,
                metadata: row.metadata,
                created_at: row.created_at,
            })
        })
        .collect()
}

/// Owner of a collection, or not-found
pub(crate) async fn collection_owner(pool: &PgPool, collection_id: i64) -> Result<String> {
    sqlx::query_scalar::<_, String>("SELECT user_id FROM collections WHERE id = $1")
        .bind(collection_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("collection", collection_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_token_hex_round_trip() {
        let token = generate_token();
        let bytes = hex::decode(&token).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(hex::encode(bytes), token);
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("s3cret").unwrap();
        assert_ne!(hash, "s3cret");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "s3cret").unwrap());
        assert!(!verify_password(&hash, "wrong").unwrap());
    }

    #[test]
    fn test_password_hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
        assert!(verify_password(&a, "same").unwrap());
        assert!(verify_password(&b, "same").unwrap());
    }

    #[tokio::test]
    async fn test_share_lifecycle_against_database() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        let owner = format!("u-{}", rand::random::<u64>());
        let collection_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO collections (user_id, name, visibility, created_at, updated_at)
             VALUES ($1, 'reading list', 'private', NOW(), NOW()) RETURNING id",
        )
        .bind(&owner)
        .fetch_one(&pool)
        .await
        .unwrap();

        let share = create_share(
            &pool,
            &owner,
            collection_id,
            CreateShareRequest {
                share_type: "public".to_string(),
                permission: "view".to_string(),
                title: Some("my links".to_string()),
                description: None,
                password: Some("pw".to_string()),
                expires_at: None,
            },
        )
        .await
        .unwrap();
        assert!(share.is_active);
        assert_eq!(share.view_count, 0);

        // Password gate
        assert!(matches!(
            get_by_token(&pool, &share.token, None).await,
            Err(Error::InvalidPassword)
        ));
        assert!(matches!(
            get_by_token(&pool, &share.token, Some("nope")).await,
            Err(Error::InvalidPassword)
        ));
        let resolved = get_by_token(&pool, &share.token, Some("pw")).await.unwrap();
        assert_eq!(resolved.id, share.id);

        // Deactivation gate
        update_share(
            &pool,
            &owner,
            share.id,
            UpdateShareRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            get_by_token(&pool, &share.token, Some("pw")).await,
            Err(Error::ShareInactive)
        ));

        // Expiry gate beats the password gate
        update_share(
            &pool,
            &owner,
            share.id,
            UpdateShareRequest {
                is_active: Some(true),
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            get_by_token(&pool, &share.token, None).await,
            Err(Error::ShareExpired)
        ));

        // Non-owner cannot touch the share
        assert!(matches!(
            delete_share(&pool, "someone-else", share.id).await,
            Err(Error::Forbidden { .. })
        ));
        delete_share(&pool, &owner, share.id).await.unwrap();
        assert!(matches!(
            get_by_token(&pool, &share.token, None).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_view_activity_bumps_view_count() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        let owner = format!("u-{}", rand::random::<u64>());
        let collection_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO collections (user_id, name, visibility, created_at, updated_at)
             VALUES ($1, 'c', 'private', NOW(), NOW()) RETURNING id",
        )
        .bind(&owner)
        .fetch_one(&pool)
        .await
        .unwrap();

        let share = create_share(
            &pool,
            &owner,
            collection_id,
            CreateShareRequest {
                share_type: "shared".to_string(),
                permission: "view".to_string(),
                title: None,
                description: None,
                password: None,
                expires_at: None,
            },
        )
        .await
        .unwrap();

        record_activity(&pool, share.id, None, ActivityType::View, None, None, None)
            .await
            .unwrap();
        record_activity(
            &pool,
            share.id,
            Some(&owner),
            ActivityType::Comment,
            None,
            None,
            None,
        )
        .await
        .unwrap();

        let resolved = get_by_token(&pool, &share.token, None).await.unwrap();
        assert_eq!(resolved.view_count, 1);

        let log = list_activity(&pool, &owner, share.id, 20, 0).await.unwrap();
        assert_eq!(log.len(), 2);
    }
}
