//! Collaborator invitations
//!
//! Owners invite users by email; invitees accept or decline. An invite is
//! unique per (collection, invitee) and carries the permission the
//! collaborator will hold once accepted.

use crate::error::{Error, Result};
use crate::models::{CollaboratorStatus, CollectionCollaborator, SharePermission};
use crate::sharing::shares::collection_owner;
use crate::validation;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

/// Invite request
#[derive(Debug, Clone, Deserialize)]
pub struct AddCollaboratorRequest {
    pub email: String,
    pub permission: String,
    pub message: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct CollaboratorRow {
    id: i64,
    collection_id: i64,
    user_id: String,
    inviter_id: String,
    permission: String,
    status: String,
    message: Option<String>,
    invited_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
}

impl CollaboratorRow {
    fn into_domain(self) -> Result<CollectionCollaborator> {
        Ok(CollectionCollaborator {
            id: self.id,
            collection_id: self.collection_id,
            user_id: self.user_id,
            inviter_id: self.inviter_id,
            permission: SharePermission::parse(&self.permission)?,
            status: CollaboratorStatus::parse(&self.status)?,
            message: self.message,
            invited_at: self.invited_at,
            accepted_at: self.accepted_at,
        })
    }
}

const COLLABORATOR_COLUMNS: &str =
    "id, collection_id, user_id, inviter_id, permission, status, message, invited_at, accepted_at";

/// Invite a user (resolved by email) to collaborate on a collection the
/// caller owns
pub async fn add_collaborator(
    pool: &PgPool,
    owner_id: &str,
    collection_id: i64,
    request: AddCollaboratorRequest,
) -> Result<CollectionCollaborator> {
    validation::validate_user_id(owner_id)?;
    let permission = SharePermission::parse(&request.permission)?;
    if request.email.is_empty() {
        return Err(Error::MissingField { field: "email" });
    }

    let owner = collection_owner(pool, collection_id).await?;
    if owner != owner_id {
        return Err(Error::forbidden(
            "only the collection owner can invite collaborators",
        ));
    }

    let invitee_id =
        sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE email = $1")
            .bind(&request.email)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| Error::not_found("user", &request.email))?;

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM collection_collaborators WHERE collection_id = $1 AND user_id = $2",
    )
    .bind(collection_id)
    .bind(&invitee_id)
    .fetch_optional(pool)
    .await?;
    if existing.is_some() {
        return Err(Error::CollaboratorExists);
    }

    let row = sqlx::query_as::<_, CollaboratorRow>(&format!(
        r#"
        INSERT INTO collection_collaborators
            (collection_id, user_id, inviter_id, permission, status, message, invited_at)
        VALUES ($1, $2, $3, $4, 'pending', $5, NOW())
        RETURNING {COLLABORATOR_COLUMNS}
        "#
    ))
    .bind(collection_id)
    .bind(&invitee_id)
    .bind(owner_id)
    .bind(permission.as_str())
    .bind(&request.message)
    .fetch_one(pool)
    .await?;

    info!(owner_id, collection_id, invitee_id, "collaborator invited");
    row.into_domain()
}

/// Accept a pending invite addressed to the caller
pub async fn accept_collaboration(
    pool: &PgPool,
    user_id: &str,
    collaborator_id: i64,
) -> Result<CollectionCollaborator> {
    resolve_invite(pool, user_id, collaborator_id, CollaboratorStatus::Accepted).await
}

/// Decline a pending invite addressed to the caller
pub async fn decline_collaboration(
    pool: &PgPool,
    user_id: &str,
    collaborator_id: i64,
) -> Result<CollectionCollaborator> {
    resolve_invite(pool, user_id, collaborator_id, CollaboratorStatus::Declined).await
}

async fn resolve_invite(
    pool: &PgPool,
    user_id: &str,
    collaborator_id: i64,
    to_status: CollaboratorStatus,
) -> Result<CollectionCollaborator> {
    validation::validate_user_id(user_id)?;

    let row = sqlx::query_as::<_, CollaboratorRow>(&format!(
        "SELECT {COLLABORATOR_COLUMNS} FROM collection_collaborators WHERE id = $1"
    ))
    .bind(collaborator_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("collaboration", collaborator_id))?;

    let invite = row.into_domain()?;
    if invite.user_id != user_id {
        return Err(Error::forbidden("this invite is addressed to someone else"));
    }
    if invite.status != CollaboratorStatus::Pending {
        return Err(Error::CollaborationNotPending);
    }

    let accepted_at = match to_status {
        CollaboratorStatus::Accepted => Some(Utc::now()),
        _ => None,
    };

    let row = sqlx::query_as::<_, CollaboratorRow>(&format!(
        r#"
        UPDATE collection_collaborators
        SET status = $2, accepted_at = $3
        WHERE id = $1
        RETURNING {COLLABORATOR_COLUMNS}
        "#
    ))
    .bind(collaborator_id)
    .bind(to_status.as_str())
    .bind(accepted_at)
    .fetch_one(pool)
    .await?;

    info!(user_id, collaborator_id, status = %to_status, "invite resolved");
    row.into_domain()
}
