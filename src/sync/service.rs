//! Sync fabric service
//!
//! Durable sync events, per-device checkpoints, delta reads and the offline
//! change queue. Conflict resolution is last-writer-wins by timestamp: a
//! queued change loses to any newer write from another device and is
//! recorded as a conflict event instead of being applied.

use crate::error::{Error, Result};
use crate::models::{OfflineQueuedChange, SyncAction, SyncEvent, SyncState};
use crate::sync::broker::{Broker, RealtimeMessage};
use crate::validation;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info};

/// Request to emit a sync event
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventRequest {
    pub event_type: String,
    pub resource_id: String,
    pub action: String,
    pub device_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Request to queue a change made while offline
#[derive(Debug, Clone, Deserialize)]
pub struct QueueOfflineRequest {
    pub device_id: String,
    pub event_type: String,
    pub resource_id: String,
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Result of draining a device's offline queue
#[derive(Debug, Clone, Serialize)]
pub struct OfflineProcessOutcome {
    pub applied: usize,
    pub conflicts: usize,
    pub last_sync_time: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SyncEventRow {
    id: i64,
    user_id: String,
    event_type: String,
    resource_id: String,
    action: String,
    device_id: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl SyncEventRow {
    fn into_domain(self) -> Result<SyncEvent> {
        Ok(SyncEvent {
            id: self.id,
            user_id: self.user_id,
            event_type: self.event_type,
            resource_id: self.resource_id,
            action: SyncAction::parse(&self.action)?,
            device_id: self.device_id,
            payload: self.payload,
            created_at: self.created_at,
        })
    }
}

/// Read a device's checkpoint, creating a zero-stamped row on first contact
pub async fn get_state(pool: &PgPool, user_id: &str, device_id: &str) -> Result<SyncState> {
    validation::validate_user_id(user_id)?;
    if device_id.is_empty() {
        return Err(Error::MissingField { field: "device_id" });
    }

    let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now);
    let row = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
        r#"
        INSERT INTO sync_states (user_id, device_id, last_sync_time, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (user_id, device_id) DO UPDATE SET user_id = sync_states.user_id
        RETURNING last_sync_time, updated_at
        "#,
    )
    .bind(user_id)
    .bind(device_id)
    .bind(epoch)
    .fetch_one(pool)
    .await?;

    Ok(SyncState {
        user_id: user_id.to_string(),
        device_id: device_id.to_string(),
        last_sync_time: row.0,
        updated_at: row.1,
    })
}

/// Idempotent checkpoint write
pub async fn update_state(
    pool: &PgPool,
    user_id: &str,
    device_id: &str,
    last_sync_time: DateTime<Utc>,
) -> Result<SyncState> {
    validation::validate_user_id(user_id)?;
    if device_id.is_empty() {
        return Err(Error::MissingField { field: "device_id" });
    }

    let row = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
        r#"
        INSERT INTO sync_states (user_id, device_id, last_sync_time, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (user_id, device_id) DO UPDATE SET
            last_sync_time = EXCLUDED.last_sync_time,
            updated_at = NOW()
        RETURNING last_sync_time, updated_at
        "#,
    )
    .bind(user_id)
    .bind(device_id)
    .bind(last_sync_time)
    .fetch_one(pool)
    .await?;

    debug!(user_id, device_id, "sync checkpoint updated");
    Ok(SyncState {
        user_id: user_id.to_string(),
        device_id: device_id.to_string(),
        last_sync_time: row.0,
        updated_at: row.1,
    })
}

/// Persist a sync event and fan it out to the user's other devices.
/// Realtime delivery is best-effort; the row is the source of truth.
pub async fn create_event(
    pool: &PgPool,
    broker: &Broker,
    user_id: &str,
    request: CreateEventRequest,
) -> Result<SyncEvent> {
    validation::validate_user_id(user_id)?;
    validation::validate_sync_event_type(&request.event_type)?;
    let action = SyncAction::parse(&request.action)?;
    if request.device_id.is_empty() {
        return Err(Error::MissingField { field: "device_id" });
    }
    if request.resource_id.is_empty() {
        return Err(Error::MissingField { field: "resource_id" });
    }

    let event = insert_event(
        pool,
        user_id,
        &request.event_type,
        &request.resource_id,
        action,
        &request.device_id,
        &request.payload,
    )
    .await?;

    publish(broker, &event);
    Ok(event)
}

/// Events for a user after `since`, excluding the calling device's own
/// writes, oldest first
pub async fn delta(
    pool: &PgPool,
    user_id: &str,
    device_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<SyncEvent>> {
    validation::validate_user_id(user_id)?;
    if device_id.is_empty() {
        return Err(Error::MissingField { field: "device_id" });
    }

    let rows = sqlx::query_as::<_, SyncEventRow>(
        r#"
        SELECT id, user_id, event_type, resource_id, action, device_id, payload, created_at
        FROM sync_events
        WHERE user_id = $1 AND created_at > $2 AND device_id <> $3
        ORDER BY created_at ASC
        "#,
    )
    .bind(user_id)
    .bind(since)
    .bind(device_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SyncEventRow::into_domain).collect()
}

/// Queue a change made while the device was offline
pub async fn queue_offline(
    pool: &PgPool,
    user_id: &str,
    request: QueueOfflineRequest,
) -> Result<OfflineQueuedChange> {
    validation::validate_user_id(user_id)?;
    validation::validate_sync_event_type(&request.event_type)?;
    let action = SyncAction::parse(&request.action)?;
    if request.device_id.is_empty() {
        return Err(Error::MissingField { field: "device_id" });
    }

    let (id, queued_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        INSERT INTO offline_queue
            (user_id, device_id, event_type, resource_id, action, payload, queued_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        RETURNING id, queued_at
        "#,
    )
    .bind(user_id)
    .bind(&request.device_id)
    .bind(&request.event_type)
    .bind(&request.resource_id)
    .bind(action.as_str())
    .bind(&request.payload)
    .fetch_one(pool)
    .await?;

    debug!(user_id, device_id = %request.device_id, "offline change queued");
    Ok(OfflineQueuedChange {
        id,
        user_id: user_id.to_string(),
        device_id: request.device_id,
        event_type: request.event_type,
        resource_id: request.resource_id,
        action,
        payload: request.payload,
        queued_at,
    })
}

/// Pending offline changes for a device, oldest first
pub async fn list_offline(
    pool: &PgPool,
    user_id: &str,
    device_id: &str,
) -> Result<Vec<OfflineQueuedChange>> {
    validation::validate_user_id(user_id)?;
    if device_id.is_empty() {
        return Err(Error::MissingField { field: "device_id" });
    }

    #[derive(sqlx::FromRow)]
    struct Row {
        id: i64,
        user_id: String,
        device_id: String,
        event_type: String,
        resource_id: String,
        action: String,
        payload: serde_json::Value,
        queued_at: DateTime<Utc>,
    }

    let rows = sqlx::query_as::<_, Row>(
        r#"
        SELECT id, user_id, device_id, event_type, resource_id, action, payload, queued_at
        FROM offline_queue
        WHERE user_id = $1 AND device_id = $2
        ORDER BY queued_at ASC
        "#,
    )
    .bind(user_id)
    .bind(device_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(OfflineQueuedChange {
                id: row.id,
                user_id: row.user_id,
                device_id: row.device_id,
                event_type: row.event_type,
                resource_id: row.resource_id,
                action: SyncAction::parse(&row.action)?,
                payload: row.payload,
                queued_at: row.queued_at,
            })
        })
        .collect()
}

/// Drain a device's offline queue. Each change is checked against the last
/// write to its resource from any other device: older changes are dropped
/// and recorded as conflicts, the rest become sync events. The device's
/// checkpoint is bumped at the end.
pub async fn process_offline(
    pool: &PgPool,
    broker: &Broker,
    user_id: &str,
    device_id: &str,
) -> Result<OfflineProcessOutcome> {
    let changes = list_offline(pool, user_id, device_id).await?;

    let mut applied = 0;
    let mut conflicts = 0;

    for change in changes {
        let last_writer = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"
            SELECT MAX(created_at)
            FROM sync_events
            WHERE user_id = $1 AND event_type = $2 AND resource_id = $3 AND device_id <> $4
            "#,
        )
        .bind(user_id)
        .bind(&change.event_type)
        .bind(&change.resource_id)
        .bind(device_id)
        .fetch_one(pool)
        .await?;

        let conflicted = last_writer.map(|at| at > change.queued_at).unwrap_or(false);

        let payload = if conflicted {
            conflicts += 1;
            json!({
                "conflict": true,
                "discarded_payload": change.payload,
                "queued_at": change.queued_at,
            })
        } else {
            // Application of the change itself belongs to the owning CRUD
            // service; the fabric records and propagates the fact.
            applied += 1;
            change.payload.clone()
        };

        let event = insert_event(
            pool,
            user_id,
            &change.event_type,
            &change.resource_id,
            change.action,
            device_id,
            &payload,
        )
        .await?;
        publish(broker, &event);

        sqlx::query("DELETE FROM offline_queue WHERE id = $1")
            .bind(change.id)
            .execute(pool)
            .await?;
    }

    let state = update_state(pool, user_id, device_id, Utc::now()).await?;

    info!(
        user_id,
        device_id, applied, conflicts, "offline queue processed"
    );

    Ok(OfflineProcessOutcome {
        applied,
        conflicts,
        last_sync_time: state.last_sync_time,
    })
}

async fn insert_event(
    pool: &PgPool,
    user_id: &str,
    event_type: &str,
    resource_id: &str,
    action: SyncAction,
    device_id: &str,
    payload: &serde_json::Value,
) -> Result<SyncEvent> {
    let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        INSERT INTO sync_events
            (user_id, event_type, resource_id, action, device_id, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        RETURNING id, created_at
        "#,
    )
    .bind(user_id)
    .bind(event_type)
    .bind(resource_id)
    .bind(action.as_str())
    .bind(device_id)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    Ok(SyncEvent {
        id,
        user_id: user_id.to_string(),
        event_type: event_type.to_string(),
        resource_id: resource_id.to_string(),
        action,
        device_id: device_id.to_string(),
        payload: payload.clone(),
        created_at,
    })
}

/// Fan a committed event out to the user's other devices
fn publish(broker: &Broker, event: &SyncEvent) {
    let message = RealtimeMessage::sync_event(json!({
        "id": event.id,
        "event_type": event.event_type,
        "resource_id": event.resource_id,
        "action": event.action,
        "device_id": event.device_id,
        "payload": event.payload,
        "created_at": event.created_at,
    }));
    broker.broadcast(&event.user_id, Some(&event.device_id), &message);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_request(device: &str, resource: &str) -> CreateEventRequest {
        CreateEventRequest {
            event_type: "bookmark".to_string(),
            resource_id: resource.to_string(),
            action: "update".to_string(),
            device_id: device.to_string(),
            payload: json!({ "title": "renamed" }),
        }
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        let user = format!("u-{}", rand::random::<u64>());

        // First read creates a zero-stamped checkpoint
        let state = get_state(&pool, &user, "d-1").await.unwrap();
        assert_eq!(state.last_sync_time.timestamp(), 0);

        let stamp = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        update_state(&pool, &user, "d-1", stamp).await.unwrap();
        let state = get_state(&pool, &user, "d-1").await.unwrap();
        assert_eq!(state.last_sync_time, stamp);

        // Idempotent re-write
        update_state(&pool, &user, "d-1", stamp).await.unwrap();
        let state = get_state(&pool, &user, "d-1").await.unwrap();
        assert_eq!(state.last_sync_time, stamp);
    }

    #[tokio::test]
    async fn test_delta_excludes_own_device() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();
        let broker = Broker::new(8);

        let user = format!("u-{}", rand::random::<u64>());
        let since = Utc::now();

        create_event(&pool, &broker, &user, event_request("d-1", "b-1"))
            .await
            .unwrap();
        create_event(&pool, &broker, &user, event_request("d-2", "b-2"))
            .await
            .unwrap();

        let events = delta(&pool, &user, "d-1", since).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device_id, "d-2");
        assert!(events.iter().all(|e| e.device_id != "d-1"));
    }

    #[tokio::test]
    async fn test_event_validation() {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unreachable").unwrap();
        let broker = Broker::new(8);

        let mut bad_type = event_request("d-1", "b-1");
        bad_type.event_type = "avatar".to_string();
        assert!(matches!(
            create_event(&pool, &broker, "u-1", bad_type).await,
            Err(Error::InvalidSyncEventType { .. })
        ));

        let mut bad_action = event_request("d-1", "b-1");
        bad_action.action = "merge".to_string();
        assert!(matches!(
            create_event(&pool, &broker, "u-1", bad_action).await,
            Err(Error::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_conflict_resolution() {
        if std::env::var("DATABASE_URL").is_err() {
            return;
        }

        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();
        let broker = Broker::new(8);

        let user = format!("u-{}", rand::random::<u64>());
        let resource = "bookmark-42";

        // Device D1 queues a change, then another device writes the same
        // resource, then D1 queues two more changes.
        queue_offline(
            &pool,
            &user,
            QueueOfflineRequest {
                device_id: "d-1".to_string(),
                event_type: "bookmark".to_string(),
                resource_id: resource.to_string(),
                action: "update".to_string(),
                payload: json!({ "rev": 1 }),
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        create_event(&pool, &broker, &user, event_request("d-2", resource))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        for rev in 2..=3 {
            queue_offline(
                &pool,
                &user,
                QueueOfflineRequest {
                    device_id: "d-1".to_string(),
                    event_type: "bookmark".to_string(),
                    resource_id: resource.to_string(),
                    action: "update".to_string(),
                    payload: json!({ "rev": rev }),
                },
            )
            .await
            .unwrap();
        }

        let before = Utc::now();
        let outcome = process_offline(&pool, &broker, &user, "d-1").await.unwrap();
        assert_eq!(outcome.conflicts, 1);
        assert_eq!(outcome.applied, 2);
        assert!(outcome.last_sync_time >= before);

        // The queue is drained
        let remaining = list_offline(&pool, &user, "d-1").await.unwrap();
        assert!(remaining.is_empty());
    }
}
