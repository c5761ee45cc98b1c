//! Durable mutation queue
//!
//! Every local mutation that must reach the remote API is written here and
//! survives restarts. Mutations to the same entity coalesce onto a single
//! slot whose id is derived from `(entity_type, entity_id)`, so repeated
//! offline edits never grow the queue beyond one slot per record.

use crate::config::MAX_SYNC_RETRIES;
use crate::database::{now_millis, Database, HttpMethod, QueueAction, SyncQueueItem};
use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, entity_type, entity_id, action, endpoint, method, body, \
     body_encrypted, timestamp, retries, revision, last_error, dispatched";

/// A mutation about to be queued
#[derive(Debug, Clone)]
pub struct QueuedMutation {
    pub entity_type: String,
    pub entity_id: String,
    pub action: QueueAction,
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: String,
    pub body_encrypted: bool,
}

/// What `enqueue` did with the mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New slot created
    Inserted,
    /// Existing slot overwritten in place
    Coalesced,
    /// A delete cancelled a create that was never sent to the server
    Cancelled,
}

/// Result of recording a failed replay that did not exhaust the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { retries: i64 },
    /// The slot was overwritten by a newer enqueue while in flight
    Superseded,
}

/// Deterministic slot id for an entity
pub fn slot_id(entity_type: &str, entity_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.as_bytes());
    hasher.update(b":");
    hasher.update(entity_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct SyncQueue {
    db: Database,
}

impl SyncQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    /// Queue a mutation, coalescing with any live slot for the same entity.
    ///
    /// - pending create + update keeps the create (POST) with the new body
    /// - pending create + delete removes the slot, unless a replay of the
    ///   create was already started; then it becomes a DELETE
    /// - anything else overwrites action, method, endpoint and body
    ///
    /// Every write gets a fresh revision, a reset retry counter and a
    /// timestamp strictly greater than any queued one.
    pub async fn enqueue(&self, mutation: QueuedMutation) -> Result<EnqueueOutcome> {
        let _guard = self.db.write_lock().await;

        let mut tx = self.db.begin_immediate().await?;
        let outcome = Self::enqueue_in(&mut tx, mutation).await?;
        tx.commit().await?;

        Ok(outcome)
    }

    /// `enqueue` inside a transaction the caller owns (and holds the write
    /// lock for), so a record row and its slot commit together
    pub async fn enqueue_in(
        conn: &mut SqliteConnection,
        mutation: QueuedMutation,
    ) -> Result<EnqueueOutcome> {
        let id = slot_id(&mutation.entity_type, &mutation.entity_id);

        let existing: Option<(String, String, String, bool)> = sqlx::query_as(
            "SELECT action, endpoint, method, dispatched FROM sync_queue WHERE id = ?",
        )
        .bind(&id)
        .fetch_optional(&mut *conn)
        .await?;

        let existing_action = existing
            .as_ref()
            .map(|(action, _, _, _)| action.parse::<QueueAction>())
            .transpose()?;
        let dispatched = existing.as_ref().map_or(false, |(_, _, _, d)| *d);

        let (action, endpoint, method) = match (existing_action, mutation.action) {
            (Some(QueueAction::Create), QueueAction::Delete) if !dispatched => {
                sqlx::query("DELETE FROM sync_queue WHERE id = ?")
                    .bind(&id)
                    .execute(&mut *conn)
                    .await?;

                tracing::debug!(
                    "Delete cancelled pending create for {} {}",
                    mutation.entity_type,
                    mutation.entity_id
                );
                return Ok(EnqueueOutcome::Cancelled);
            }
            (Some(QueueAction::Create), QueueAction::Create | QueueAction::Update) => {
                // The server may never have seen this record; it must still be created.
                let (action, endpoint, method, _) = existing.unwrap_or_default();
                (action, endpoint, method)
            }
            (_, incoming) => (
                incoming.as_str().to_string(),
                mutation.endpoint.clone(),
                mutation.method.as_str().to_string(),
            ),
        };

        let last_timestamp: Option<i64> = sqlx::query_scalar("SELECT MAX(timestamp) FROM sync_queue")
            .fetch_one(&mut *conn)
            .await?;
        let timestamp = now_millis().max(last_timestamp.map_or(0, |t| t + 1));
        let revision = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO sync_queue
                (id, entity_type, entity_id, action, endpoint, method, body, body_encrypted,
                 timestamp, retries, revision, last_error, dispatched)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, NULL, 0)
            ON CONFLICT(id) DO UPDATE SET
                action = excluded.action,
                endpoint = excluded.endpoint,
                method = excluded.method,
                body = excluded.body,
                body_encrypted = excluded.body_encrypted,
                timestamp = excluded.timestamp,
                retries = 0,
                revision = excluded.revision,
                last_error = NULL
            "#,
        )
        .bind(&id)
        .bind(&mutation.entity_type)
        .bind(&mutation.entity_id)
        .bind(&action)
        .bind(&endpoint)
        .bind(&method)
        .bind(&mutation.body)
        .bind(mutation.body_encrypted)
        .bind(timestamp)
        .bind(&revision)
        .execute(&mut *conn)
        .await?;

        let outcome = if existing_action.is_some() {
            EnqueueOutcome::Coalesced
        } else {
            EnqueueOutcome::Inserted
        };

        tracing::debug!(
            "Queued {} {} {} ({:?})",
            action,
            mutation.entity_type,
            mutation.entity_id,
            outcome
        );
        Ok(outcome)
    }

    /// Oldest slots first
    pub async fn dequeue_batch(&self, limit: u32) -> Result<Vec<SyncQueueItem>> {
        let sql = format!(
            "SELECT {} FROM sync_queue ORDER BY timestamp ASC, id ASC LIMIT ?",
            SELECT_COLUMNS
        );

        let items = sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await?;

        Ok(items)
    }

    /// Flag a slot as handed to the remote. Returns false when the slot was
    /// cancelled or overwritten since it was dequeued; that revision must
    /// not be sent.
    pub async fn mark_dispatched(&self, item: &SyncQueueItem) -> Result<bool> {
        let _guard = self.db.write_lock().await;

        let rows = sqlx::query("UPDATE sync_queue SET dispatched = 1 WHERE id = ? AND revision = ?")
            .bind(&item.id)
            .bind(&item.revision)
            .execute(self.pool())
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    /// Remove a replayed slot. Returns false when a newer revision was
    /// queued in the meantime; that revision stays queued.
    pub async fn mark_done(&self, item: &SyncQueueItem) -> Result<bool> {
        let _guard = self.db.write_lock().await;

        let rows = sqlx::query("DELETE FROM sync_queue WHERE id = ? AND revision = ?")
            .bind(&item.id)
            .bind(&item.revision)
            .execute(self.pool())
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    /// After a create was accepted by the server, turn a newer create slot
    /// for the same record into an update so it is not posted twice.
    pub async fn promote_to_update(&self, item: &SyncQueueItem, endpoint: &str) -> Result<bool> {
        let _guard = self.db.write_lock().await;

        let rows = sqlx::query(
            "UPDATE sync_queue SET action = ?, method = ?, endpoint = ? WHERE id = ? AND action = ?",
        )
        .bind(QueueAction::Update.as_str())
        .bind(QueueAction::Update.method().as_str())
        .bind(endpoint)
        .bind(&item.id)
        .bind(QueueAction::Create.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Count a failed replay against the slot.
    ///
    /// Once `retries` exceeds the ceiling the slot is removed and
    /// `AppError::QueueExhausted` is returned; it is never replayed again.
    pub async fn mark_failed(&self, item: &SyncQueueItem, error: &str) -> Result<FailureOutcome> {
        let _guard = self.db.write_lock().await;

        let mut tx = self.db.begin_immediate().await?;

        let retries: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE sync_queue SET retries = retries + 1, last_error = ?
            WHERE id = ? AND revision = ?
            RETURNING retries
            "#,
        )
        .bind(error)
        .bind(&item.id)
        .bind(&item.revision)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(retries) = retries else {
            tx.commit().await?;
            return Ok(FailureOutcome::Superseded);
        };

        if retries > MAX_SYNC_RETRIES {
            sqlx::query("DELETE FROM sync_queue WHERE id = ?")
                .bind(&item.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            tracing::warn!(
                "Dropping {} {} {} after {} failed attempts: {}",
                item.action,
                item.entity_type,
                item.entity_id,
                retries,
                error
            );
            return Err(AppError::QueueExhausted(item.id.clone()));
        }

        tx.commit().await?;
        Ok(FailureOutcome::Retrying { retries })
    }

    /// Remove a slot that can never be replayed (e.g. its body no longer decrypts)
    pub async fn discard(&self, item: &SyncQueueItem, reason: &str) -> Result<()> {
        let _guard = self.db.write_lock().await;

        sqlx::query("DELETE FROM sync_queue WHERE id = ? AND revision = ?")
            .bind(&item.id)
            .bind(&item.revision)
            .execute(self.pool())
            .await?;

        tracing::warn!(
            "Discarded unreplayable {} {} {}: {}",
            item.action,
            item.entity_type,
            item.entity_id,
            reason
        );
        Ok(())
    }

    /// The live slot for an entity, if any
    pub async fn pending_for(&self, entity_type: &str, entity_id: &str) -> Result<Option<SyncQueueItem>> {
        let sql = format!("SELECT {} FROM sync_queue WHERE id = ?", SELECT_COLUMNS);

        let item = sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(slot_id(entity_type, entity_id))
            .fetch_optional(self.pool())
            .await?;

        Ok(item)
    }

    /// Ids of every entity of a type that has a live slot
    pub async fn pending_entity_ids(&self, entity_type: &str) -> Result<HashSet<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT entity_id FROM sync_queue WHERE entity_type = ?")
                .bind(entity_type)
                .fetch_all(self.pool())
                .await?;

        Ok(ids.into_iter().collect())
    }

    /// Every slot in replay order
    pub async fn list(&self) -> Result<Vec<SyncQueueItem>> {
        let sql = format!(
            "SELECT {} FROM sync_queue ORDER BY timestamp ASC, id ASC",
            SELECT_COLUMNS
        );

        let items = sqlx::query_as::<_, SyncQueueItem>(&sql)
            .fetch_all(self.pool())
            .await?;

        Ok(items)
    }

    pub async fn len(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
