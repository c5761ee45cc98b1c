//! Local record store
//!
//! Durable, queryable persistence for every record family. The store is
//! encryption-agnostic: it persists whatever payload it is handed.
//! Writes hold the `Database` write lock, which the sync queue shares,
//! since SQLite does not tolerate concurrent writers well.

use super::models::{now_millis, RecordFamily, StoredRecord, SyncStatus};
use super::Database;
use crate::error::Result;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    /// Insert or replace a record by id.
    ///
    /// `updated_at` always advances past the stored value, even if the
    /// wall clock stepped backwards. `created_at` of an existing row is kept.
    pub async fn upsert(&self, family: RecordFamily, record: &StoredRecord) -> Result<StoredRecord> {
        let _guard = self.db.write_lock().await;

        let mut tx = self.db.begin_immediate().await?;
        let stored = Self::upsert_in(&mut tx, family, record).await?;
        tx.commit().await?;

        Ok(stored)
    }

    /// `upsert` inside a transaction the caller owns (and holds the write
    /// lock for)
    pub async fn upsert_in(
        conn: &mut SqliteConnection,
        family: RecordFamily,
        record: &StoredRecord,
    ) -> Result<StoredRecord> {
        let now = now_millis();
        let created_at = if record.created_at > 0 {
            record.created_at
        } else {
            now
        };
        let updated_at = now.max(created_at);

        let sql = format!(
            r#"
            INSERT INTO {table} (id, payload, is_encrypted, sync_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                is_encrypted = excluded.is_encrypted,
                sync_status = excluded.sync_status,
                updated_at = MAX(excluded.updated_at, {table}.updated_at + 1)
            RETURNING id, payload, is_encrypted, sync_status, created_at, updated_at
            "#,
            table = family.table()
        );

        let stored = sqlx::query_as::<_, StoredRecord>(&sql)
            .bind(&record.id)
            .bind(&record.payload)
            .bind(record.is_encrypted)
            .bind(&record.sync_status)
            .bind(created_at)
            .bind(updated_at)
            .fetch_one(&mut *conn)
            .await?;

        tracing::debug!("Upserted {} {}", family, stored.id);
        Ok(stored)
    }

    /// Get a record by id
    pub async fn get(&self, family: RecordFamily, id: &str) -> Result<Option<StoredRecord>> {
        let sql = format!(
            "SELECT id, payload, is_encrypted, sync_status, created_at, updated_at FROM {} WHERE id = ?",
            family.table()
        );

        let record = sqlx::query_as::<_, StoredRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(record)
    }

    /// List all records, most recently updated first
    pub async fn list(&self, family: RecordFamily) -> Result<Vec<StoredRecord>> {
        let sql = format!(
            r#"
            SELECT id, payload, is_encrypted, sync_status, created_at, updated_at FROM {}
            ORDER BY updated_at DESC, id ASC
            "#,
            family.table()
        );

        let records = sqlx::query_as::<_, StoredRecord>(&sql)
            .fetch_all(self.pool())
            .await?;

        Ok(records)
    }

    /// Delete a record; returns whether a row existed
    pub async fn delete(&self, family: RecordFamily, id: &str) -> Result<bool> {
        let _guard = self.db.write_lock().await;

        let mut tx = self.db.begin_immediate().await?;
        let existed = Self::delete_in(&mut tx, family, id).await?;
        tx.commit().await?;

        Ok(existed)
    }

    pub async fn delete_in(conn: &mut SqliteConnection, family: RecordFamily, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", family.table());
        let rows = sqlx::query(&sql)
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        tracing::debug!("Deleted {} {}: {}", family, id, rows > 0);
        Ok(rows > 0)
    }

    /// Overwrite the sync marker without touching `updated_at`
    pub async fn set_sync_status(
        &self,
        family: RecordFamily,
        id: &str,
        status: SyncStatus,
    ) -> Result<()> {
        let _guard = self.db.write_lock().await;

        let sql = format!("UPDATE {} SET sync_status = ? WHERE id = ?", family.table());
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Mark a record synced unless a queue slot for it still exists.
    ///
    /// Runs as one statement so a slot enqueued concurrently keeps the
    /// record pending.
    pub async fn mark_synced(&self, family: RecordFamily, id: &str) -> Result<bool> {
        let _guard = self.db.write_lock().await;

        let sql = format!(
            r#"
            UPDATE {} SET sync_status = 'synced'
            WHERE id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM sync_queue WHERE entity_type = ? AND entity_id = ?
              )
            "#,
            family.table()
        );

        let rows = sqlx::query(&sql)
            .bind(id)
            .bind(family.entity_type())
            .bind(id)
            .execute(self.pool())
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    pub async fn count(&self, family: RecordFamily) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", family.table());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(self.pool()).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_store() -> LocalStore {
        LocalStore::new(Database::open_in_memory().await.unwrap())
    }

    fn record(id: &str, payload: &str) -> StoredRecord {
        StoredRecord {
            id: id.to_string(),
            payload: payload.to_string(),
            is_encrypted: false,
            sync_status: SyncStatus::Pending.as_str().to_string(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = create_test_store().await;

        let stored = store
            .upsert(RecordFamily::Document, &record("d1", r#"{"title":"A"}"#))
            .await
            .unwrap();
        assert!(stored.created_at > 0);
        assert!(stored.updated_at >= stored.created_at);

        let fetched = store.get(RecordFamily::Document, "d1").await.unwrap().unwrap();
        assert_eq!(fetched, stored);

        // Families are isolated
        assert!(store.get(RecordFamily::Evidence, "d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_advances_updated_at() {
        let store = create_test_store().await;

        let first = store
            .upsert(RecordFamily::JournalEntry, &record("j1", "v1"))
            .await
            .unwrap();
        let second = store
            .upsert(RecordFamily::JournalEntry, &record("j1", "v2"))
            .await
            .unwrap();

        assert_eq!(second.payload, "v2");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(store.count(RecordFamily::JournalEntry).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_updated_at_desc() {
        let store = create_test_store().await;

        for id in ["a", "b", "c"] {
            store
                .upsert(RecordFamily::LegalCase, &record(id, "{}"))
                .await
                .unwrap();
        }
        // Touch "a" so it becomes the most recent
        store
            .upsert(RecordFamily::LegalCase, &record("a", "{}"))
            .await
            .unwrap();

        let records = store.list(RecordFamily::LegalCase).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "a");
        assert!(records
            .windows(2)
            .all(|pair| pair[0].updated_at >= pair[1].updated_at));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = create_test_store().await;

        store
            .upsert(RecordFamily::Evidence, &record("e1", "{}"))
            .await
            .unwrap();

        assert!(store.delete(RecordFamily::Evidence, "e1").await.unwrap());
        assert!(!store.delete(RecordFamily::Evidence, "e1").await.unwrap());
        assert!(store.get(RecordFamily::Evidence, "e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_sync_status_keeps_updated_at() {
        let store = create_test_store().await;

        let stored = store
            .upsert(RecordFamily::LearningPath, &record("l1", "{}"))
            .await
            .unwrap();
        store
            .set_sync_status(RecordFamily::LearningPath, "l1", SyncStatus::Synced)
            .await
            .unwrap();

        let fetched = store
            .get(RecordFamily::LearningPath, "l1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status(), SyncStatus::Synced);
        assert_eq!(fetched.updated_at, stored.updated_at);
    }

    #[tokio::test]
    async fn test_mark_synced_respects_pending_slot() {
        let store = create_test_store().await;

        store
            .upsert(RecordFamily::Document, &record("d1", "{}"))
            .await
            .unwrap();

        sqlx::query(
            r#"
            INSERT INTO sync_queue (id, entity_type, entity_id, action, endpoint, method, body, timestamp, revision)
            VALUES ('slot', 'document', 'd1', 'create', '/api/documents', 'POST', '{}', 1, 'r1')
            "#,
        )
        .execute(store.pool())
        .await
        .unwrap();

        assert!(!store.mark_synced(RecordFamily::Document, "d1").await.unwrap());

        sqlx::query("DELETE FROM sync_queue")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(store.mark_synced(RecordFamily::Document, "d1").await.unwrap());
        let fetched = store.get(RecordFamily::Document, "d1").await.unwrap().unwrap();
        assert_eq!(fetched.status(), SyncStatus::Synced);
    }
}
