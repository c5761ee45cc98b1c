//! Record services
//!
//! The public CRUD surface for each record family. Every mutation is saved
//! locally first (sensitive fields encrypted), then queued for the remote
//! API, then handed to the sync engine if the device is online. Callers are
//! never blocked on the network.

use crate::config::UNAVAILABLE_PLACEHOLDER;
use crate::crypto::EncryptionGateway;
use crate::database::{
    now_millis, Document, Evidence, JournalEntry, LearningPath, LegalCase, LocalStore,
    QueueAction, RecordFamily, RecordPayload, StoredRecord, SyncStatus,
};
use crate::error::{AppError, Result};
use crate::sync::{ConnectivityMonitor, QueuedMutation, SyncEngine, SyncQueue};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A record as seen by callers, sensitive fields in plaintext
#[derive(Debug, Clone, PartialEq)]
pub struct Record<P> {
    pub id: String,
    pub payload: P,
    pub created_at: i64,
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    /// Whether sensitive fields are ciphertext on disk
    pub is_encrypted: bool,
}

/// JSON body sent to the remote API
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord<'a, P> {
    id: &'a str,
    created_at: i64,
    updated_at: i64,
    #[serde(flatten)]
    payload: &'a P,
}

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Case-insensitive substring over the family's searchable text
    pub query: Option<String>,
    pub tag: Option<String>,
    pub sync_status: Option<SyncStatus>,
    /// Only records updated at or after this time (ms)
    pub updated_since: Option<i64>,
    pub limit: Option<usize>,
}

impl SearchCriteria {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }
}

/// Shared handles every record service is built from.
///
/// `store` and `queue` must be built over the same `Database`; record writes
/// commit the row and its queue slot under that database's write lock.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: LocalStore,
    pub queue: SyncQueue,
    pub crypto: Arc<EncryptionGateway>,
    pub engine: Arc<SyncEngine>,
    pub connectivity: Arc<ConnectivityMonitor>,
    encryption_warned: Arc<AtomicBool>,
}

impl ServiceContext {
    pub fn new(
        store: LocalStore,
        queue: SyncQueue,
        crypto: Arc<EncryptionGateway>,
        engine: Arc<SyncEngine>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            store,
            queue,
            crypto,
            engine,
            connectivity,
            encryption_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Try to load or create the encryption key up front. Returns whether
    /// encryption is available.
    pub fn prepare_encryption(&self) -> bool {
        self.encryption_available()
    }

    /// Lazily initializes the gateway. A keystore failure is logged once and
    /// leaves encryption disabled.
    fn encryption_available(&self) -> bool {
        if self.crypto.is_initialized() {
            return true;
        }

        match self.crypto.initialize() {
            Ok(()) => true,
            Err(e) => {
                if !self.encryption_warned.swap(true, Ordering::AcqRel) {
                    tracing::warn!("Encryption disabled, records will be stored unencrypted: {}", e);
                }
                false
            }
        }
    }
}

/// CRUD and search for one record family
#[derive(Clone)]
pub struct RecordService<P> {
    ctx: ServiceContext,
    _family: PhantomData<fn() -> P>,
}

pub type DocumentService = RecordService<Document>;
pub type JournalService = RecordService<JournalEntry>;
pub type EvidenceService = RecordService<Evidence>;
pub type LearningPathService = RecordService<LearningPath>;
pub type LegalCaseService = RecordService<LegalCase>;

impl<P: RecordPayload> RecordService<P> {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            _family: PhantomData,
        }
    }

    fn family(&self) -> RecordFamily {
        P::FAMILY
    }

    /// Create a new record with a fresh client-side id
    pub async fn create(&self, mut payload: P) -> Result<Record<P>> {
        payload.normalize()?;

        let id = Uuid::new_v4().to_string();
        let record = self
            .persist(&id, payload, now_millis(), QueueAction::Create)
            .await?;

        tracing::info!("Created {} {}", self.family(), record.id);
        Ok(record)
    }

    /// Replace a record's payload; last write wins
    pub async fn update(&self, id: &str, mut payload: P) -> Result<Record<P>> {
        let existing = self
            .ctx
            .store
            .get(self.family(), id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound(id.to_string()))?;

        payload.normalize()?;

        let record = self
            .persist(id, payload, existing.created_at, QueueAction::Update)
            .await?;

        tracing::debug!("Updated {} {}", self.family(), id);
        Ok(record)
    }

    /// Delete a record; returns false if it did not exist
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let family = self.family();
        let db = self.ctx.store.database();

        {
            let _guard = db.write_lock().await;
            let mut tx = db.begin_immediate().await?;

            if !LocalStore::delete_in(&mut tx, family, id).await? {
                return Ok(false);
            }

            let method = QueueAction::Delete.method();
            SyncQueue::enqueue_in(
                &mut tx,
                QueuedMutation {
                    entity_type: family.entity_type().to_string(),
                    entity_id: id.to_string(),
                    action: QueueAction::Delete,
                    endpoint: family.endpoint(method, id),
                    method,
                    body: serde_json::json!({ "id": id }).to_string(),
                    body_encrypted: false,
                },
            )
            .await?;

            tx.commit().await?;
        }

        self.kick_sync();

        tracing::info!("Deleted {} {}", family, id);
        Ok(true)
    }

    /// Get a record by id
    pub async fn get(&self, id: &str) -> Result<Option<Record<P>>> {
        let family = self.family();

        let Some(row) = self.ctx.store.get(family, id).await? else {
            return Ok(None);
        };

        let pending = self
            .ctx
            .queue
            .pending_for(family.entity_type(), id)
            .await?
            .is_some();

        self.decode(row, pending).map(Some)
    }

    /// All records, most recently updated first
    pub async fn list(&self) -> Result<Vec<Record<P>>> {
        let family = self.family();

        let rows = self.ctx.store.list(family).await?;
        let pending = self
            .ctx
            .queue
            .pending_entity_ids(family.entity_type())
            .await?;

        rows.into_iter()
            .map(|row| {
                let is_pending = pending.contains(&row.id);
                self.decode(row, is_pending)
            })
            .collect()
    }

    /// Filter records in memory; encrypted fields are matched after
    /// decryption
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Record<P>>> {
        let query = criteria
            .query
            .as_ref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        let tag = criteria
            .tag
            .as_ref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        let matches = self.list().await?.into_iter().filter(|record| {
            let text_ok = query.as_ref().map_or(true, |q| {
                record
                    .payload
                    .search_text()
                    .iter()
                    .any(|text| text.to_lowercase().contains(q))
            });
            let tag_ok = tag
                .as_ref()
                .map_or(true, |t| record.payload.tags().iter().any(|own| own == t));
            let status_ok = criteria
                .sync_status
                .map_or(true, |status| record.sync_status == status);
            let since_ok = criteria
                .updated_since
                .map_or(true, |since| record.updated_at >= since);

            text_ok && tag_ok && status_ok && since_ok
        });

        Ok(match criteria.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    /// Save the row and queue its slot in one transaction, so a record is
    /// never left without the mutation that carries it to the server
    async fn persist(
        &self,
        id: &str,
        mut payload: P,
        created_at: i64,
        action: QueueAction,
    ) -> Result<Record<P>> {
        let family = self.family();
        let encrypt = payload.wants_encryption() && self.ctx.encryption_available();
        if !encrypt {
            payload.set_encrypted(false);
        }

        let mut at_rest = payload.clone();
        if encrypt {
            for field in at_rest.sensitive_fields_mut() {
                *field = self.ctx.crypto.encrypt(field)?;
            }
        }
        let row = StoredRecord {
            id: id.to_string(),
            payload: serde_json::to_string(&at_rest)?,
            is_encrypted: encrypt,
            sync_status: SyncStatus::Pending.as_str().to_string(),
            created_at,
            updated_at: 0,
        };

        let db = self.ctx.store.database();
        let stored = {
            let _guard = db.write_lock().await;
            let mut tx = db.begin_immediate().await?;

            let stored = LocalStore::upsert_in(&mut tx, family, &row).await?;

            let wire = serde_json::to_string(&WireRecord {
                id,
                created_at: stored.created_at,
                updated_at: stored.updated_at,
                payload: &payload,
            })?;
            let body = if encrypt {
                self.ctx.crypto.encrypt(&wire)?
            } else {
                wire
            };

            let method = action.method();
            SyncQueue::enqueue_in(
                &mut tx,
                QueuedMutation {
                    entity_type: family.entity_type().to_string(),
                    entity_id: id.to_string(),
                    action,
                    endpoint: family.endpoint(method, id),
                    method,
                    body,
                    body_encrypted: encrypt,
                },
            )
            .await?;

            tx.commit().await?;
            stored
        };

        self.kick_sync();

        Ok(Record {
            id: stored.id,
            payload,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            sync_status: SyncStatus::Pending,
            is_encrypted: encrypt,
        })
    }

    fn decode(&self, row: StoredRecord, pending: bool) -> Result<Record<P>> {
        let mut payload: P = serde_json::from_str(&row.payload)?;

        if row.is_encrypted {
            self.decrypt_fields(&row.id, &mut payload);
        }

        let sync_status = if pending {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };

        Ok(Record {
            id: row.id,
            payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sync_status,
            is_encrypted: row.is_encrypted,
        })
    }

    /// Never fails: unreadable fields become the placeholder
    fn decrypt_fields(&self, id: &str, payload: &mut P) {
        let available = self.ctx.encryption_available();
        let mut unreadable = 0;

        for field in payload.sensitive_fields_mut() {
            let plaintext = if available {
                self.ctx.crypto.decrypt(field).ok()
            } else {
                None
            };

            match plaintext {
                Some(plaintext) => *field = plaintext,
                None => {
                    *field = UNAVAILABLE_PLACEHOLDER.to_string();
                    unreadable += 1;
                }
            }
        }

        if unreadable > 0 {
            tracing::warn!(
                "{} field(s) of {} {} could not be decrypted",
                unreadable,
                self.family(),
                id
            );
        }
    }

    fn kick_sync(&self) {
        if self.ctx.connectivity.is_online() {
            self.ctx.engine.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::services::MemoryKeyStore;
    use crate::sync::{RemoteClient, RemoteRequest};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullRemote;

    #[async_trait]
    impl RemoteClient for NullRemote {
        async fn send(&self, _request: &RemoteRequest) -> Result<u16> {
            Ok(200)
        }

        async fn ping(&self) -> bool {
            false
        }
    }

    async fn create_test_context() -> ServiceContext {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.clone());
        let queue = SyncQueue::new(db);
        let crypto = Arc::new(EncryptionGateway::new(Arc::new(MemoryKeyStore::new())));
        let connectivity = ConnectivityMonitor::new(false, Duration::from_millis(1_500));
        let engine = SyncEngine::new(
            queue.clone(),
            store.clone(),
            crypto.clone(),
            Arc::new(NullRemote),
            connectivity.clone(),
            50,
            Duration::from_secs(30),
        );
        ServiceContext::new(store, queue, crypto, engine, connectivity)
    }

    fn secret_entry(title: &str, content: &str) -> JournalEntry {
        JournalEntry {
            title: title.to_string(),
            content: content.to_string(),
            is_encrypted: true,
            ..JournalEntry::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let ctx = create_test_context().await;
        let service = JournalService::new(ctx);

        let created = service.create(secret_entry("A", "B")).await.unwrap();
        assert_eq!(created.sync_status, SyncStatus::Pending);
        assert!(created.is_encrypted);

        let fetched = service.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.payload.title, "A");
        assert_eq!(fetched.payload.content, "B");
        assert_eq!(fetched.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_encrypted_fields_never_stored_in_plaintext() {
        let ctx = create_test_context().await;
        let service = JournalService::new(ctx.clone());

        let created = service
            .create(secret_entry("Informant name", "Meeting location"))
            .await
            .unwrap();

        let row = ctx
            .store
            .get(RecordFamily::JournalEntry, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_encrypted);
        assert!(!row.payload.contains("Informant"));
        assert!(!row.payload.contains("Meeting location"));

        let slot = ctx.queue.list().await.unwrap().remove(0);
        assert!(slot.body_encrypted);
        assert!(!slot.body.contains("Informant"));
    }

    #[tokio::test]
    async fn test_unencrypted_record_stores_plaintext() {
        let ctx = create_test_context().await;
        let service = LearningPathService::new(ctx.clone());

        let created = service
            .create(LearningPath {
                title: "Interview basics".to_string(),
                progress: 20,
                ..LearningPath::default()
            })
            .await
            .unwrap();

        assert!(!created.is_encrypted);
        let row = ctx
            .store
            .get(RecordFamily::LearningPath, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert!(row.payload.contains("Interview basics"));
    }

    #[tokio::test]
    async fn test_offline_edits_coalesce_to_last_state() {
        let ctx = create_test_context().await;
        let service = JournalService::new(ctx.clone());

        let created = service.create(secret_entry("v1", "body")).await.unwrap();
        for version in ["v2", "v3", "v4"] {
            service
                .update(&created.id, secret_entry(version, "body"))
                .await
                .unwrap();
        }

        let slots = ctx.queue.list().await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].method, "POST");

        let body: serde_json::Value =
            serde_json::from_str(&ctx.crypto.decrypt(&slots[0].body).unwrap()).unwrap();
        assert_eq!(body["title"], "v4");
        assert_eq!(body["id"], created.id.as_str());
    }

    #[tokio::test]
    async fn test_delete_after_create_leaves_no_slot() {
        let ctx = create_test_context().await;
        let service = DocumentService::new(ctx.clone());

        let created = service
            .create(Document {
                title: "Draft".to_string(),
                content: "...".to_string(),
                ..Document::default()
            })
            .await
            .unwrap();

        assert!(service.delete(&created.id).await.unwrap());
        assert!(ctx.queue.is_empty().await.unwrap());
        assert!(service.get(&created.id).await.unwrap().is_none());

        assert!(!service.delete(&created.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let ctx = create_test_context().await;
        let service = JournalService::new(ctx);

        let result = service.update("missing", secret_entry("A", "B")).await;
        assert!(matches!(result, Err(AppError::RecordNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_persisted() {
        let ctx = create_test_context().await;
        let service = JournalService::new(ctx.clone());

        let result = service.create(secret_entry("   ", "B")).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(ctx.store.count(RecordFamily::JournalEntry).await.unwrap(), 0);
        assert!(ctx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_key_yields_placeholder() {
        let ctx = create_test_context().await;
        let service = JournalService::new(ctx.clone());

        let created = service.create(secret_entry("A", "B")).await.unwrap();

        ctx.crypto.reset_key().unwrap();

        let fetched = service.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.payload.title, UNAVAILABLE_PLACEHOLDER);
        assert_eq!(fetched.payload.content, UNAVAILABLE_PLACEHOLDER);

        let listed = service.list().await.unwrap();
        assert_eq!(listed[0].payload.title, UNAVAILABLE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_search() {
        let ctx = create_test_context().await;
        let service = EvidenceService::new(ctx);

        service
            .create(Evidence {
                title: "Broken window".to_string(),
                description: "North side of the warehouse".to_string(),
                tags: vec!["Photo".to_string()],
                is_encrypted: true,
                ..Evidence::default()
            })
            .await
            .unwrap();
        service
            .create(Evidence {
                title: "Receipt".to_string(),
                description: "Hardware store".to_string(),
                tags: vec!["document".to_string()],
                ..Evidence::default()
            })
            .await
            .unwrap();

        // Matches decrypted text
        let results = service.search(&SearchCriteria::query("WAREHOUSE")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.title, "Broken window");

        let by_tag = service
            .search(&SearchCriteria {
                tag: Some("photo".to_string()),
                ..SearchCriteria::default()
            })
            .await
            .unwrap();
        assert_eq!(by_tag.len(), 1);

        let pending = service
            .search(&SearchCriteria {
                sync_status: Some(SyncStatus::Pending),
                limit: Some(1),
                ..SearchCriteria::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        let none = service.search(&SearchCriteria::query("nonexistent")).await.unwrap();
        assert!(none.is_empty());
    }
}
