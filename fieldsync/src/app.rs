//! Application context and initialization
//!
//! Owns the single instance of every service for the process. All services
//! are wired here and handed out through `AppContext`; nothing is global.

use crate::config::{SettingsStore, SyncSettings, DATABASE_FILE, KEYSTORE_SERVICE};
use crate::crypto::EncryptionGateway;
use crate::database::{Database, LocalStore};
use crate::error::Result;
use crate::services::{
    DocumentService, EvidenceService, JournalService, KeyringStore, LearningPathService,
    LegalCaseService, SecureKeyStore, ServiceContext,
};
use crate::sync::{
    ConnectivityMonitor, CycleOutcome, HttpRemoteClient, RemoteClient, SyncEngine, SyncQueue,
    UnconfiguredRemote,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppContext {
    pub data_dir: PathBuf,
    settings: SyncSettings,
    services: ServiceContext,
    remote: Arc<dyn RemoteClient>,
}

impl AppContext {
    /// Wire every service against the database in `data_dir`.
    ///
    /// A keystore failure is not fatal: it is logged once and records are
    /// stored unencrypted until a key becomes available.
    pub async fn open(
        data_dir: &Path,
        settings: SyncSettings,
        keystore: Arc<dyn SecureKeyStore>,
        remote: Arc<dyn RemoteClient>,
        initially_online: bool,
    ) -> Result<Self> {
        tracing::info!("Initializing fieldsync in {:?}", data_dir);

        settings.validate()?;
        std::fs::create_dir_all(data_dir)?;

        let db = Database::open(&data_dir.join(DATABASE_FILE)).await?;
        let store = LocalStore::new(db.clone());
        let queue = SyncQueue::new(db);

        let crypto = Arc::new(EncryptionGateway::new(keystore));

        let connectivity = ConnectivityMonitor::new(initially_online, settings.debounce());

        let engine = SyncEngine::new(
            queue.clone(),
            store.clone(),
            crypto.clone(),
            remote.clone(),
            connectivity.clone(),
            settings.batch_size,
            settings.request_timeout(),
        );
        engine.attach(&connectivity);

        let services = ServiceContext::new(store, queue, crypto, engine, connectivity);
        services.prepare_encryption();

        tracing::info!("fieldsync initialized successfully");

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            settings,
            services,
            remote,
        })
    }

    /// Open with settings from `settings.json`, the OS keychain and the
    /// HTTP client. Starts offline without touching the network until
    /// `start_background` or `check_connectivity` reaches the remote.
    /// Without a configured base URL records stay queued.
    pub async fn open_default(data_dir: &Path) -> Result<Self> {
        let settings = SettingsStore::new(data_dir).load().await?;

        let remote: Arc<dyn RemoteClient> = if settings.api_base_url.trim().is_empty() {
            tracing::warn!("No api_base_url configured, working offline");
            Arc::new(UnconfiguredRemote)
        } else {
            Arc::new(HttpRemoteClient::new(&settings)?)
        };
        let keystore: Arc<dyn SecureKeyStore> = Arc::new(KeyringStore::new(KEYSTORE_SERVICE));

        Self::open(data_dir, settings, keystore, remote, false).await
    }

    /// Ping the remote once and feed the result to the connectivity monitor
    pub async fn check_connectivity(&self) -> bool {
        let reachable = self.remote.ping().await;
        self.services.connectivity.report(reachable);
        reachable
    }

    /// Start the reachability probe and the periodic sync loop, both at
    /// the configured probe interval. Returns no handles when the probe is
    /// disabled.
    pub fn start_background(&self) -> Vec<JoinHandle<()>> {
        let Some(interval) = self.settings.probe_interval() else {
            tracing::info!("Background probe disabled");
            return Vec::new();
        };

        vec![
            self.services
                .connectivity
                .spawn_probe(self.remote.clone(), interval),
            self.services.engine.start_periodic(interval),
        ]
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn documents(&self) -> DocumentService {
        DocumentService::new(self.services.clone())
    }

    pub fn journal(&self) -> JournalService {
        JournalService::new(self.services.clone())
    }

    pub fn evidence(&self) -> EvidenceService {
        EvidenceService::new(self.services.clone())
    }

    pub fn learning_paths(&self) -> LearningPathService {
        LearningPathService::new(self.services.clone())
    }

    pub fn legal_cases(&self) -> LegalCaseService {
        LegalCaseService::new(self.services.clone())
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.services.connectivity
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.services.engine
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.services.queue
    }

    pub fn store(&self) -> &LocalStore {
        &self.services.store
    }

    /// Manual "sync now"; runs one cycle in the caller's task
    pub async fn sync_now(&self) -> Result<CycleOutcome> {
        self.services.engine.run_cycle().await
    }

    /// Destroy the encryption key. Encrypted fields already on disk become
    /// unreadable and read back as the placeholder.
    pub fn reset_encryption_key(&self) -> Result<()> {
        self.services.crypto.reset_key()
    }
}
