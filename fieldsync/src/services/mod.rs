//! Services module
//!
//! Record services that coordinate the local store, the sync queue and the
//! encryption gateway, plus the secure key storage they depend on.

pub mod credentials;
pub mod records;

pub use credentials::{KeyringStore, MemoryKeyStore, SecureKeyStore};
pub use records::{
    DocumentService, EvidenceService, JournalService, LearningPathService, LegalCaseService,
    Record, RecordService, SearchCriteria, ServiceContext,
};
