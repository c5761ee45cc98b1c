//! Database models
//!
//! Row structs and the small enums stored alongside them.

use crate::config::API_PREFIX;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Entity family; each has its own table and remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFamily {
    Document,
    JournalEntry,
    Evidence,
    LearningPath,
    LegalCase,
}

impl RecordFamily {
    pub const ALL: [RecordFamily; 5] = [
        RecordFamily::Document,
        RecordFamily::JournalEntry,
        RecordFamily::Evidence,
        RecordFamily::LearningPath,
        RecordFamily::LegalCase,
    ];

    pub fn table(self) -> &'static str {
        match self {
            RecordFamily::Document => "documents",
            RecordFamily::JournalEntry => "journal_entries",
            RecordFamily::Evidence => "evidence",
            RecordFamily::LearningPath => "learning_paths",
            RecordFamily::LegalCase => "legal_cases",
        }
    }

    /// Name stored in `sync_queue.entity_type`
    pub fn entity_type(self) -> &'static str {
        match self {
            RecordFamily::Document => "document",
            RecordFamily::JournalEntry => "journal_entry",
            RecordFamily::Evidence => "evidence",
            RecordFamily::LearningPath => "learning_path",
            RecordFamily::LegalCase => "legal_case",
        }
    }

    fn api_segment(self) -> &'static str {
        match self {
            RecordFamily::Document => "documents",
            RecordFamily::JournalEntry => "journal",
            RecordFamily::Evidence => "evidence",
            RecordFamily::LearningPath => "learning-paths",
            RecordFamily::LegalCase => "legal-cases",
        }
    }

    /// Remote endpoint for a mutation against `id`
    pub fn endpoint(self, method: HttpMethod, id: &str) -> String {
        match method {
            HttpMethod::Post => format!("{}/{}", API_PREFIX, self.api_segment()),
            HttpMethod::Put | HttpMethod::Delete => {
                format!("{}/{}/{}", API_PREFIX, self.api_segment(), id)
            }
        }
    }
}

impl fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_type())
    }
}

impl FromStr for RecordFamily {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordFamily::ALL
            .into_iter()
            .find(|family| family.entity_type() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown record family: {}", s)))
    }
}

/// Point-in-time sync marker; the queue is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            other => Err(AppError::InvalidInput(format!("Unknown sync status: {}", other))),
        }
    }
}

/// A record row as stored; `payload` is JSON with sensitive fields
/// already encrypted when `is_encrypted` is set
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredRecord {
    pub id: String,
    pub payload: String,
    pub is_encrypted: bool,
    pub sync_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredRecord {
    /// Unknown markers read as pending, which only costs an extra replay
    pub fn status(&self) -> SyncStatus {
        self.sync_status.parse().unwrap_or(SyncStatus::Pending)
    }
}

/// The kind of mutation a queue slot replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Create,
    Update,
    Delete,
}

impl QueueAction {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueAction::Create => "create",
            QueueAction::Update => "update",
            QueueAction::Delete => "delete",
        }
    }

    /// HTTP method the remote API expects for this action
    pub fn method(self) -> HttpMethod {
        match self {
            QueueAction::Create => HttpMethod::Post,
            QueueAction::Update => HttpMethod::Put,
            QueueAction::Delete => HttpMethod::Delete,
        }
    }
}

impl FromStr for QueueAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(QueueAction::Create),
            "update" => Ok(QueueAction::Update),
            "delete" => Ok(QueueAction::Delete),
            other => Err(AppError::InvalidInput(format!("Unknown queue action: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(AppError::InvalidInput(format!("Unsupported method: {}", other))),
        }
    }
}

/// One coalesced slot of the durable mutation log
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SyncQueueItem {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub endpoint: String,
    pub method: String,
    /// JSON body, or its ciphertext when `body_encrypted` is set
    pub body: String,
    pub body_encrypted: bool,
    pub timestamp: i64,
    pub retries: i64,
    /// Changes on every enqueue; a replay only retires the revision it sent
    pub revision: String,
    pub last_error: Option<String>,
    /// A replay of this slot has been started at least once
    pub dispatched: bool,
}

impl SyncQueueItem {
    pub fn action(&self) -> Result<QueueAction, AppError> {
        self.action.parse()
    }

    pub fn method(&self) -> Result<HttpMethod, AppError> {
        self.method.parse()
    }

    pub fn family(&self) -> Result<RecordFamily, AppError> {
        self.entity_type.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_round_trips_through_entity_type() {
        for family in RecordFamily::ALL {
            assert_eq!(family.entity_type().parse::<RecordFamily>().unwrap(), family);
        }
        assert!("note".parse::<RecordFamily>().is_err());
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            RecordFamily::JournalEntry.endpoint(HttpMethod::Post, "abc"),
            "/api/journal"
        );
        assert_eq!(
            RecordFamily::LegalCase.endpoint(HttpMethod::Put, "abc"),
            "/api/legal-cases/abc"
        );
        assert_eq!(
            RecordFamily::Evidence.endpoint(HttpMethod::Delete, "abc"),
            "/api/evidence/abc"
        );
    }

    #[test]
    fn test_unknown_sync_status_reads_as_pending() {
        let row = StoredRecord {
            id: "1".to_string(),
            payload: "{}".to_string(),
            is_encrypted: false,
            sync_status: "conflicted".to_string(),
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(row.status(), SyncStatus::Pending);
    }

    #[test]
    fn test_action_methods() {
        assert_eq!(QueueAction::Create.method(), HttpMethod::Post);
        assert_eq!(QueueAction::Update.method(), HttpMethod::Put);
        assert_eq!(QueueAction::Delete.method(), HttpMethod::Delete);
        assert_eq!("delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
    }
}
