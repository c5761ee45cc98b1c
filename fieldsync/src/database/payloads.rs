//! Record family payloads
//!
//! Each family is a plain serde struct implementing `RecordPayload`, which
//! tells the record service which table it lives in, which text fields are
//! sensitive, and what search looks at. Field names use camelCase on the
//! wire and in the stored JSON.

use super::models::RecordFamily;
use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub trait RecordPayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const FAMILY: RecordFamily;

    /// Whether sensitive fields should be stored as ciphertext
    fn wants_encryption(&self) -> bool {
        false
    }

    /// Record whether encryption was actually applied; families without an
    /// encryption flag ignore it
    fn set_encrypted(&mut self, _encrypted: bool) {}

    /// Fields replaced by ciphertext when the record is encrypted
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        Vec::new()
    }

    /// Text matched by `search`
    fn search_text(&self) -> Vec<&str>;

    fn tags(&self) -> &[String];

    /// Trim and validate input before it is persisted
    fn normalize(&mut self) -> Result<()>;
}

fn normalize_title(title: &mut String) -> Result<()> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("title must not be empty".to_string()));
    }
    *title = trimmed.to_string();
    Ok(())
}

fn normalize_tags(tags: &mut Vec<String>) {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.drain(..) {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    *tags = normalized;
}

fn normalize_optional(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
}

/// Personal journal entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl RecordPayload for JournalEntry {
    const FAMILY: RecordFamily = RecordFamily::JournalEntry;

    fn wants_encryption(&self) -> bool {
        self.is_encrypted
    }

    fn set_encrypted(&mut self, encrypted: bool) {
        self.is_encrypted = encrypted;
    }

    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.title, &mut self.content]
    }

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![self.title.as_str(), self.content.as_str()];
        text.extend(self.mood.as_deref());
        text.extend(self.location.as_deref());
        text
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn normalize(&mut self) -> Result<()> {
        normalize_title(&mut self.title)?;
        normalize_optional(&mut self.mood);
        normalize_optional(&mut self.location);
        normalize_tags(&mut self.tags);
        Ok(())
    }
}

/// Free-form document (letters, forms, drafts)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub doc_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl RecordPayload for Document {
    const FAMILY: RecordFamily = RecordFamily::Document;

    fn wants_encryption(&self) -> bool {
        self.is_encrypted
    }

    fn set_encrypted(&mut self, encrypted: bool) {
        self.is_encrypted = encrypted;
    }

    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.title, &mut self.content]
    }

    fn search_text(&self) -> Vec<&str> {
        vec![
            self.title.as_str(),
            self.content.as_str(),
            self.doc_type.as_str(),
        ]
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn normalize(&mut self) -> Result<()> {
        normalize_title(&mut self.title)?;
        self.doc_type = self.doc_type.trim().to_lowercase();
        normalize_tags(&mut self.tags);
        Ok(())
    }
}

/// Evidence item captured in the field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence_type: String,
    /// Local path of the captured media file
    #[serde(default)]
    pub file_path: Option<String>,
    /// Capture time in ms, distinct from record creation
    #[serde(default)]
    pub captured_at: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl RecordPayload for Evidence {
    const FAMILY: RecordFamily = RecordFamily::Evidence;

    fn wants_encryption(&self) -> bool {
        self.is_encrypted
    }

    fn set_encrypted(&mut self, encrypted: bool) {
        self.is_encrypted = encrypted;
    }

    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        let mut fields = vec![&mut self.title, &mut self.description];
        if let Some(path) = self.file_path.as_mut() {
            fields.push(path);
        }
        fields
    }

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![
            self.title.as_str(),
            self.description.as_str(),
            self.evidence_type.as_str(),
        ];
        text.extend(self.location.as_deref());
        text
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn normalize(&mut self) -> Result<()> {
        normalize_title(&mut self.title)?;
        self.evidence_type = self.evidence_type.trim().to_lowercase();
        normalize_optional(&mut self.file_path);
        normalize_optional(&mut self.location);
        normalize_optional(&mut self.case_id);
        normalize_tags(&mut self.tags);
        Ok(())
    }
}

/// Training curriculum; never sensitive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub modules: Vec<String>,
    /// Percent complete, 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RecordPayload for LearningPath {
    const FAMILY: RecordFamily = RecordFamily::LearningPath;

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![self.title.as_str(), self.description.as_str()];
        text.extend(self.modules.iter().map(String::as_str));
        text
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn normalize(&mut self) -> Result<()> {
        normalize_title(&mut self.title)?;
        if self.progress > 100 {
            return Err(AppError::InvalidInput(format!(
                "progress must be at most 100, got {}",
                self.progress
            )));
        }
        self.modules.retain(|m| !m.trim().is_empty());
        normalize_tags(&mut self.tags);
        Ok(())
    }
}

/// Legal case file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalCase {
    pub title: String,
    #[serde(default)]
    pub case_number: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl RecordPayload for LegalCase {
    const FAMILY: RecordFamily = RecordFamily::LegalCase;

    fn wants_encryption(&self) -> bool {
        self.is_encrypted
    }

    fn set_encrypted(&mut self, encrypted: bool) {
        self.is_encrypted = encrypted;
    }

    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.title, &mut self.notes]
    }

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![self.title.as_str(), self.notes.as_str(), self.status.as_str()];
        text.extend(self.case_number.as_deref());
        text.extend(self.jurisdiction.as_deref());
        text
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn normalize(&mut self) -> Result<()> {
        normalize_title(&mut self.title)?;
        normalize_optional(&mut self.case_number);
        normalize_optional(&mut self.jurisdiction);
        if self.status.trim().is_empty() {
            self.status = "open".to_string();
        } else {
            self.status = self.status.trim().to_lowercase();
        }
        normalize_tags(&mut self.tags);
        Ok(())
    }
}
