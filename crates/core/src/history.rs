//! Bounded, newest-first edit history attached to each stored version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Maximum number of entries retained per version.
pub const EDIT_HISTORY_LIMIT: usize = 10;

/// One recorded edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub editor_user_id: Option<UserId>,
}

impl EditEntry {
    pub fn new(content: impl Into<String>, editor_user_id: Option<UserId>) -> Self {
        Self {
            content: content.into(),
            timestamp: Utc::now(),
            editor_user_id,
        }
    }
}

/// Newest entry at index 0; anything past [`EDIT_HISTORY_LIMIT`] is evicted
/// oldest-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditHistory(Vec<EditEntry>);

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored entries, re-applying the bound.
    pub fn from_entries(mut entries: Vec<EditEntry>) -> Self {
        entries.truncate(EDIT_HISTORY_LIMIT);
        Self(entries)
    }

    pub fn push(&mut self, entry: EditEntry) {
        self.0.insert(0, entry);
        self.0.truncate(EDIT_HISTORY_LIMIT);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn latest(&self) -> Option<&EditEntry> {
        self.0.first()
    }

    pub fn entries(&self) -> &[EditEntry] {
        &self.0
    }

    pub fn into_entries(self) -> Vec<EditEntry> {
        self.0
    }
}
