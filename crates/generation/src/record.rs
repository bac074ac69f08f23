//! Persisted generation records and the read models built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use vectorsmith_core::{EditHistory, Entity, GenerationId, UserId, VersionId};

use crate::request::ResolvedRequest;

/// Default and maximum page sizes for listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One generation request as stored.
///
/// Mutated only to flip visibility or to record which models were invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub id: GenerationId,
    pub user_id: UserId,
    pub subject: String,
    pub style: Option<String>,
    pub aspect_ratio: String,
    pub config: JsonValue,
    pub model_ids: Vec<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Generation {
    type Id = GenerationId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// One rendered document of a generation, unique by
/// `(generation_id, version_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: VersionId,
    pub generation_id: GenerationId,
    pub version_number: i32,
    pub content: String,
    pub edit_history: EditHistory,
    pub ai_generated: bool,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub last_edited_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Version {
    type Id = VersionId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Insert payload for a generation row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGeneration {
    pub user_id: UserId,
    pub subject: String,
    pub style: Option<String>,
    pub aspect_ratio: String,
    pub config: JsonValue,
    pub model_ids: Vec<String>,
    pub is_public: bool,
}

impl NewGeneration {
    pub fn from_request(user_id: UserId, request: &ResolvedRequest) -> Self {
        Self {
            user_id,
            subject: request.subject.clone(),
            style: request.style.clone(),
            aspect_ratio: request.aspect_ratio.clone(),
            config: request.config_blob(),
            model_ids: Vec::new(),
            is_public: false,
        }
    }

    pub fn with_model_ids(mut self, model_ids: Vec<String>) -> Self {
        self.model_ids = model_ids;
        self
    }
}

/// Insert payload for a version row. `version_number` is assigned by the
/// store when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub content: String,
    pub version_number: Option<i32>,
    pub edit_history: EditHistory,
    pub ai_generated: bool,
}

impl NewVersion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            version_number: None,
            edit_history: EditHistory::new(),
            ai_generated: false,
        }
    }

    pub fn numbered(mut self, version_number: i32) -> Self {
        self.version_number = Some(version_number);
        self
    }

    pub fn ai_generated(mut self) -> Self {
        self.ai_generated = true;
        self
    }

    pub fn with_history(mut self, history: EditHistory) -> Self {
        self.edit_history = history;
        self
    }
}

/// Listing item: the generation plus only its highest version number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    #[serde(flatten)]
    pub generation: Generation,
    pub latest_version: i32,
}

/// A generation with all of its versions, ascending by version number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationDetail {
    #[serde(flatten)]
    pub generation: Generation,
    pub versions: Vec<Version>,
}

/// Listing filter. Both constraints apply when both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationFilter {
    pub owner: Option<UserId>,
    pub public_only: bool,
}

impl GenerationFilter {
    pub fn owned_by(owner: UserId) -> Self {
        Self {
            owner: Some(owner),
            public_only: false,
        }
    }

    pub fn public() -> Self {
        Self {
            owner: None,
            public_only: true,
        }
    }

    pub fn matches(&self, generation: &Generation) -> bool {
        self.owner.is_none_or(|owner| generation.user_id == owner)
            && (!self.public_only || generation.is_public)
    }
}

/// 1-based page request; page size clamped to `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page(),
            page_size: request.page_size(),
        }
    }
}
