use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use vectorsmith_core::{EditHistory, Entity, GenerationId, UserId, VersionId};
use vectorsmith_generation::{
    Generation, GenerationDetail, GenerationFilter, GenerationSummary, NewGeneration, NewVersion, PageRequest,
    Paginated, Version,
};

use super::r#trait::{GenerationStore, StoreError, VersionEdit};
use crate::ledger::{CreditLedger, LedgerError, Reservation};

#[derive(Debug, Default)]
struct State {
    credits: HashMap<UserId, i64>,
    generations: BTreeMap<GenerationId, Generation>,
    versions: BTreeMap<VersionId, Version>,
    last_generation_id: i64,
    last_version_id: i64,
}

impl State {
    fn insert_generation(&mut self, new: NewGeneration) -> Result<Generation, StoreError> {
        if !self.credits.contains_key(&new.user_id) {
            return Err(StoreError::UserNotFound);
        }
        self.last_generation_id += 1;
        let generation = Generation {
            id: GenerationId::new(self.last_generation_id),
            user_id: new.user_id,
            subject: new.subject,
            style: new.style,
            aspect_ratio: new.aspect_ratio,
            config: new.config,
            model_ids: new.model_ids,
            is_public: new.is_public,
            created_at: Utc::now(),
        };
        self.generations.insert(generation.id(), generation.clone());
        Ok(generation)
    }

    fn versions_of(&self, generation_id: GenerationId) -> impl Iterator<Item = &Version> {
        self.versions.values().filter(move |v| v.generation_id == generation_id)
    }

    fn latest_version_number(&self, generation_id: GenerationId) -> i32 {
        self.versions_of(generation_id).map(|v| v.version_number).max().unwrap_or(0)
    }

    fn insert_version(&mut self, generation_id: GenerationId, new: NewVersion) -> Result<Version, StoreError> {
        if !self.generations.contains_key(&generation_id) {
            return Err(StoreError::NotFound(format!("generation {generation_id}")));
        }
        let version_number = match new.version_number {
            Some(n) if n < 1 => {
                return Err(StoreError::Conflict(format!("invalid version number {n}")));
            }
            Some(n) => n,
            None => self.latest_version_number(generation_id) + 1,
        };
        if self.versions_of(generation_id).any(|v| v.version_number == version_number) {
            return Err(StoreError::Conflict(format!(
                "version {version_number} already exists for generation {generation_id}"
            )));
        }

        self.last_version_id += 1;
        let now = Utc::now();
        let version = Version {
            id: VersionId::new(self.last_version_id),
            generation_id,
            version_number,
            content: new.content,
            edit_history: EditHistory::from_entries(new.edit_history.into_entries()),
            ai_generated: new.ai_generated,
            last_edited_at: None,
            last_edited_by: None,
            created_at: now,
        };
        self.versions.insert(version.id(), version.clone());
        Ok(version)
    }

    fn generation_mut(&mut self, generation_id: GenerationId) -> Result<&mut Generation, StoreError> {
        self.generations
            .get_mut(&generation_id)
            .ok_or_else(|| StoreError::NotFound(format!("generation {generation_id}")))
    }
}

/// In-memory generation store and credit ledger.
///
/// Intended for tests/dev. One lock guards users, generations and versions,
/// so "charge + create" is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seeding for tests.
    pub fn with_user(self, user_id: UserId, credits: i64) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.credits.insert(user_id, credits.max(0));
        }
        self
    }

    /// Register a user (or reset an existing user's balance).
    pub fn upsert_user(&self, user_id: UserId, credits: i64) -> Result<(), StoreError> {
        self.write()?.credits.insert(user_id, credits.max(0));
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl GenerationStore for InMemoryStore {
    async fn create_placeholder(
        &self,
        generation: NewGeneration,
        placeholder: String,
    ) -> Result<(Generation, Version), StoreError> {
        let mut state = self.write()?;
        let generation = state.insert_generation(generation)?;
        let version = state.insert_version(generation.id, NewVersion::new(placeholder).numbered(1).ai_generated())?;
        Ok((generation, version))
    }

    async fn create_charged(
        &self,
        generation: NewGeneration,
        version: NewVersion,
    ) -> Result<(Generation, Version), StoreError> {
        let mut state = self.write()?;
        let balance = *state.credits.get(&generation.user_id).ok_or(StoreError::UserNotFound)?;
        if balance <= 0 {
            return Err(StoreError::InsufficientCredit);
        }

        let user_id = generation.user_id;
        let generation = state.insert_generation(generation)?;
        let version = match state.insert_version(generation.id, version.numbered(1)) {
            Ok(version) => version,
            Err(err) => {
                state.generations.remove(&generation.id);
                return Err(err);
            }
        };
        if let Some(credits) = state.credits.get_mut(&user_id) {
            *credits -= 1;
        }
        Ok((generation, version))
    }

    async fn append_version(&self, generation_id: GenerationId, version: NewVersion) -> Result<Version, StoreError> {
        self.write()?.insert_version(generation_id, version)
    }

    async fn update_version(&self, version_id: VersionId, edit: VersionEdit) -> Result<Version, StoreError> {
        let mut state = self.write()?;
        let version = state
            .versions
            .get_mut(&version_id)
            .ok_or_else(|| StoreError::NotFound(format!("version {version_id}")))?;

        version.last_edited_at = Some(edit.entry.timestamp);
        version.last_edited_by = edit.entry.editor_user_id;
        version.content = edit.content;
        version.ai_generated = edit.ai_generated;
        version.edit_history.push(edit.entry);
        Ok(version.clone())
    }

    async fn record_models(&self, generation_id: GenerationId, model_ids: &[String]) -> Result<(), StoreError> {
        self.write()?.generation_mut(generation_id)?.model_ids = model_ids.to_vec();
        Ok(())
    }

    async fn set_visibility(&self, generation_id: GenerationId, is_public: bool) -> Result<Generation, StoreError> {
        let mut state = self.write()?;
        let generation = state.generation_mut(generation_id)?;
        generation.is_public = is_public;
        Ok(generation.clone())
    }

    async fn get_generation(&self, generation_id: GenerationId) -> Result<GenerationDetail, StoreError> {
        let state = self.read()?;
        let generation = state
            .generations
            .get(&generation_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("generation {generation_id}")))?;

        let mut versions: Vec<Version> = state.versions_of(generation_id).cloned().collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(GenerationDetail { generation, versions })
    }

    async fn get_version(&self, version_id: VersionId) -> Result<Version, StoreError> {
        self.read()?
            .versions
            .get(&version_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("version {version_id}")))
    }

    async fn list_paginated(
        &self,
        filter: GenerationFilter,
        page: PageRequest,
    ) -> Result<Paginated<GenerationSummary>, StoreError> {
        let state = self.read()?;

        let mut matching: Vec<&Generation> = state.generations.values().filter(|g| filter.matches(g)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|g| GenerationSummary {
                latest_version: state.latest_version_number(g.id),
                generation: g.clone(),
            })
            .collect();

        Ok(Paginated::new(items, total, page))
    }
}

#[async_trait]
impl CreditLedger for InMemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        let state = self
            .state
            .read()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
        state.credits.get(&user_id).copied().ok_or(LedgerError::UserNotFound)
    }

    async fn commit(&self, reservation: Reservation) -> Result<i64, LedgerError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
        let credits = state
            .credits
            .get_mut(&reservation.user_id())
            .ok_or(LedgerError::UserNotFound)?;
        if *credits <= 0 {
            return Err(LedgerError::InsufficientCredit);
        }
        *credits -= 1;
        Ok(*credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectorsmith_core::{EDIT_HISTORY_LIMIT, EditEntry};
    use vectorsmith_generation::GenerationRequest;

    fn new_generation(user_id: UserId) -> NewGeneration {
        let resolved = GenerationRequest::new("owl").resolve().unwrap();
        NewGeneration::from_request(user_id, &resolved)
    }

    #[tokio::test]
    async fn placeholder_creates_version_one() {
        let user = UserId::new();
        let store = InMemoryStore::new().with_user(user, 1);

        let (generation, version) = store
            .create_placeholder(new_generation(user), "<svg/>".to_string())
            .await
            .unwrap();

        assert_eq!(version.version_number, 1);
        assert_eq!(version.generation_id, generation.id);
        assert!(version.ai_generated);
        assert_eq!(store.balance(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_user_cannot_create() {
        let store = InMemoryStore::new();
        let err = store
            .create_placeholder(new_generation(UserId::new()), "x".into())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UserNotFound);
    }

    #[tokio::test]
    async fn append_assigns_next_number_and_rejects_duplicates() {
        let user = UserId::new();
        let store = InMemoryStore::new().with_user(user, 1);
        let (generation, _) = store.create_placeholder(new_generation(user), "v1".into()).await.unwrap();

        let v2 = store.append_version(generation.id, NewVersion::new("v2")).await.unwrap();
        assert_eq!(v2.version_number, 2);

        let err = store
            .append_version(generation.id, NewVersion::new("dup").numbered(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let detail = store.get_generation(generation.id).await.unwrap();
        let numbers: Vec<_> = detail.versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn eleven_updates_keep_ten_most_recent() {
        let user = UserId::new();
        let store = InMemoryStore::new().with_user(user, 1);
        let (_, version) = store.create_placeholder(new_generation(user), "v1".into()).await.unwrap();

        for i in 0..11 {
            let content = format!("edit-{i}");
            store
                .update_version(
                    version.id,
                    VersionEdit {
                        content: content.clone(),
                        entry: EditEntry::new(content, Some(user)),
                        ai_generated: false,
                    },
                )
                .await
                .unwrap();
        }

        let stored = store.get_version(version.id).await.unwrap();
        assert_eq!(stored.content, "edit-10");
        assert_eq!(stored.edit_history.len(), EDIT_HISTORY_LIMIT);
        assert_eq!(stored.edit_history.latest().unwrap().content, "edit-10");
        assert_eq!(stored.edit_history.entries().last().unwrap().content, "edit-1");
        assert_eq!(stored.last_edited_by, Some(user));
    }

    #[tokio::test]
    async fn charged_create_is_all_or_nothing() {
        let user = UserId::new();
        let store = InMemoryStore::new().with_user(user, 1);

        store
            .create_charged(new_generation(user), NewVersion::new("<svg/>"))
            .await
            .unwrap();
        assert_eq!(store.balance(user).await.unwrap(), 0);

        let err = store
            .create_charged(new_generation(user), NewVersion::new("<svg/>"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::InsufficientCredit);

        let page = store
            .list_paginated(GenerationFilter::owned_by(user), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn commit_never_goes_negative() {
        let user = UserId::new();
        let store = InMemoryStore::new().with_user(user, 1);

        let first = store.reserve(user).await.unwrap();
        let second = store.reserve(user).await.unwrap();

        assert_eq!(store.commit(first).await.unwrap(), 0);
        assert_eq!(store.commit(second).await.unwrap_err(), LedgerError::InsufficientCredit);
        assert_eq!(store.balance(user).await.unwrap(), 0);
        assert_eq!(store.reserve(user).await.unwrap_err(), LedgerError::InsufficientCredit);
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_annotated() {
        let user = UserId::new();
        let other = UserId::new();
        let store = InMemoryStore::new().with_user(user, 5).with_user(other, 5);

        let (first, _) = store.create_placeholder(new_generation(user), "a".into()).await.unwrap();
        let (second, _) = store.create_placeholder(new_generation(user), "b".into()).await.unwrap();
        let (theirs, _) = store.create_placeholder(new_generation(other), "c".into()).await.unwrap();
        store.append_version(first.id, NewVersion::new("a2")).await.unwrap();
        store.set_visibility(theirs.id, true).await.unwrap();

        let mine = store
            .list_paginated(GenerationFilter::owned_by(user), PageRequest::new(Some(1), Some(1)))
            .await
            .unwrap();
        assert_eq!(mine.total, 2);
        assert_eq!(mine.items.len(), 1);
        assert_eq!(mine.items[0].generation.id, second.id);

        let page_two = store
            .list_paginated(GenerationFilter::owned_by(user), PageRequest::new(Some(2), Some(1)))
            .await
            .unwrap();
        assert_eq!(page_two.items[0].generation.id, first.id);
        assert_eq!(page_two.items[0].latest_version, 2);

        let public = store
            .list_paginated(GenerationFilter::public(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(public.total, 1);
        assert_eq!(public.items[0].generation.id, theirs.id);
    }
}
