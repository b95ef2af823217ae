//! Saved profile history, keyed by user email.
//!
//! Each user has one value under `cv_history_{email}`: a JSON array of
//! `HistoryEntry`, newest first. Backends only store strings; the list logic lives
//! in `HistoryStore` so every backend behaves the same.

pub mod handlers;
pub mod memory;
pub mod redis_store;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::history::HistoryEntry;
use crate::models::profile::{CandidateProfile, ImagePayload};

pub const KEY_PREFIX: &str = "cv_history_";

/// String key/value storage behind the history list.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String) -> Result<()>;
}

/// Read-modify-write access to the history lists.
///
/// `save` and `delete` hold `write_lock` across their read and write so two
/// concurrent updates never overwrite each other's entries. Clones share the lock.
#[derive(Clone)]
pub struct HistoryStore {
    repository: Arc<dyn ProfileRepository>,
    write_lock: Arc<Mutex<()>>,
}

impl HistoryStore {
    pub fn new(repository: Arc<dyn ProfileRepository>) -> Self {
        Self {
            repository,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Saved entries for `email`, newest first. A corrupt value reads as empty.
    pub async fn list(&self, email: &str) -> Result<Vec<HistoryEntry>> {
        let key = history_key(email);
        let Some(raw) = self.repository.get(&key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Discarding unreadable history under {key}: {e}");
                Ok(Vec::new())
            }
        }
    }

    /// Prepends a new snapshot and returns it.
    pub async fn save(
        &self,
        email: &str,
        profile: CandidateProfile,
        photo: Option<ImagePayload>,
    ) -> Result<HistoryEntry> {
        let entry = HistoryEntry::new(profile, photo);
        let _guard = self.write_lock.lock().await;
        let mut entries = self.list(email).await?;
        entries.insert(0, entry.clone());
        self.write(email, &entries).await?;
        info!("Saved history entry {} ({} total)", entry.id, entries.len());
        Ok(entry)
    }

    /// Removes one entry. Returns false when no entry has that id.
    pub async fn delete(&self, email: &str, id: Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.list(email).await?;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.write(email, &entries).await?;
        info!("Deleted history entry {id}");
        Ok(true)
    }

    async fn write(&self, email: &str, entries: &[HistoryEntry]) -> Result<()> {
        let value = serde_json::to_string(entries).context("Failed to serialize history")?;
        self.repository.put(&history_key(email), value).await
    }
}

pub fn history_key(email: &str) -> String {
    format!("{KEY_PREFIX}{}", email.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory::MemoryRepository;

    fn store() -> (HistoryStore, Arc<MemoryRepository>) {
        let repository = Arc::new(MemoryRepository::default());
        (HistoryStore::new(repository.clone()), repository)
    }

    /// Yields between reading and returning so interleaved updates can race.
    #[derive(Default)]
    struct YieldingRepository {
        inner: MemoryRepository,
    }

    #[async_trait]
    impl ProfileRepository for YieldingRepository {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.inner.get(key).await;
            tokio::task::yield_now().await;
            value
        }

        async fn put(&self, key: &str, value: String) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.put(key, value).await
        }
    }

    fn named(first: &str) -> CandidateProfile {
        CandidateProfile {
            first_name: first.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_prepends_newest_first() {
        let (store, _) = store();
        store.save("a@example.com", named("First"), None).await.unwrap();
        store.save("a@example.com", named("Second"), None).await.unwrap();

        let entries = store.list("a@example.com").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.form_data.first_name.as_str()).collect();
        assert_eq!(names, vec!["Second", "First"]);
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_both_entries() {
        let store = HistoryStore::new(Arc::new(YieldingRepository::default()));
        let (first, second) = tokio::join!(
            store.save("a@example.com", named("First"), None),
            store.save("a@example.com", named("Second"), None),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(store.list("a@example.com").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_save_and_delete_do_not_clobber() {
        let store = HistoryStore::new(Arc::new(YieldingRepository::default()));
        let doomed = store.save("a@example.com", named("Doomed"), None).await.unwrap();

        let (saved, deleted) = tokio::join!(
            store.save("a@example.com", named("Kept"), None),
            store.delete("a@example.com", doomed.id),
        );
        let saved = saved.unwrap();
        assert!(deleted.unwrap());

        let entries = store.list("a@example.com").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, saved.id);
    }

    #[tokio::test]
    async fn test_histories_are_per_email() {
        let (store, _) = store();
        store.save("a@example.com", named("A"), None).await.unwrap();
        assert!(store.list("b@example.com").await.unwrap().is_empty());
        assert_eq!(store.list(" A@Example.com ").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_only_matching_entry() {
        let (store, _) = store();
        let keep = store.save("a@example.com", named("Keep"), None).await.unwrap();
        let removed = store.save("a@example.com", named("Drop"), None).await.unwrap();

        assert!(store.delete("a@example.com", removed.id).await.unwrap());
        assert!(!store.delete("a@example.com", removed.id).await.unwrap());

        let entries = store.list("a@example.com").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, keep.id);
    }

    #[tokio::test]
    async fn test_corrupt_value_reads_as_empty() {
        let (store, repository) = store();
        repository
            .put(&history_key("a@example.com"), "{not json".to_string())
            .await
            .unwrap();
        assert!(store.list("a@example.com").await.unwrap().is_empty());

        store.save("a@example.com", named("Fresh"), None).await.unwrap();
        assert_eq!(store.list("a@example.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stored_value_uses_camel_case_fields() {
        let (store, repository) = store();
        store
            .save("a@example.com", named("Jane"), Some(ImagePayload::new("data:image/png;base64,AA==")))
            .await
            .unwrap();
        let raw = repository.get(&history_key("a@example.com")).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["formData"]["firstName"], "Jane");
        assert_eq!(value[0]["photoPreview"], "data:image/png;base64,AA==");
        assert!(value[0]["timestamp"].is_string());
    }
}
