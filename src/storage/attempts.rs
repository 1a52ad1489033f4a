// src/storage/attempts.rs
//! Persistence for issuance attempt records.
//!
//! An attempt is saved after every phase transition. The file-backed store
//! writes one JSON document per attempt and replaces it atomically, so a
//! crash leaves either the previous or the new record on disk, never a
//! torn one.

use crate::error::{CredentialError, Result};
use crate::models::IssuanceAttempt;
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Inserts or replaces the record with the same attempt id.
    async fn save(&self, attempt: &IssuanceAttempt) -> Result<()>;

    async fn load(&self, attempt_id: Uuid) -> Result<Option<IssuanceAttempt>>;

    /// Every stored attempt, oldest first.
    async fn list(&self) -> Result<Vec<IssuanceAttempt>>;

    /// Attempts that neither reached `Indexed` nor failed terminally.
    async fn list_incomplete(&self) -> Result<Vec<IssuanceAttempt>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|attempt| !attempt.is_complete())
            .collect())
    }
}

fn sort_by_creation(attempts: &mut [IssuanceAttempt]) {
    attempts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.attempt_id.cmp(&b.attempt_id)));
}

/// Process-local store. Records are lost on restart.
#[derive(Default)]
pub struct InMemoryAttemptStore {
    attempts: RwLock<HashMap<Uuid, IssuanceAttempt>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn save(&self, attempt: &IssuanceAttempt) -> Result<()> {
        self.attempts.write().await.insert(attempt.attempt_id, attempt.clone());
        Ok(())
    }

    async fn load(&self, attempt_id: Uuid) -> Result<Option<IssuanceAttempt>> {
        Ok(self.attempts.read().await.get(&attempt_id).cloned())
    }

    async fn list(&self) -> Result<Vec<IssuanceAttempt>> {
        let mut attempts: Vec<_> = self.attempts.read().await.values().cloned().collect();
        sort_by_creation(&mut attempts);
        Ok(attempts)
    }
}

/// One `<attempt_id>.json` file per attempt under a directory.
pub struct FileAttemptStore {
    dir: PathBuf,
}

impl FileAttemptStore {
    /// Opens `dir`, creating it if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CredentialError::AttemptStore(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, attempt_id: Uuid) -> PathBuf {
        self.dir.join(format!("{attempt_id}.json"))
    }
}

#[async_trait]
impl AttemptStore for FileAttemptStore {
    async fn save(&self, attempt: &IssuanceAttempt) -> Result<()> {
        let path = self.path_for(attempt.attempt_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(attempt)
            .map_err(|e| CredentialError::AttemptStore(format!("encode {}: {e}", attempt.attempt_id)))?;
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| CredentialError::AttemptStore(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| CredentialError::AttemptStore(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    async fn load(&self, attempt_id: Uuid) -> Result<Option<IssuanceAttempt>> {
        let path = self.path_for(attempt_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CredentialError::AttemptStore(format!("read {}: {e}", path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CredentialError::AttemptStore(format!("decode {}: {e}", path.display())))
    }

    async fn list(&self) -> Result<Vec<IssuanceAttempt>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| CredentialError::AttemptStore(format!("list {}: {e}", self.dir.display())))?;
        let mut attempts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CredentialError::AttemptStore(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<IssuanceAttempt>(&bytes).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => warn!("Skipping unreadable attempt record {}: {}", path.display(), e),
            }
        }
        sort_by_creation(&mut attempts);
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, IssuancePhase};

    fn attempt() -> IssuanceAttempt {
        IssuanceAttempt::new(
            Address::parse("0xA1").unwrap(),
            Address::parse("0xB2").unwrap(),
            Some("inst-1".into()),
        )
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_incomplete_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAttemptStore::open(dir.path().join("attempts")).await.unwrap();

        let mut pending = attempt();
        pending.advance(IssuancePhase::TxSubmitted);
        let mut done = attempt();
        done.advance(IssuancePhase::Indexed);
        store.save(&pending).await.unwrap();
        store.save(&done).await.unwrap();

        let loaded = store.load(pending.attempt_id).await.unwrap().unwrap();
        assert_eq!(loaded, pending);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());

        let incomplete = store.list_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].attempt_id, pending.attempt_id);
    }

    #[tokio::test]
    async fn test_file_store_skips_garbage_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAttemptStore::open(dir.path()).await.unwrap();
        store.save(&attempt()).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{").await.unwrap();
        tokio::fs::write(dir.path().join("x.json.tmp"), b"{}").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_record() {
        let store = InMemoryAttemptStore::new();
        let mut record = attempt();
        store.save(&record).await.unwrap();
        record.advance(IssuancePhase::ContentUploaded);
        store.save(&record).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].phase, IssuancePhase::ContentUploaded);
    }
}
