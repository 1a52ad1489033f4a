// src/storage/memory.rs
//! In-memory content store for local development and tests.
//!
//! Deduplicating: identical bytes always map to the same identifier,
//! derived from their Keccak-256 digest.

use crate::error::{CredentialError, Result};
use crate::storage::{ContentId, ContentStore, DEFAULT_GATEWAY};
use crate::utils::crypto::hash_data;
use async_trait::async_trait;
use ethers_core::utils::hex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    blobs: HashMap<ContentId, (Vec<u8>, String)>,
    fail_next: u32,
    assigned_ids: VecDeque<String>,
    puts: u64,
    gets: u64,
}

pub struct InMemoryContentStore {
    inner: Mutex<Inner>,
    gateway: String,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new(DEFAULT_GATEWAY)
    }
}

impl InMemoryContentStore {
    pub fn new(gateway: &str) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            gateway: gateway.trim_end_matches('/').to_string(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| CredentialError::ContentStore(format!("content store lock poisoned: {e}")))
    }

    /// The next `count` uploads fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_next = count;
        }
    }

    /// Identifiers handed out, in order, to the next distinct uploads.
    pub fn assign_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut inner) = self.lock() {
            inner.assigned_ids.extend(ids.into_iter().map(Into::into));
        }
    }

    /// Number of successful uploads.
    pub fn put_count(&self) -> u64 {
        self.lock().map(|inner| inner.puts).unwrap_or_default()
    }

    /// Number of successful downloads.
    pub fn get_count(&self) -> u64 {
        self.lock().map(|inner| inner.gets).unwrap_or_default()
    }

    pub fn contains(&self, cid: &ContentId) -> bool {
        self.lock().map(|inner| inner.blobs.contains_key(cid)).unwrap_or(false)
    }

    pub fn content_type(&self, cid: &ContentId) -> Option<String> {
        self.lock().ok()?.blobs.get(cid).map(|(_, content_type)| content_type.clone())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<ContentId> {
        let mut inner = self.lock()?;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(CredentialError::ContentStore("simulated upload failure".into()));
        }
        inner.puts += 1;

        if let Some((cid, _)) = inner.blobs.iter().find(|(_, (stored, _))| *stored == bytes) {
            return Ok(cid.clone());
        }
        let cid = match inner.assigned_ids.pop_front() {
            Some(id) => ContentId::new(id)?,
            None => ContentId::new(format!("bafk{}", hex::encode(&hash_data(&bytes)[..20])))?,
        };
        inner.blobs.insert(cid.clone(), (bytes, content_type.to_string()));
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        let mut inner = self.lock()?;
        let bytes = inner
            .blobs
            .get(cid)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| CredentialError::ContentStore(format!("{cid} not found")))?;
        inner.gets += 1;
        Ok(bytes)
    }

    fn locator(&self, cid: &ContentId) -> String {
        cid.gateway_url(&self.gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_bytes_deduplicate() {
        let store = InMemoryContentStore::default();
        let a = store.put(b"same".to_vec(), "text/plain").await.unwrap();
        let b = store.put(b"same".to_vec(), "text/plain").await.unwrap();
        let c = store.put(b"other".to_vec(), "text/plain").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.get(&a).await.unwrap(), b"same");
    }

    #[tokio::test]
    async fn test_assigned_ids_and_failures() {
        let store = InMemoryContentStore::default();
        store.assign_ids(["Qm123"]);
        store.fail_next(1);
        assert!(store.put(b"file".to_vec(), "application/pdf").await.is_err());
        let cid = store.put(b"file".to_vec(), "application/pdf").await.unwrap();
        assert_eq!(cid.as_str(), "Qm123");
        assert_eq!(store.content_type(&cid).as_deref(), Some("application/pdf"));
        assert_eq!(store.locator(&cid), "https://ipfs.io/ipfs/Qm123");
    }
}
