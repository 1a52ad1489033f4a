// src/storage/ipfs_client.rs
//! IPFS storage client for credential artifacts and metadata.
//!
//! Talks to an IPFS node's HTTP API (`/api/v0/add`, `/api/v0/cat`).
//!
//! # Security Considerations
//! - All stored data is public by default (IPFS is a public network)
//! - Hashes are content-addressable and permanent; nothing can be unpinned
//!   from here

use crate::error::{CredentialError, Result};
use crate::storage::{ContentId, ContentStore};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::TryStreamExt;
use ipfs_api_backend_hyper::{IpfsApi, IpfsClient, TryFromUri};
use log::{debug, info};
use std::io::Cursor;
use std::sync::Arc;
use tokio::task;

/// Thread-safe IPFS client wrapper.
///
/// Uses `ipfs-api-backend-hyper` under the hood. Its request futures are
/// not `Send`, so every call runs on a blocking thread with its own
/// single-use runtime.
#[derive(Clone)]
pub struct IpfsStorage {
    client: Arc<IpfsClient>,
    gateway: String,
}

impl IpfsStorage {
    /// # Arguments
    /// * `api_url` - IPFS HTTP API, e.g. `http://localhost:5001`
    /// * `gateway` - Public gateway used to build locators
    pub fn new(api_url: &str, gateway: &str) -> Result<Self> {
        let client = IpfsClient::from_str(api_url)
            .map_err(|e| CredentialError::InputValidation(format!("invalid IPFS API url {api_url:?}: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            gateway: gateway.trim_end_matches('/').to_string(),
        })
    }

    async fn store_data(&self, data: Vec<u8>) -> Result<String> {
        let client = self.client.clone();

        let res = task::spawn_blocking(move || -> std::result::Result<String, String> {
            let rt = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
            rt.block_on(async {
                let reader = Cursor::new(data);
                let res = client.add(reader).await.map_err(|e| e.to_string())?;
                Ok(res.hash)
            })
        })
        .await;

        match res {
            Ok(inner) => inner.map_err(|e| CredentialError::ContentStore(format!("ipfs add: {e}"))),
            Err(join_err) => Err(CredentialError::ContentStore(format!("ipfs add task: {join_err}"))),
        }
    }

    async fn retrieve_data(&self, hash: &str) -> Result<Vec<u8>> {
        let client = self.client.clone();
        let hash = hash.to_string();

        let data = task::spawn_blocking(move || -> std::result::Result<Vec<u8>, String> {
            let rt = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
            rt.block_on(async {
                let data = client
                    .cat(&hash)
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(data.to_vec())
            })
        })
        .await;

        match data {
            Ok(inner) => inner.map_err(|e| CredentialError::ContentStore(format!("ipfs cat: {e}"))),
            Err(join_err) => Err(CredentialError::ContentStore(format!("ipfs cat task: {join_err}"))),
        }
    }
}

#[async_trait]
impl ContentStore for IpfsStorage {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<ContentId> {
        debug!("Adding {} bytes ({}) to IPFS", bytes.len(), content_type);
        let hash = self.store_data(bytes).await?;
        let cid = ContentId::new(hash)?;
        info!("Stored content {} on IPFS", cid);
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        self.retrieve_data(cid.as_str()).await
    }

    fn locator(&self, cid: &ContentId) -> String {
        cid.gateway_url(&self.gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_api_url() {
        assert!(IpfsStorage::new("not a url", "https://ipfs.io").is_err());
    }

    #[test]
    fn test_locator_uses_gateway() {
        let storage = IpfsStorage::new("http://localhost:5001", "https://ipfs.io/").unwrap();
        let cid = ContentId::new("QmFile").unwrap();
        assert_eq!(storage.locator(&cid), "https://ipfs.io/ipfs/QmFile");
    }
}
