// src/storage/mod.rs
//! Content-addressed storage and attempt persistence.
//!
//! The content store holds credential artifacts and their metadata
//! documents. Artifacts are immutable and append-only: there is no update
//! or delete operation, so an artifact orphaned by a failed issuance simply
//! stays where it is.

pub mod attempts;
pub mod ipfs_client;
pub mod memory;
pub mod pinata;
pub mod retry;

use crate::error::{CredentialError, Result};
use crate::utils::serialization::{deserialize, serialize};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use attempts::{AttemptStore, FileAttemptStore, InMemoryAttemptStore};
pub use ipfs_client::IpfsStorage;
pub use memory::InMemoryContentStore;
pub use pinata::PinataStore;
pub use retry::RetryPolicy;

/// Public gateway used when none is configured.
pub const DEFAULT_GATEWAY: &str = "https://ipfs.io";

/// Content identifier assigned by the store (e.g. `Qm...` or `bafy...`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(cid: impl Into<String>) -> Result<Self> {
        let cid = cid.into();
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CredentialError::InputValidation(format!("invalid content id {cid:?}")));
        }
        Ok(Self(cid))
    }

    /// Extracts the identifier from `ipfs://<cid>[/path]`, a gateway URL
    /// `<gateway>/ipfs/<cid>[/path]`, or a bare identifier.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = if let Some(rest) = uri.strip_prefix("ipfs://") {
            rest
        } else if let Some((_, rest)) = uri.split_once("/ipfs/") {
            rest
        } else {
            uri
        };
        let cid = rest.split(['/', '?', '#']).next().unwrap_or_default();
        Self::new(cid)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `ipfs://<cid>`, the form recorded on the ledger.
    pub fn uri(&self) -> String {
        format!("ipfs://{}", self.0)
    }

    /// Path-style gateway URL. Works for both CIDv0 and CIDv1.
    pub fn gateway_url(&self, gateway: &str) -> String {
        format!("{}/ipfs/{}", gateway.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

/// Rewrites an `ipfs://` URI into a gateway URL, keeping any sub-path.
/// Anything else is returned unchanged.
pub fn resolve_gateway_url(uri: &str, gateway: &str) -> String {
    match uri.strip_prefix("ipfs://") {
        Some(rest) => format!("{}/ipfs/{}", gateway.trim_end_matches('/'), rest),
        None => uri.to_string(),
    }
}

/// A content-addressed blob store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores `bytes` and returns their identifier.
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<ContentId>;

    /// Fetches the bytes stored under `cid`.
    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>>;

    /// Resolvable locator for `cid`, embedded in metadata documents.
    fn locator(&self, cid: &ContentId) -> String;
}

/// Stores `value` as a JSON document and returns the exact bytes written
/// alongside the identifier.
pub async fn put_json<T: Serialize + Sync>(store: &dyn ContentStore, value: &T) -> Result<(ContentId, Vec<u8>)> {
    let bytes = serialize(value)?.into_bytes();
    let cid = store.put(bytes.clone(), "application/json").await?;
    Ok((cid, bytes))
}

/// Parses a JSON document already fetched from `cid`.
pub fn parse_json<T: DeserializeOwned>(cid: &ContentId, bytes: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CredentialError::ContentStore(format!("{cid} is not UTF-8: {e}")))?;
    deserialize::<T>(text).map_err(|e| CredentialError::ContentStore(format!("{cid} is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_from_uri_forms() {
        let expected = ContentId::new("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").unwrap();
        for uri in [
            "ipfs://QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
            "ipfs://QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG/readme",
            "https://gateway.pinata.cloud/ipfs/QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
            "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
        ] {
            assert_eq!(ContentId::from_uri(uri).unwrap(), expected, "{uri}");
        }
        assert!(ContentId::from_uri("ipfs://").is_err());
        assert!(ContentId::new("not a cid").is_err());
    }

    #[test]
    fn test_gateway_urls() {
        let cid = ContentId::new("Qm123").unwrap();
        assert_eq!(cid.uri(), "ipfs://Qm123");
        assert_eq!(cid.gateway_url("https://ipfs.io/"), "https://ipfs.io/ipfs/Qm123");
        assert_eq!(
            resolve_gateway_url("ipfs://Qm123/cert.pdf", DEFAULT_GATEWAY),
            "https://ipfs.io/ipfs/Qm123/cert.pdf"
        );
        assert_eq!(resolve_gateway_url("https://x/y", DEFAULT_GATEWAY), "https://x/y");
    }
}
