// src/storage/pinata.rs
//! Pinata pinning service as a content store.
//!
//! Uploads go through `pinFileToIPFS` (multipart, bearer JWT); reads go
//! through the configured gateway.

use crate::error::{CredentialError, Result};
use crate::storage::{ContentId, ContentStore};
use async_trait::async_trait;
use log::info;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_PINATA_API: &str = "https://api.pinata.cloud";

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

#[derive(Clone)]
pub struct PinataStore {
    http: Client,
    api_url: String,
    jwt: String,
    gateway: String,
}

impl PinataStore {
    pub fn new(api_url: &str, jwt: &str, gateway: &str) -> Result<Self> {
        if jwt.trim().is_empty() {
            return Err(CredentialError::InputValidation("pinata JWT is not configured".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CredentialError::InputValidation(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            jwt: jwt.to_string(),
            gateway: gateway.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<ContentId> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name("credential")
            .mime_str(content_type)
            .map_err(|e| CredentialError::InputValidation(format!("content type {content_type:?}: {e}")))?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/pinning/pinFileToIPFS", self.api_url))
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CredentialError::ContentStore(format!("pinata upload: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::ContentStore(format!(
                "pinata upload failed ({status}): {body}"
            )));
        }
        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::ContentStore(format!("pinata reply: {e}")))?;
        let cid = ContentId::new(pinned.ipfs_hash)
            .map_err(|_| CredentialError::ContentStore("pinata returned no CID".into()))?;
        info!("Pinned {} bytes as {}", size, cid);
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.locator(cid))
            .send()
            .await
            .map_err(|e| CredentialError::ContentStore(format!("gateway fetch {cid}: {e}")))?;
        if !response.status().is_success() {
            return Err(CredentialError::ContentStore(format!(
                "gateway returned {} for {cid}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CredentialError::ContentStore(format!("gateway body {cid}: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn locator(&self, cid: &ContentId) -> String {
        cid.gateway_url(&self.gateway)
    }
}
