// src/blockchain/rest_node.rs
//! REST ledger node client.
//!
//! Talks to a fullnode's REST API:
//! - `POST /v1/view` for read-only view functions
//! - `POST /v1/transactions` for wallet-signed transaction bytes
//! - `GET  /v1/transactions/by_hash/{hash}` for confirmation polling
//!
//! HTTP 4xx answers carrying a VM status are contract denials and become
//! [`CredentialError::LedgerRejected`]; transport failures and 5xx answers
//! become [`CredentialError::LedgerUnavailable`].

use crate::blockchain::{Confirmation, LedgerEvent, LedgerNode, TxOutcome};
use crate::error::{CredentialError, LedgerRejection, Result};
use crate::utils::serialization::{ledger_timestamp, value_as_u64};
use async_trait::async_trait;
use ethers_core::types::H256;
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SIGNED_TRANSACTION_CONTENT_TYPE: &str = "application/x.aptos.signed_transaction+bcs";

/// HTTP client for one ledger fullnode.
#[derive(Clone)]
pub struct RestLedgerNode {
    http: Client,
    base_url: String,
    poll_interval: Duration,
}

/// Error body returned by the node on 4xx/5xx.
#[derive(Debug, Default, Deserialize)]
struct NodeError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    vm_error_code: Option<u64>,
}

/// Subset of the transaction JSON needed to decide confirmation.
#[derive(Debug, Deserialize)]
struct TransactionView {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    vm_status: Option<String>,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    events: Vec<LedgerEvent>,
}

impl RestLedgerNode {
    /// # Arguments
    /// * `base_url` - Node root, e.g. `https://fullnode.testnet.aptoslabs.com`
    /// * `poll_interval` - Delay between confirmation polls
    pub fn new(base_url: &str, poll_interval: Duration) -> Result<Self> {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(CredentialError::InputValidation("ledger node URL is empty".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CredentialError::LedgerUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: trimmed.to_string(),
            poll_interval,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    /// Maps a non-success response to the error taxonomy.
    async fn error_from(response: Response) -> CredentialError {
        let status = response.status();
        let body: NodeError = response.json().await.unwrap_or_default();
        if status.is_client_error() {
            let mut detail = body.message.clone();
            if let Some(code) = &body.error_code {
                detail = format!("{detail} ({code})");
            }
            if let Some(vm_code) = body.vm_error_code {
                detail = format!("{detail} [vm {vm_code}]");
            }
            CredentialError::LedgerRejected(LedgerRejection::from_vm_status(&detail))
        } else {
            CredentialError::LedgerUnavailable(format!("node returned {status}: {}", body.message))
        }
    }

    fn transport_error(e: reqwest::Error) -> CredentialError {
        CredentialError::LedgerUnavailable(e.to_string())
    }
}

#[async_trait]
impl LedgerNode for RestLedgerNode {
    async fn view(&self, function: &str, arguments: Vec<Value>) -> Result<Vec<Value>> {
        let body = json!({
            "function": function,
            "type_arguments": [],
            "arguments": arguments,
        });
        let response = self
            .http
            .post(self.url("/view"))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| CredentialError::LedgerUnavailable(format!("malformed view response: {e}")))
    }

    async fn submit(&self, signed_transaction: &[u8]) -> Result<H256> {
        let response = self
            .http
            .post(self.url("/transactions"))
            .header(reqwest::header::CONTENT_TYPE, SIGNED_TRANSACTION_CONTENT_TYPE)
            .body(signed_transaction.to_vec())
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| CredentialError::LedgerUnavailable(format!("malformed submit response: {e}")))?;
        let hash = body.get("hash").cloned().unwrap_or(Value::Null);
        serde_json::from_value(hash)
            .map_err(|e| CredentialError::LedgerUnavailable(format!("submit response has no hash: {e}")))
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<Confirmation> {
        let response = self
            .http
            .get(self.url(&format!("/transactions/by_hash/{:#x}", tx_hash)))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Confirmation::Pending);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let view: TransactionView = response
            .json()
            .await
            .map_err(|e| CredentialError::LedgerUnavailable(format!("malformed transaction: {e}")))?;
        debug!("transaction {:#x} is {}", tx_hash, view.kind);

        if view.kind == "pending_transaction" {
            return Ok(Confirmation::Pending);
        }
        if view.success != Some(true) {
            return Ok(Confirmation::Failed {
                vm_status: view.vm_status.unwrap_or_else(|| "transaction failed".to_string()),
            });
        }
        Ok(Confirmation::Confirmed(TxOutcome {
            tx_hash,
            version: view.version.as_ref().and_then(value_as_u64).unwrap_or_default(),
            timestamp: view.timestamp.as_ref().and_then(value_as_u64).and_then(ledger_timestamp),
            events: view.events,
        }))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
