// src/blockchain/mod.rs
//! Ledger access: transaction intents, the node transport, the signing
//! agent boundary, and the typed contract client.

pub mod intent;
pub mod ledger_client;
pub mod rest_node;
pub mod sandbox;
pub mod signer;

use crate::error::Result;
use crate::utils::serialization::value_as_u64;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers_core::types::H256;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub use intent::{EntryFunctionPayload, TransactionIntent};
pub use ledger_client::LedgerClient;
pub use signer::{SignOutcome, SigningAgent};

/// Event emitted by the contract when a credential is minted.
pub const CREDENTIAL_ISSUED_EVENT: &str = "CredentialIssuedEvent";
/// Event emitted by the contract when a credential is revoked.
pub const CREDENTIAL_REVOKED_EVENT: &str = "CredentialRevokedEvent";

/// An event attached to a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

/// A committed, successful transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub tx_hash: H256,
    pub version: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub events: Vec<LedgerEvent>,
}

impl TxOutcome {
    /// First event whose type path ends in `::name`.
    pub fn find_event(&self, name: &str) -> Option<&LedgerEvent> {
        let suffix = format!("::{name}");
        self.events
            .iter()
            .find(|event| event.event_type.ends_with(&suffix) || event.event_type == name)
    }

    /// Token id assigned by an issuance transaction.
    pub fn issued_token_id(&self) -> Option<u64> {
        self.find_event(CREDENTIAL_ISSUED_EVENT)
            .and_then(|event| event.data.get("token_id"))
            .and_then(value_as_u64)
    }
}

/// Status of a submitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Confirmed(TxOutcome),
    /// Not yet committed, or not yet visible to the node.
    Pending,
    /// Committed but aborted by the contract.
    Failed { vm_status: String },
}

/// Remote ledger node.
///
/// Stateless request/response. Implementations must be cheap to share
/// across concurrent attempts.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    /// Calls a read-only view function and returns its return values.
    async fn view(&self, function: &str, arguments: Vec<Value>) -> Result<Vec<Value>>;

    /// Submits a transaction already signed by the wallet.
    async fn submit(&self, signed_transaction: &[u8]) -> Result<H256>;

    /// One-shot status lookup.
    async fn transaction_status(&self, tx_hash: H256) -> Result<Confirmation>;

    /// Delay between status polls while waiting for confirmation.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    /// Polls until the transaction commits or `timeout` elapses.
    ///
    /// Returns `Ok(Confirmation::Pending)` on timeout: the outcome is
    /// unknown, not failed.
    async fn wait_for_confirmation(&self, tx_hash: H256, timeout: Duration) -> Result<Confirmation> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.transaction_status(tx_hash).await {
                Ok(Confirmation::Pending) => {}
                Ok(done) => return Ok(done),
                Err(e) if e.is_retryable() => {
                    warn!("Status poll for {:#x} failed, will retry: {}", tx_hash, e);
                }
                Err(e) => return Err(e),
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Confirmation::Pending);
            }
            tokio::time::sleep(self.poll_interval().min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issued_token_id_from_event() {
        let outcome = TxOutcome {
            tx_hash: H256::repeat_byte(1),
            version: 10,
            timestamp: None,
            events: vec![
                LedgerEvent {
                    event_type: "0x1::coin::WithdrawEvent".into(),
                    data: json!({ "amount": "100" }),
                },
                LedgerEvent {
                    event_type: "0x262e::credential_nft::CredentialIssuedEvent".into(),
                    data: json!({ "token_id": "42", "issuer": "0xa1" }),
                },
            ],
        };
        assert_eq!(outcome.issued_token_id(), Some(42));
        assert!(outcome.find_event(CREDENTIAL_REVOKED_EVENT).is_none());
    }
}
