// src/blockchain/ledger_client.rs
//! Typed client for the credential contract.
//!
//! Wraps a [`LedgerNode`] and turns the contract's view functions into
//! plain Rust calls. Every method is a live query; nothing is cached here.

use crate::blockchain::intent::{entry_function, EntryFunctionPayload, TransactionIntent};
use crate::blockchain::LedgerNode;
use crate::error::{CredentialError, LedgerRejection, Result};
use crate::models::{Address, LedgerCredential};
use crate::utils::serialization::{
    decode_value, ledger_timestamp, optional_ledger_timestamp, u64_from_string_or_number, value_as_u64,
};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Client bound to one deployed module and one credential store.
#[derive(Clone)]
pub struct LedgerClient {
    node: Arc<dyn LedgerNode>,
    module_address: Address,
    store_address: Address,
}

/// Shape of the `get_credential` view's single return value.
#[derive(Debug, Deserialize)]
struct CredentialView {
    issuer: Address,
    student: Address,
    credential_hash: String,
    metadata_uri: String,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    issued_at: u64,
    revoked: bool,
    #[serde(default, deserialize_with = "optional_ledger_timestamp")]
    revoked_at: Option<DateTime<Utc>>,
}

impl LedgerClient {
    pub fn new(node: Arc<dyn LedgerNode>, module_address: Address, store_address: Address) -> Self {
        Self {
            node,
            module_address,
            store_address,
        }
    }

    pub fn node(&self) -> &Arc<dyn LedgerNode> {
        &self.node
    }

    pub fn module_address(&self) -> Address {
        self.module_address
    }

    pub fn store_address(&self) -> Address {
        self.store_address
    }

    /// Renders an intent against this client's module.
    pub fn payload(&self, intent: &TransactionIntent) -> Result<EntryFunctionPayload> {
        intent.to_payload(&self.module_address)
    }

    async fn call_view(&self, name: &str, arguments: Vec<Value>) -> Result<Vec<Value>> {
        let function = entry_function(&self.module_address, name);
        debug!("view {} {:?}", function, arguments);
        self.node.view(&function, arguments).await
    }

    async fn first_value(&self, name: &str, arguments: Vec<Value>) -> Result<Value> {
        self.call_view(name, arguments)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CredentialError::LedgerUnavailable(format!("view {name} returned no values")))
    }

    /// Store owner, or `None` when the store has not been initialized.
    pub async fn get_owner(&self) -> Result<Option<Address>> {
        match self.first_value("get_owner", vec![json!(self.store_address)]).await {
            Ok(value) => Ok(Some(decode_value(value, "owner address")?)),
            Err(CredentialError::LedgerRejected(LedgerRejection::StoreUninitialized)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn is_issuer_authorized(&self, issuer: &Address) -> Result<bool> {
        let value = self
            .first_value("is_issuer_authorized", vec![json!(issuer), json!(self.store_address)])
            .await?;
        decode_value(value, "authorization flag")
    }

    pub async fn get_authorized_issuers(&self) -> Result<Vec<Address>> {
        let value = self
            .first_value("get_authorized_issuers", vec![json!(self.store_address)])
            .await?;
        decode_value(value, "authorized issuer list")
    }

    pub async fn is_credential_valid(&self, token_id: u64) -> Result<bool> {
        let value = self
            .first_value(
                "is_credential_valid",
                vec![json!(token_id.to_string()), json!(self.store_address)],
            )
            .await?;
        decode_value(value, "validity flag")
    }

    /// Full credential facts, or `None` if the token does not exist.
    pub async fn get_credential(&self, token_id: u64) -> Result<Option<LedgerCredential>> {
        let value = match self
            .first_value("get_credential", vec![json!(token_id.to_string()), json!(self.store_address)])
            .await
        {
            Ok(value) => value,
            Err(CredentialError::LedgerRejected(LedgerRejection::CredentialNotFound)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let view: CredentialView = decode_value(value, "credential")?;
        let issued_at = ledger_timestamp(view.issued_at).ok_or_else(|| {
            CredentialError::LedgerUnavailable(format!("credential {token_id} has an invalid issue time"))
        })?;
        Ok(Some(LedgerCredential {
            token_id,
            issuer: view.issuer,
            student: view.student,
            credential_hash: view.credential_hash,
            metadata_uri: view.metadata_uri,
            issued_at,
            revoked: view.revoked,
            revoked_at: view.revoked_at,
        }))
    }

    pub async fn get_credentials_by_student(&self, student: &Address) -> Result<Vec<u64>> {
        self.token_list("get_credentials_by_student", student).await
    }

    pub async fn get_credentials_by_issuer(&self, issuer: &Address) -> Result<Vec<u64>> {
        self.token_list("get_credentials_by_issuer", issuer).await
    }

    async fn token_list(&self, view: &str, account: &Address) -> Result<Vec<u64>> {
        let value = self.first_value(view, vec![json!(account), json!(self.store_address)]).await?;
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(CredentialError::LedgerUnavailable(format!(
                    "{view} returned {other} instead of a list"
                )))
            }
        };
        items
            .iter()
            .map(|item| {
                value_as_u64(item).ok_or_else(|| {
                    CredentialError::LedgerUnavailable(format!("{view} returned non-integer token id {item}"))
                })
            })
            .collect()
    }

    pub async fn total_credentials(&self) -> Result<u64> {
        let value = self.first_value("total_credentials", vec![json!(self.store_address)]).await?;
        value_as_u64(&value)
            .ok_or_else(|| CredentialError::LedgerUnavailable(format!("total_credentials returned {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Confirmation;
    use async_trait::async_trait;
    use ethers_core::types::H256;
    use std::sync::Mutex;

    /// Node that replays canned view results and records calls.
    struct CannedNode {
        reply: Mutex<Option<Result<Vec<Value>>>>,
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl CannedNode {
        fn new(reply: Result<Vec<Value>>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                calls: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl LedgerNode for CannedNode {
        async fn view(&self, function: &str, arguments: Vec<Value>) -> Result<Vec<Value>> {
            self.calls.lock().unwrap().push((function.to_string(), arguments));
            self.reply.lock().unwrap().take().unwrap_or_else(|| Ok(vec![]))
        }

        async fn submit(&self, _signed: &[u8]) -> Result<H256> {
            unreachable!("views only")
        }

        async fn transaction_status(&self, _tx_hash: H256) -> Result<Confirmation> {
            Ok(Confirmation::Pending)
        }
    }

    fn client(node: Arc<CannedNode>) -> LedgerClient {
        LedgerClient::new(node, Address::parse("0x262e").unwrap(), Address::parse("0x262e").unwrap())
    }

    #[tokio::test]
    async fn test_get_owner_uninitialized_is_none() {
        let node = CannedNode::new(Err(CredentialError::LedgerRejected(LedgerRejection::StoreUninitialized)));
        assert_eq!(client(node).get_owner().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_owner_unreachable_is_error() {
        let node = CannedNode::new(Err(CredentialError::LedgerUnavailable("connection refused".into())));
        assert!(matches!(
            client(node).get_owner().await,
            Err(CredentialError::LedgerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_token_list_decodes_strings() {
        let node = CannedNode::new(Ok(vec![json!(["1", "42", 7])]));
        let tokens = client(node.clone())
            .get_credentials_by_student(&Address::parse("0xB2").unwrap())
            .await
            .unwrap();
        assert_eq!(tokens, vec![1, 42, 7]);
        let calls = node.calls.lock().unwrap();
        assert!(calls[0].0.ends_with("::credential_nft::get_credentials_by_student"));
        assert_eq!(calls[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_get_credential_decodes_view() {
        let node = CannedNode::new(Ok(vec![json!({
            "issuer": "0xA1",
            "student": "0xB2",
            "credential_hash": format!("0x{}", "ab".repeat(32)),
            "metadata_uri": "ipfs://QmMeta",
            "issued_at": "1700000000",
            "revoked": false,
            "revoked_at": "0"
        })]));
        let credential = client(node).get_credential(42).await.unwrap().unwrap();
        assert_eq!(credential.token_id, 42);
        assert_eq!(credential.issuer, Address::parse("0xa1").unwrap());
        assert!(!credential.revoked);
        assert!(credential.revoked_at.is_none());
    }

    #[tokio::test]
    async fn test_get_credential_missing_is_none() {
        let node = CannedNode::new(Err(CredentialError::LedgerRejected(LedgerRejection::CredentialNotFound)));
        assert!(client(node).get_credential(9).await.unwrap().is_none());
    }
}
