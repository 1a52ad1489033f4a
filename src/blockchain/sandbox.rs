// src/blockchain/sandbox.rs
//! In-process ledger sandbox.
//!
//! Simulates the `credential_nft` contract and doubles as the signing agent,
//! so the full issuance, revocation, and reconciliation flows can run
//! without a node or a wallet (`ledger.mode = "sandbox"`). Contract rules
//! are enforced at execution time exactly like the deployed module: a
//! denied transaction still gets a hash and commits as failed with a VM
//! abort status.
//!
//! Fault hooks (`reject_next_signatures`, `pause_signing`,
//! `hold_confirmations`, `set_unreachable`) let callers rehearse partial
//! failures.

use crate::blockchain::intent::{EntryFunctionPayload, CREDENTIAL_MODULE};
use crate::blockchain::signer::{SignOutcome, SigningAgent};
use crate::blockchain::{
    Confirmation, LedgerEvent, LedgerNode, TxOutcome, CREDENTIAL_ISSUED_EVENT, CREDENTIAL_REVOKED_EVENT,
};
use crate::error::{CredentialError, LedgerRejection, Result};
use crate::models::{Address, LedgerCredential};
use crate::utils::crypto::derive_hash;
use crate::utils::serialization::value_as_u64;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers_core::types::H256;
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoreState {
    owner: Address,
    authorized: BTreeSet<Address>,
    credentials: BTreeMap<u64, LedgerCredential>,
    next_token_id: u64,
}

#[derive(Debug, Default)]
struct SandboxState {
    stores: HashMap<Address, StoreState>,
    committed: HashMap<H256, Confirmation>,
    held: HashMap<H256, Confirmation>,
    tx_counter: u64,
    submissions: u64,
    pending_rejections: u32,
    signing_paused: bool,
    holding: bool,
    unreachable: bool,
}

/// Contract simulation plus auto-approving wallet.
pub struct SandboxLedger {
    module_address: Address,
    store_address: Address,
    first_token_id: u64,
    state: Mutex<SandboxState>,
}

/// Contract abort raised while executing an entry function.
struct Abort(&'static str);

impl SandboxLedger {
    /// # Arguments
    /// * `module_address` - Address the `credential_nft` module is published under
    /// * `store_address` - Store targeted by `authorize_issuer`
    pub fn new(module_address: Address, store_address: Address) -> Self {
        Self {
            module_address,
            store_address,
            first_token_id: 1,
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Token id minted first by stores initialized afterwards.
    pub fn with_first_token_id(mut self, token_id: u64) -> Self {
        self.first_token_id = token_id;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, SandboxState>> {
        self.state
            .lock()
            .map_err(|e| CredentialError::LedgerUnavailable(format!("sandbox lock poisoned: {e}")))
    }

    /// The wallet declines the next `count` signature requests.
    pub fn reject_next_signatures(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.pending_rejections = count;
        }
    }

    /// While paused, signature requests wait forever (a human who never answers).
    pub fn pause_signing(&self, paused: bool) {
        if let Ok(mut state) = self.lock() {
            state.signing_paused = paused;
        }
    }

    /// While holding, executed transactions report `Pending` until released.
    pub fn hold_confirmations(&self, holding: bool) {
        if let Ok(mut state) = self.lock() {
            state.holding = holding;
        }
    }

    /// Makes every held transaction visible as committed.
    pub fn release_held(&self) {
        if let Ok(mut state) = self.lock() {
            let held: Vec<_> = state.held.drain().collect();
            state.committed.extend(held);
        }
    }

    /// Simulates a node outage for views and status queries.
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut state) = self.lock() {
            state.unreachable = unreachable;
        }
    }

    /// Number of transactions that reached the ledger.
    pub fn submission_count(&self) -> u64 {
        self.lock().map(|s| s.submissions).unwrap_or_default()
    }

    /// Direct read of a credential, bypassing the view layer.
    pub fn credential(&self, token_id: u64) -> Option<LedgerCredential> {
        let state = self.lock().ok()?;
        state.stores.get(&self.store_address)?.credentials.get(&token_id).cloned()
    }

    fn now() -> DateTime<Utc> {
        // The contract clock has whole-second resolution.
        Utc.timestamp_opt(Utc::now().timestamp(), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn event(&self, name: &str, data: Value) -> LedgerEvent {
        LedgerEvent {
            event_type: format!("{}::{}::{}", self.module_address, CREDENTIAL_MODULE, name),
            data,
        }
    }

    /// Executes one entry function against `state`. Returns the emitted events.
    fn execute(
        &self,
        state: &mut SandboxState,
        sender: &Address,
        payload: &EntryFunctionPayload,
        now: DateTime<Utc>,
    ) -> std::result::Result<Vec<LedgerEvent>, Abort> {
        let args = &payload.arguments;
        match payload.function_name() {
            "initialize" => {
                if state.stores.contains_key(sender) {
                    return Err(Abort("E_ALREADY_INITIALIZED(0x80001)"));
                }
                let mut authorized = BTreeSet::new();
                authorized.insert(*sender);
                state.stores.insert(
                    *sender,
                    StoreState {
                        owner: *sender,
                        authorized,
                        credentials: BTreeMap::new(),
                        next_token_id: self.first_token_id,
                    },
                );
                Ok(vec![self.event("StoreInitializedEvent", json!({ "owner": sender }))])
            }
            "authorize_issuer" => {
                let issuer = address_arg(args, 0)?;
                let store = state
                    .stores
                    .get_mut(&self.store_address)
                    .ok_or(Abort("E_STORE_NOT_INITIALIZED(0x60002)"))?;
                if store.owner != *sender {
                    return Err(Abort("E_NOT_OWNER(0x50002)"));
                }
                store.authorized.insert(issuer);
                Ok(vec![self.event("IssuerAuthorizedEvent", json!({ "issuer": issuer }))])
            }
            "issue_credential" => {
                let student = address_arg(args, 0)?;
                let credential_hash = string_arg(args, 1)?;
                let metadata_uri = string_arg(args, 2)?;
                let store_address = address_arg(args, 3)?;
                let store = state
                    .stores
                    .get_mut(&store_address)
                    .ok_or(Abort("E_STORE_NOT_INITIALIZED(0x60002)"))?;
                if !store.authorized.contains(sender) {
                    return Err(Abort("E_NOT_AUTHORIZED(0x50001)"));
                }
                let token_id = store.next_token_id;
                store.next_token_id += 1;
                store.credentials.insert(
                    token_id,
                    LedgerCredential {
                        token_id,
                        issuer: *sender,
                        student,
                        credential_hash,
                        metadata_uri,
                        issued_at: now,
                        revoked: false,
                        revoked_at: None,
                    },
                );
                Ok(vec![self.event(
                    CREDENTIAL_ISSUED_EVENT,
                    json!({ "token_id": token_id.to_string(), "issuer": sender, "student": student }),
                )])
            }
            "revoke_credential" => {
                let token_id = u64_arg(args, 0)?;
                let store_address = address_arg(args, 1)?;
                let store = state
                    .stores
                    .get_mut(&store_address)
                    .ok_or(Abort("E_STORE_NOT_INITIALIZED(0x60002)"))?;
                let credential = store
                    .credentials
                    .get_mut(&token_id)
                    .ok_or(Abort("E_CREDENTIAL_NOT_FOUND(0x60003)"))?;
                if credential.issuer != *sender {
                    return Err(Abort("E_NOT_ISSUER(0x50003)"));
                }
                if credential.revoked {
                    return Err(Abort("E_ALREADY_REVOKED(0x50004)"));
                }
                credential.revoked = true;
                credential.revoked_at = Some(now);
                Ok(vec![self.event(
                    CREDENTIAL_REVOKED_EVENT,
                    json!({ "token_id": token_id.to_string(), "issuer": sender }),
                )])
            }
            _ => Err(Abort("FUNCTION_RESOLUTION_FAILURE")),
        }
    }

    fn run_view(&self, state: &SandboxState, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        let store_index = match name {
            "get_owner" | "get_authorized_issuers" | "total_credentials" => 0,
            _ => 1,
        };
        let store_address = view_address(args, store_index)?;
        let store = state
            .stores
            .get(&store_address)
            .ok_or(CredentialError::LedgerRejected(LedgerRejection::StoreUninitialized))?;

        match name {
            "get_owner" => Ok(vec![json!(store.owner)]),
            "get_authorized_issuers" => Ok(vec![json!(store.authorized.iter().collect::<Vec<_>>())]),
            "total_credentials" => Ok(vec![json!(store.credentials.len().to_string())]),
            "is_issuer_authorized" => {
                let issuer = view_address(args, 0)?;
                Ok(vec![json!(store.authorized.contains(&issuer))])
            }
            "is_credential_valid" => {
                let token_id = view_u64(args, 0)?;
                let valid = store.credentials.get(&token_id).map(|c| !c.revoked).unwrap_or(false);
                Ok(vec![json!(valid)])
            }
            "get_credential" => {
                let token_id = view_u64(args, 0)?;
                let credential = store
                    .credentials
                    .get(&token_id)
                    .ok_or(CredentialError::LedgerRejected(LedgerRejection::CredentialNotFound))?;
                Ok(vec![json!({
                    "issuer": credential.issuer,
                    "student": credential.student,
                    "credential_hash": credential.credential_hash,
                    "metadata_uri": credential.metadata_uri,
                    "issued_at": credential.issued_at.timestamp().to_string(),
                    "revoked": credential.revoked,
                    "revoked_at": credential.revoked_at.map(|t| t.timestamp()).unwrap_or(0).to_string(),
                })])
            }
            "get_credentials_by_student" | "get_credentials_by_issuer" => {
                let account = view_address(args, 0)?;
                let by_student = name == "get_credentials_by_student";
                let tokens: Vec<String> = store
                    .credentials
                    .values()
                    .filter(|c| if by_student { c.student == account } else { c.issuer == account })
                    .map(|c| c.token_id.to_string())
                    .collect();
                Ok(vec![json!(tokens)])
            }
            other => Err(CredentialError::LedgerRejected(LedgerRejection::Other(format!(
                "FUNCTION_RESOLUTION_FAILURE: {other}"
            )))),
        }
    }
}

fn address_arg(args: &[Value], index: usize) -> std::result::Result<Address, Abort> {
    args.get(index)
        .and_then(Value::as_str)
        .and_then(|s| Address::parse(s).ok())
        .ok_or(Abort("INVALID_ARGUMENT"))
}

fn string_arg(args: &[Value], index: usize) -> std::result::Result<String, Abort> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(Abort("INVALID_ARGUMENT"))
}

fn u64_arg(args: &[Value], index: usize) -> std::result::Result<u64, Abort> {
    args.get(index).and_then(value_as_u64).ok_or(Abort("INVALID_ARGUMENT"))
}

fn view_address(args: &[Value], index: usize) -> Result<Address> {
    address_arg(args, index)
        .map_err(|_| CredentialError::LedgerRejected(LedgerRejection::Other("INVALID_ARGUMENT".into())))
}

fn view_u64(args: &[Value], index: usize) -> Result<u64> {
    u64_arg(args, index)
        .map_err(|_| CredentialError::LedgerRejected(LedgerRejection::Other("INVALID_ARGUMENT".into())))
}

#[async_trait]
impl LedgerNode for SandboxLedger {
    async fn view(&self, function: &str, arguments: Vec<Value>) -> Result<Vec<Value>> {
        let state = self.lock()?;
        if state.unreachable {
            return Err(CredentialError::LedgerUnavailable("sandbox node unreachable".into()));
        }
        let prefix = format!("{}::{}::", self.module_address, CREDENTIAL_MODULE);
        let name = function.strip_prefix(&prefix).ok_or_else(|| {
            CredentialError::LedgerRejected(LedgerRejection::Other(format!("LINKER_ERROR: {function}")))
        })?;
        self.run_view(&state, name, &arguments)
    }

    async fn submit(&self, _signed_transaction: &[u8]) -> Result<H256> {
        Err(CredentialError::LedgerRejected(LedgerRejection::Other(
            "sandbox accepts transactions only through its signing agent".into(),
        )))
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<Confirmation> {
        let state = self.lock()?;
        if state.unreachable {
            return Err(CredentialError::LedgerUnavailable("sandbox node unreachable".into()));
        }
        Ok(state.committed.get(&tx_hash).cloned().unwrap_or(Confirmation::Pending))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(5)
    }
}

#[async_trait]
impl SigningAgent for SandboxLedger {
    async fn sign_and_submit(&self, sender: &Address, payload: &EntryFunctionPayload) -> Result<SignOutcome> {
        let paused = {
            let mut state = self.lock()?;
            if state.pending_rejections > 0 {
                state.pending_rejections -= 1;
                return Ok(SignOutcome::Rejected("User rejected the request".into()));
            }
            state.signing_paused
        };
        if paused {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock()?;
        state.tx_counter += 1;
        state.submissions += 1;
        let tx_hash = derive_hash("sandbox-tx", state.tx_counter);
        let now = Self::now();
        let version = state.tx_counter;

        let confirmation = match self.execute(&mut state, sender, payload, now) {
            Ok(events) => {
                info!("sandbox: {} by {} committed as {:#x}", payload.function_name(), sender.short(), tx_hash);
                Confirmation::Confirmed(TxOutcome {
                    tx_hash,
                    version,
                    timestamp: Some(now),
                    events,
                })
            }
            Err(Abort(code)) => {
                debug!("sandbox: {} by {} aborted with {}", payload.function_name(), sender.short(), code);
                Confirmation::Failed {
                    vm_status: format!("Move abort in {}::{}: {}", self.module_address, CREDENTIAL_MODULE, code),
                }
            }
        };
        if state.holding {
            state.held.insert(tx_hash, confirmation);
        } else {
            state.committed.insert(tx_hash, confirmation);
        }
        Ok(SignOutcome::Submitted(tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::intent::TransactionIntent;
    use crate::blockchain::LedgerClient;
    use std::sync::Arc;

    fn admin() -> Address {
        Address::parse("0xAD").unwrap()
    }

    async fn submit(ledger: &SandboxLedger, sender: &Address, intent: TransactionIntent) -> Confirmation {
        let payload = intent.to_payload(&admin()).unwrap();
        let SignOutcome::Submitted(hash) = ledger.sign_and_submit(sender, &payload).await.unwrap() else {
            panic!("sandbox rejected signature");
        };
        ledger.transaction_status(hash).await.unwrap()
    }

    #[tokio::test]
    async fn test_owner_is_authorized_after_initialize() {
        let ledger = Arc::new(SandboxLedger::new(admin(), admin()));
        let client = LedgerClient::new(ledger.clone(), admin(), admin());
        assert_eq!(client.get_owner().await.unwrap(), None);

        let status = submit(&ledger, &admin(), TransactionIntent::InitializeStore).await;
        assert!(matches!(status, Confirmation::Confirmed(_)));
        assert_eq!(client.get_owner().await.unwrap(), Some(admin()));
        assert!(client.is_issuer_authorized(&admin()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthorized_issue_aborts() {
        let ledger = SandboxLedger::new(admin(), admin());
        submit(&ledger, &admin(), TransactionIntent::InitializeStore).await;
        let intent = TransactionIntent::issue_credential(
            Address::parse("0xB2").unwrap(),
            format!("0x{}", "00".repeat(32)),
            "ipfs://QmMeta",
            admin(),
        )
        .unwrap();
        match submit(&ledger, &Address::parse("0xEE").unwrap(), intent).await {
            Confirmation::Failed { vm_status } => {
                assert_eq!(LedgerRejection::from_vm_status(&vm_status), LedgerRejection::NotAuthorized)
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_revoke_aborts() {
        let ledger = SandboxLedger::new(admin(), admin());
        submit(&ledger, &admin(), TransactionIntent::InitializeStore).await;
        let intent = TransactionIntent::issue_credential(
            Address::parse("0xB2").unwrap(),
            format!("0x{}", "00".repeat(32)),
            "ipfs://QmMeta",
            admin(),
        )
        .unwrap();
        let Confirmation::Confirmed(outcome) = submit(&ledger, &admin(), intent).await else {
            panic!("issue failed");
        };
        let token_id = outcome.issued_token_id().unwrap();

        let revoke = TransactionIntent::revoke_credential(token_id, admin()).unwrap();
        assert!(matches!(submit(&ledger, &admin(), revoke.clone()).await, Confirmation::Confirmed(_)));
        match submit(&ledger, &admin(), revoke).await {
            Confirmation::Failed { vm_status } => assert!(vm_status.contains("E_ALREADY_REVOKED")),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_held_transactions_stay_pending() {
        let ledger = SandboxLedger::new(admin(), admin());
        ledger.hold_confirmations(true);
        let payload = TransactionIntent::InitializeStore.to_payload(&admin()).unwrap();
        let SignOutcome::Submitted(hash) = ledger.sign_and_submit(&admin(), &payload).await.unwrap() else {
            panic!("rejected");
        };
        assert_eq!(ledger.transaction_status(hash).await.unwrap(), Confirmation::Pending);
        ledger.release_held();
        assert!(matches!(
            ledger.transaction_status(hash).await.unwrap(),
            Confirmation::Confirmed(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_views_fail() {
        let ledger = Arc::new(SandboxLedger::new(admin(), admin()));
        ledger.set_unreachable(true);
        let client = LedgerClient::new(ledger, admin(), admin());
        assert!(matches!(
            client.get_owner().await,
            Err(CredentialError::LedgerUnavailable(_))
        ));
    }
}
