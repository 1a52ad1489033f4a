// src/blockchain/signer.rs
//! Signing agent boundary.
//!
//! The wallet's key material never enters this crate. An orchestrator
//! hands an unsigned [`EntryFunctionPayload`] to a [`SigningAgent`] and gets
//! back either a submitted transaction hash or a rejection. Signing may wait
//! on a human indefinitely, so it has no internal deadline; the caller ends
//! it through an [`AbortSignal`].

use crate::blockchain::intent::EntryFunctionPayload;
use crate::blockchain::LedgerNode;
use crate::error::{CredentialError, Result};
use crate::models::Address;
use async_trait::async_trait;
use ethers_core::types::H256;
use ethers_core::utils::hex;
use log::info;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// What the wallet did with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    /// Signed and submitted; the hash identifies the pending transaction.
    Submitted(H256),
    /// The wallet owner declined.
    Rejected(String),
}

#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Asks the wallet of `sender` to sign and submit `payload`.
    async fn sign_and_submit(&self, sender: &Address, payload: &EntryFunctionPayload) -> Result<SignOutcome>;
}

/// Caller side of an abort.
#[derive(Debug)]
pub struct AbortHandle(watch::Sender<bool>);

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.0.send(true);
    }
}

/// Orchestrator side of an abort. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AbortSignal(watch::Receiver<bool>);

/// Creates a connected abort handle and signal.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), AbortSignal(rx))
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_aborted(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the caller aborts. Never resolves if the handle is dropped unused.
    pub async fn aborted(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Runs the signing step, racing it against the caller's abort.
///
/// Maps a wallet rejection to [`CredentialError::SigningRejected`] and an
/// abort to [`CredentialError::Aborted`]. Nothing is retried.
pub async fn sign_with_abort(
    agent: &dyn SigningAgent,
    sender: &Address,
    payload: &EntryFunctionPayload,
    abort: &AbortSignal,
) -> Result<H256> {
    if abort.is_aborted() {
        return Err(CredentialError::Aborted);
    }
    let mut abort = abort.clone();
    tokio::select! {
        biased;
        _ = abort.aborted() => Err(CredentialError::Aborted),
        outcome = agent.sign_and_submit(sender, payload) => match outcome? {
            SignOutcome::Submitted(tx_hash) => Ok(tx_hash),
            SignOutcome::Rejected(reason) => Err(CredentialError::SigningRejected(reason)),
        },
    }
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    sender: &'a Address,
    payload: &'a EntryFunctionPayload,
}

/// Reply of the wallet bridge. Exactly one field is expected.
#[derive(Debug, Default, Deserialize)]
struct SignReply {
    #[serde(default)]
    hash: Option<H256>,
    #[serde(default)]
    signed_transaction: Option<String>,
    #[serde(default)]
    rejected: Option<String>,
}

/// Forwards payloads to a wallet bridge over HTTP.
///
/// The bridge answers with the submitted hash, with hex-encoded signed
/// bytes (which are then submitted through the ledger node), or with a
/// rejection (`409 Conflict` or a `rejected` field).
#[derive(Clone)]
pub struct RemoteSigner {
    http: Client,
    endpoint: String,
    ledger: Arc<dyn LedgerNode>,
}

impl RemoteSigner {
    pub fn new(endpoint: &str, ledger: Arc<dyn LedgerNode>) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(CredentialError::InputValidation("signer endpoint is empty".into()));
        }
        Ok(Self {
            // No request timeout: a human may take as long as they like.
            http: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            ledger,
        })
    }
}

#[async_trait]
impl SigningAgent for RemoteSigner {
    async fn sign_and_submit(&self, sender: &Address, payload: &EntryFunctionPayload) -> Result<SignOutcome> {
        info!("Requesting signature from {} for {}", sender.short(), payload.function_name());
        let response = self
            .http
            .post(format!("{}/sign-and-submit", self.endpoint))
            .json(&SignRequest { sender, payload })
            .send()
            .await
            .map_err(|e| CredentialError::SigningAgent(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let reply: SignReply = response.json().await.unwrap_or_default();
            return Ok(SignOutcome::Rejected(
                reply.rejected.unwrap_or_else(|| "rejected by wallet".to_string()),
            ));
        }
        if !status.is_success() {
            return Err(CredentialError::SigningAgent(format!("bridge returned {status}")));
        }

        let reply: SignReply = response
            .json()
            .await
            .map_err(|e| CredentialError::SigningAgent(format!("malformed bridge reply: {e}")))?;
        if let Some(reason) = reply.rejected {
            return Ok(SignOutcome::Rejected(reason));
        }
        if let Some(hash) = reply.hash {
            return Ok(SignOutcome::Submitted(hash));
        }
        if let Some(signed) = reply.signed_transaction {
            let bytes = hex::decode(signed.trim_start_matches("0x"))
                .map_err(|e| CredentialError::SigningAgent(format!("signed bytes are not hex: {e}")))?;
            let hash = self.ledger.submit(&bytes).await?;
            return Ok(SignOutcome::Submitted(hash));
        }
        Err(CredentialError::SigningAgent("bridge reply carried no outcome".into()))
    }
}
