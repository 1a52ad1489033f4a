// src/services/transaction.rs
//! Sign, submit, and confirm a single transaction intent.
//!
//! Shared by the issuance, revocation, and admin flows. Submission and
//! confirmation are separate steps so callers can persist the hash in
//! between and never lose track of a transaction whose outcome is unknown.

use crate::blockchain::signer::{sign_with_abort, AbortSignal, SigningAgent};
use crate::blockchain::{Confirmation, LedgerClient, TransactionIntent, TxOutcome};
use crate::error::{CredentialError, LedgerRejection, Result};
use crate::models::Address;
use ethers_core::types::H256;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct TransactionRunner {
    ledger: LedgerClient,
    signer: Arc<dyn SigningAgent>,
    confirmation_timeout: Duration,
}

impl TransactionRunner {
    pub fn new(ledger: LedgerClient, signer: Arc<dyn SigningAgent>, confirmation_timeout: Duration) -> Self {
        Self {
            ledger,
            signer,
            confirmation_timeout,
        }
    }

    /// Hands the intent to the sender's wallet. Returns the submitted hash.
    ///
    /// Abortable until the wallet answers; never retried.
    pub async fn submit(&self, sender: &Address, intent: &TransactionIntent, abort: &AbortSignal) -> Result<H256> {
        let payload = self.ledger.payload(intent)?;
        let tx_hash = sign_with_abort(self.signer.as_ref(), sender, &payload, abort).await?;
        info!("{} submitted by {} as {:#x}", intent.function_name(), sender.short(), tx_hash);
        Ok(tx_hash)
    }

    /// Waits for `tx_hash` to commit.
    ///
    /// - `ConfirmationTimeout` when the outcome is still unknown at the deadline
    /// - `LedgerRejected` when the transaction committed but aborted
    pub async fn confirm(&self, tx_hash: H256) -> Result<TxOutcome> {
        match self
            .ledger
            .node()
            .wait_for_confirmation(tx_hash, self.confirmation_timeout)
            .await?
        {
            Confirmation::Confirmed(outcome) => Ok(outcome),
            Confirmation::Pending => {
                warn!("Transaction {:#x} still pending after {:?}", tx_hash, self.confirmation_timeout);
                Err(CredentialError::ConfirmationTimeout { tx_hash })
            }
            Confirmation::Failed { vm_status } => {
                warn!("Transaction {:#x} aborted: {}", tx_hash, vm_status);
                Err(CredentialError::LedgerRejected(LedgerRejection::from_vm_status(&vm_status)))
            }
        }
    }

    /// `submit` followed by `confirm`.
    pub async fn execute(
        &self,
        sender: &Address,
        intent: &TransactionIntent,
        abort: &AbortSignal,
    ) -> Result<TxOutcome> {
        let tx_hash = self.submit(sender, intent, abort).await?;
        self.confirm(tx_hash).await
    }
}
