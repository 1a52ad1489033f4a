// src/services/admin.rs
//! Store administration: initializing the credential store and
//! authorizing issuers.

use crate::blockchain::signer::AbortSignal;
use crate::blockchain::{LedgerClient, TransactionIntent};
use crate::error::{CredentialError, DenialReason, Result};
use crate::index::CredentialIndex;
use crate::models::{Address, CallerIdentity, IssuerRecord};
use crate::services::authorization::{Action, AuthorizationGate};
use crate::services::reconciler::{ReconcileScope, ReconcileTrigger};
use crate::services::transaction::TransactionRunner;
use crate::storage::RetryPolicy;
use ethers_core::types::H256;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a confirmed issuer authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerAuthorization {
    pub record: IssuerRecord,
    /// False when the index write failed; the reconciler will catch up.
    pub index_synced: bool,
}

pub struct AdminService {
    gate: AuthorizationGate,
    ledger: LedgerClient,
    transactions: TransactionRunner,
    index: Arc<dyn CredentialIndex>,
    index_retry: RetryPolicy,
    reconcile: Option<ReconcileTrigger>,
}

impl AdminService {
    pub fn new(
        gate: AuthorizationGate,
        ledger: LedgerClient,
        transactions: TransactionRunner,
        index: Arc<dyn CredentialIndex>,
        index_retry: RetryPolicy,
    ) -> Self {
        Self {
            gate,
            ledger,
            transactions,
            index,
            index_retry,
            reconcile: None,
        }
    }

    pub fn with_reconcile_trigger(mut self, trigger: ReconcileTrigger) -> Self {
        self.reconcile = Some(trigger);
        self
    }

    /// Creates the credential store under the caller's account.
    ///
    /// The store lives at the owner's address, so only the account
    /// configured as the store address can initialize it. Refuses with
    /// `Conflict` when the ledger already reports an owner.
    pub async fn initialize_store(&self, caller: &CallerIdentity, abort: &AbortSignal) -> Result<H256> {
        if caller.address != self.ledger.store_address() {
            return Err(CredentialError::AuthorizationDenied(DenialReason::NotOwner));
        }
        if let Some(owner) = self.ledger.get_owner().await? {
            return Err(CredentialError::Conflict(format!(
                "store already initialized, owned by {owner}"
            )));
        }

        let outcome = self
            .transactions
            .execute(&caller.address, &TransactionIntent::InitializeStore, abort)
            .await?;
        info!("Credential store initialized by {} in {:#x}", caller.address.short(), outcome.tx_hash);

        let mut owner = IssuerRecord::new(caller.address, true);
        owner.institution_id = caller.principal.clone();
        owner.authorization_tx_hash = Some(outcome.tx_hash);
        self.write_issuer(&owner).await;
        Ok(outcome.tx_hash)
    }

    /// Owner grants `issuer` the right to issue credentials.
    pub async fn authorize_issuer(
        &self,
        caller: &CallerIdentity,
        issuer: Address,
        institution_id: Option<String>,
        abort: &AbortSignal,
    ) -> Result<IssuerAuthorization> {
        let intent = TransactionIntent::authorize_issuer(issuer)?;
        self.gate.require(Action::AuthorizeIssuer, caller).await?;

        let outcome = self.transactions.execute(&caller.address, &intent, abort).await?;
        info!("Issuer {} authorized in {:#x}", issuer.short(), outcome.tx_hash);

        let existing = self
            .index_retry
            .run("issuer index read", || self.index.get_issuer(&issuer))
            .await;
        let (mut record, readable) = match existing {
            Ok(Some(existing)) => (existing, true),
            Ok(None) => (IssuerRecord::new(issuer, true), true),
            Err(e) => {
                // Writing blind would drop the stored institution; leave it to the reconciler.
                warn!("Issuer {} authorized but its index record could not be read: {}", issuer.short(), e);
                (IssuerRecord::new(issuer, true), false)
            }
        };
        record.authorized = true;
        record.updated_at = chrono::Utc::now();
        record.authorization_tx_hash = Some(outcome.tx_hash);
        if institution_id.is_some() {
            record.institution_id = institution_id;
        }
        let index_synced = readable && self.write_issuer(&record).await;

        if let Some(trigger) = &self.reconcile {
            trigger.request(ReconcileScope::Issuer { address: issuer });
        }
        Ok(IssuerAuthorization { record, index_synced })
    }

    async fn write_issuer(&self, record: &IssuerRecord) -> bool {
        let written = self
            .index_retry
            .run("issuer index write", || self.index.upsert_issuer(record))
            .await;
        if let Err(e) = written {
            warn!("Issuer {} not written to the index: {}", record.address.short(), e);
            return false;
        }
        true
    }
}
