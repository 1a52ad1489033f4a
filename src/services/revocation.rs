// src/services/revocation.rs
//! Revocation orchestrator.
//!
//! The recorded issuer is looked up on the ledger, or in the index when the
//! ledger cannot be reached. The index answer is only a read-through: the
//! contract re-checks issuer identity when the transaction executes, so it
//! remains the final arbiter.
//!
//! Revocation is monotonic. An already-revoked credential is reported as
//! `AlreadyRevoked` with its original revocation time, whether that is
//! detected up front or from the ledger rejecting a duplicate.

use crate::blockchain::signer::AbortSignal;
use crate::blockchain::{LedgerClient, TransactionIntent};
use crate::error::{CredentialError, DenialReason, LedgerRejection};
use crate::index::CredentialIndex;
use crate::models::{Address, CallerIdentity, CredentialRecord, LedgerCredential, RevokeResult};
use crate::services::authorization::{revocation_decision, Decision};
use crate::services::reconciler::{ReconcileScope, ReconcileTrigger};
use crate::services::transaction::TransactionRunner;
use crate::storage::RetryPolicy;
use chrono::{DateTime, Utc};
use ethers_core::types::H256;
use log::{info, warn};
use std::sync::Arc;

/// What is known about a credential before submitting a revocation.
struct Lookup {
    issuer: Address,
    revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
    /// Present when the facts came from the ledger.
    ledger: Option<LedgerCredential>,
}

pub struct RevocationOrchestrator {
    ledger: LedgerClient,
    transactions: TransactionRunner,
    index: Arc<dyn CredentialIndex>,
    index_retry: RetryPolicy,
    reconcile: Option<ReconcileTrigger>,
}

impl RevocationOrchestrator {
    pub fn new(
        ledger: LedgerClient,
        transactions: TransactionRunner,
        index: Arc<dyn CredentialIndex>,
        index_retry: RetryPolicy,
    ) -> Self {
        Self {
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

    /// Revokes `token_id` on behalf of `caller`.
    pub async fn revoke(&self, token_id: u64, caller: &CallerIdentity, abort: &AbortSignal) -> RevokeResult {
        let lookup = match self.lookup(token_id).await {
            Ok(lookup) => lookup,
            Err(reason) => return RevokeResult::Denied { token_id, reason },
        };

        if let Decision::Denied(reason) = revocation_decision(&lookup.issuer, caller) {
            info!("Revocation of {} by {} denied: {}", token_id, caller.address.short(), reason);
            return RevokeResult::Denied { token_id, reason };
        }

        if lookup.revoked {
            info!("Token {} is already revoked", token_id);
            if let Some(credential) = &lookup.ledger {
                self.sync_index(credential).await;
            }
            return RevokeResult::AlreadyRevoked {
                token_id,
                revoked_at: lookup.revoked_at,
            };
        }

        let intent = match TransactionIntent::revoke_credential(token_id, self.ledger.store_address()) {
            Ok(intent) => intent,
            Err(e) => return failed(token_id, None, &e),
        };
        let tx_hash = match self.transactions.submit(&caller.address, &intent, abort).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return failed(token_id, None, &e),
        };

        match self.transactions.confirm(tx_hash).await {
            Ok(outcome) => {
                let credential = self.confirmed_credential(token_id, &lookup, outcome.timestamp).await;
                let revoked_at = credential.revoked_at.unwrap_or_else(Utc::now);
                info!("Token {} revoked in {:#x}", token_id, tx_hash);
                let index_synced = self.sync_index(&credential).await;
                self.request_reconcile(token_id);
                RevokeResult::Revoked {
                    token_id,
                    tx_hash,
                    revoked_at,
                    index_synced,
                }
            }
            Err(CredentialError::LedgerRejected(LedgerRejection::AlreadyRevoked)) => {
                // Lost a race with another revocation; same end state.
                let revoked_at = match self.ledger.get_credential(token_id).await {
                    Ok(Some(credential)) => {
                        self.sync_index(&credential).await;
                        credential.revoked_at
                    }
                    _ => None,
                };
                RevokeResult::AlreadyRevoked { token_id, revoked_at }
            }
            Err(CredentialError::LedgerRejected(rejection)) => match denial_for(&rejection) {
                Some(reason) => RevokeResult::Denied { token_id, reason },
                None => failed(token_id, Some(tx_hash), &CredentialError::LedgerRejected(rejection)),
            },
            Err(e) => failed(token_id, Some(tx_hash), &e),
        }
    }

    async fn lookup(&self, token_id: u64) -> std::result::Result<Lookup, DenialReason> {
        match self.ledger.get_credential(token_id).await {
            Ok(Some(credential)) => Ok(Lookup {
                issuer: credential.issuer,
                revoked: credential.revoked,
                revoked_at: credential.revoked_at,
                ledger: Some(credential),
            }),
            Ok(None) => Err(DenialReason::CredentialNotFound),
            Err(CredentialError::LedgerRejected(LedgerRejection::StoreUninitialized)) => {
                Err(DenialReason::StoreUninitialized)
            }
            Err(e) => {
                warn!("Ledger lookup of token {} failed, reading the index: {}", token_id, e);
                match self.index.get_credential(token_id).await {
                    Ok(Some(record)) => Ok(Lookup {
                        issuer: record.issuer,
                        revoked: record.revoked,
                        revoked_at: record.revoked_at,
                        ledger: None,
                    }),
                    _ => Err(DenialReason::StoreUninitialized),
                }
            }
        }
    }

    /// Ledger facts after a confirmed revocation, falling back to what was
    /// known before plus the transaction time.
    async fn confirmed_credential(
        &self,
        token_id: u64,
        lookup: &Lookup,
        committed_at: Option<DateTime<Utc>>,
    ) -> LedgerCredential {
        match self.ledger.get_credential(token_id).await {
            Ok(Some(credential)) if credential.revoked => return credential,
            Ok(_) => warn!("Ledger does not yet report token {} as revoked", token_id),
            Err(e) => warn!("Could not re-read token {} after revocation: {}", token_id, e),
        }
        let revoked_at = Some(committed_at.unwrap_or_else(Utc::now));
        match &lookup.ledger {
            Some(credential) => LedgerCredential {
                revoked: true,
                revoked_at,
                ..credential.clone()
            },
            None => {
                // Only the index knew the credential.
                match self.index.get_credential(token_id).await {
                    Ok(Some(record)) => LedgerCredential {
                        token_id,
                        issuer: record.issuer,
                        student: record.student,
                        credential_hash: record.credential_hash,
                        metadata_uri: record.metadata_uri,
                        issued_at: record.issued_at,
                        revoked: true,
                        revoked_at: record.revoked_at.or(revoked_at),
                    },
                    _ => LedgerCredential {
                        token_id,
                        issuer: lookup.issuer,
                        student: Address::default(),
                        credential_hash: String::new(),
                        metadata_uri: String::new(),
                        issued_at: Utc::now(),
                        revoked: true,
                        revoked_at,
                    },
                }
            }
        }
    }

    /// Flips the index record to match `credential`. Returns whether the
    /// index now agrees. Failures are left for the reconciler.
    async fn sync_index(&self, credential: &LedgerCredential) -> bool {
        let existing = match self.index.get_credential(credential.token_id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Index read for token {} failed: {}", credential.token_id, e);
                return false;
            }
        };
        let record = match existing {
            Some(record) if record.matches_ledger(credential) => return true,
            Some(mut record) => {
                record.overwrite_from_ledger(credential);
                record
            }
            None if credential.student.is_zero() => return false,
            None => CredentialRecord::from_ledger(credential),
        };
        let written = self
            .index_retry
            .run("revocation index write", || self.index.upsert_credential(&record))
            .await;
        match written {
            Ok(()) => true,
            Err(e) => {
                warn!("Token {} revoked on the ledger but index not updated: {}", credential.token_id, e);
                false
            }
        }
    }

    fn request_reconcile(&self, token_id: u64) {
        if let Some(trigger) = &self.reconcile {
            trigger.request(ReconcileScope::Token { token_id });
        }
    }
}

fn denial_for(rejection: &LedgerRejection) -> Option<DenialReason> {
    match rejection {
        LedgerRejection::NotIssuer | LedgerRejection::NotOwner => Some(DenialReason::NotIssuer),
        LedgerRejection::NotAuthorized => Some(DenialReason::NotAuthorized),
        LedgerRejection::CredentialNotFound => Some(DenialReason::CredentialNotFound),
        LedgerRejection::StoreUninitialized => Some(DenialReason::StoreUninitialized),
        _ => None,
    }
}

fn failed(token_id: u64, tx_hash: Option<H256>, error: &CredentialError) -> RevokeResult {
    warn!("Revocation of token {} failed: {}", token_id, error);
    RevokeResult::Failed {
        token_id,
        tx_hash,
        error: error.detail(),
    }
}
