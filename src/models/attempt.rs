// src/models/attempt.rs
//! Issuance attempts (the persisted saga record) and caller-facing results.

use crate::error::{CredentialError, DenialReason, ErrorDetail};
use crate::models::address::Address;
use chrono::{DateTime, Utc};
use ethers_core::types::H256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase reached by an issuance attempt. Ordered: each phase implies all earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuancePhase {
    Drafting,
    ContentUploaded,
    TxSubmitted,
    TxConfirmed,
    Indexed,
}

/// Persisted state of one issuance attempt.
///
/// Saved after every phase transition so a restarted process resumes from
/// the last confirmed phase instead of re-driving side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuanceAttempt {
    pub attempt_id: Uuid,
    pub issuer: Address,
    pub student: Address,
    #[serde(default)]
    pub institution_id: Option<String>,
    pub phase: IssuancePhase,

    #[serde(default)]
    pub artifact_cid: Option<String>,
    #[serde(default)]
    pub metadata_uri: Option<String>,
    #[serde(default)]
    pub credential_hash: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<H256>,
    #[serde(default)]
    pub token_id: Option<u64>,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,

    /// Last failure, cleared on the next successful transition.
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    /// Set when the attempt can never progress (the ledger rejected the
    /// submitted transaction).
    #[serde(default)]
    pub terminal: bool,
    /// Set when signing failed in a way that may still have put the
    /// transaction on the ledger. Resuming looks for the credential before
    /// anything is signed again.
    #[serde(default)]
    pub submission_unknown: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssuanceAttempt {
    pub fn new(issuer: Address, student: Address, institution_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            attempt_id: Uuid::new_v4(),
            issuer,
            student,
            institution_id,
            phase: IssuancePhase::Drafting,
            artifact_cid: None,
            metadata_uri: None,
            credential_hash: None,
            tx_hash: None,
            token_id: None,
            issued_at: None,
            error: None,
            terminal: false,
            submission_unknown: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, phase: IssuancePhase) {
        self.phase = phase;
        self.error = None;
        self.submission_unknown = false;
        self.updated_at = Utc::now();
    }

    pub fn record_error(&mut self, error: &CredentialError) {
        self.error = Some(error.detail());
        self.updated_at = Utc::now();
    }

    /// Finished successfully or can never progress.
    pub fn is_complete(&self) -> bool {
        self.phase == IssuancePhase::Indexed || self.terminal
    }

    pub fn result(&self) -> AttemptResult {
        AttemptResult {
            attempt_id: self.attempt_id,
            phase: self.phase,
            token_id: self.token_id,
            tx_hash: self.tx_hash,
            metadata_uri: self.metadata_uri.clone(),
            error: self.error.clone(),
        }
    }
}

/// What `issue_credential` hands back: phase reached plus whatever
/// identifiers exist at that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt_id: Uuid,
    pub phase: IssuancePhase,
    pub token_id: Option<u64>,
    pub tx_hash: Option<H256>,
    pub metadata_uri: Option<String>,
    pub error: Option<ErrorDetail>,
}

impl AttemptResult {
    pub fn is_indexed(&self) -> bool {
        self.phase == IssuancePhase::Indexed && self.error.is_none()
    }
}

/// Outcome of a revocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevokeResult {
    Revoked {
        token_id: u64,
        tx_hash: H256,
        revoked_at: DateTime<Utc>,
        /// False when the index write failed; the reconciler will catch up.
        index_synced: bool,
    },
    AlreadyRevoked {
        token_id: u64,
        revoked_at: Option<DateTime<Utc>>,
    },
    Denied {
        token_id: u64,
        reason: DenialReason,
    },
    Failed {
        token_id: u64,
        #[serde(default)]
        tx_hash: Option<H256>,
        error: ErrorDetail,
    },
}
