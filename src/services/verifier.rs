// src/services/verifier.rs
//! Credential verification against the ledger.
//!
//! Validity comes from the ledger alone. The metadata document and the
//! index record are fetched as supporting evidence; a failure to read
//! either is reported, never turned into a validity verdict.

use crate::blockchain::LedgerClient;
use crate::error::Result;
use crate::index::CredentialIndex;
use crate::models::{CredentialMetadata, LedgerCredential};
use crate::storage::{parse_json, ContentId, ContentStore};
use crate::utils::crypto::credential_commitment;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub token_id: u64,
    /// Exists on the ledger and is not revoked.
    pub valid: bool,
    pub credential: Option<LedgerCredential>,
    /// Whether the issuer is still authorized. Does not affect `valid`.
    pub issuer_authorized: Option<bool>,
    pub metadata: Option<CredentialMetadata>,
    /// Whether the stored metadata bytes hash to the ledger commitment.
    pub commitment_matches: Option<bool>,
    pub metadata_error: Option<String>,
    /// Whether the index record agrees with the ledger.
    pub index_consistent: Option<bool>,
}

/// Credential verifier backed by live ledger queries.
pub struct Verifier {
    ledger: LedgerClient,
    content: Arc<dyn ContentStore>,
    index: Arc<dyn CredentialIndex>,
}

impl Verifier {
    pub fn new(ledger: LedgerClient, content: Arc<dyn ContentStore>, index: Arc<dyn CredentialIndex>) -> Self {
        Self { ledger, content, index }
    }

    /// Verifies a credential by token id.
    ///
    /// # Errors
    /// Only when the ledger itself cannot be queried.
    pub async fn verify(&self, token_id: u64) -> Result<VerificationReport> {
        let Some(credential) = self.ledger.get_credential(token_id).await? else {
            debug!("verify: token {} does not exist", token_id);
            return Ok(VerificationReport {
                token_id,
                valid: false,
                credential: None,
                issuer_authorized: None,
                metadata: None,
                commitment_matches: None,
                metadata_error: None,
                index_consistent: None,
            });
        };

        let valid = self.ledger.is_credential_valid(token_id).await?;
        let issuer_authorized = match self.ledger.is_issuer_authorized(&credential.issuer).await {
            Ok(authorized) => Some(authorized),
            Err(e) => {
                warn!("verify: issuer status of {} unavailable: {}", credential.issuer.short(), e);
                None
            }
        };

        let (metadata, commitment_matches, metadata_error) = match self.fetch_metadata(&credential).await {
            Ok((metadata, matches)) => (Some(metadata), Some(matches), None),
            Err(e) => (None, None, Some(e.to_string())),
        };

        let index_consistent = match self.index.get_credential(token_id).await {
            Ok(Some(record)) => Some(record.matches_ledger(&credential)),
            Ok(None) => Some(false),
            Err(e) => {
                warn!("verify: index read for token {} failed: {}", token_id, e);
                None
            }
        };

        Ok(VerificationReport {
            token_id,
            valid,
            credential: Some(credential),
            issuer_authorized,
            metadata,
            commitment_matches,
            metadata_error,
            index_consistent,
        })
    }

    async fn fetch_metadata(&self, credential: &LedgerCredential) -> Result<(CredentialMetadata, bool)> {
        let cid = ContentId::from_uri(&credential.metadata_uri)?;
        let bytes = self.content.get(&cid).await?;
        let matches = credential_commitment(&bytes) == credential.credential_hash.to_ascii_lowercase();
        let metadata = parse_json(&cid, &bytes)?;
        Ok((metadata, matches))
    }
}
