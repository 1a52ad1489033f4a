// src/services/credential_issuer.rs
//! Credential issuance orchestrator.
//!
//! Drives one issuance attempt through
//! `Drafting → ContentUploaded → TxSubmitted → TxConfirmed → Indexed`,
//! persisting the attempt record after every transition. Rules:
//! - the gate is asked before anything is uploaded or signed
//! - metadata is uploaded only after the artifact upload succeeded
//! - an index record is written only after the ledger confirmed the
//!   transaction, and a failed index write never unwinds it
//! - a submitted transaction whose outcome is unknown is never resubmitted;
//!   resuming re-queries its status instead
//! - when signing fails after the transaction may have been sent, resuming
//!   first looks the credential up on the ledger and adopts it if found

use crate::blockchain::signer::AbortSignal;
use crate::blockchain::{LedgerClient, TransactionIntent};
use crate::error::{CredentialError, DenialReason, Result};
use crate::index::CredentialIndex;
use crate::models::{
    AttemptResult, CallerIdentity, CredentialMetadata, CredentialRecord, IssuanceAttempt, IssuancePhase,
    IssueCredentialRequest,
};
use crate::services::authorization::{Action, AuthorizationGate};
use crate::services::reconciler::{ReconcileScope, ReconcileTrigger};
use crate::services::transaction::TransactionRunner;
use crate::storage::{put_json, AttemptStore, ContentStore, RetryPolicy};
use crate::utils::crypto::credential_commitment;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Step outcome inside the state machine: `Continue` moves on to the next
/// phase, `Stop` ends the run with the attempt as recorded.
enum Step {
    Continue,
    Stop,
}

pub struct CredentialIssuer {
    gate: AuthorizationGate,
    ledger: LedgerClient,
    transactions: TransactionRunner,
    content: Arc<dyn ContentStore>,
    index: Arc<dyn CredentialIndex>,
    attempts: Arc<dyn AttemptStore>,
    content_retry: RetryPolicy,
    index_retry: RetryPolicy,
    reconcile: Option<ReconcileTrigger>,
}

impl CredentialIssuer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: AuthorizationGate,
        ledger: LedgerClient,
        transactions: TransactionRunner,
        content: Arc<dyn ContentStore>,
        index: Arc<dyn CredentialIndex>,
        attempts: Arc<dyn AttemptStore>,
        content_retry: RetryPolicy,
        index_retry: RetryPolicy,
    ) -> Self {
        Self {
            gate,
            ledger,
            transactions,
            content,
            index,
            attempts,
            content_retry,
            index_retry,
            reconcile: None,
        }
    }

    /// Requests on-demand reconciliation when an index write is left behind.
    pub fn with_reconcile_trigger(mut self, trigger: ReconcileTrigger) -> Self {
        self.reconcile = Some(trigger);
        self
    }

    /// Issues a credential on behalf of `caller`.
    ///
    /// Validation and authorization failures return `Err` before any side
    /// effect. Once an attempt exists, the result always comes back as an
    /// [`AttemptResult`] carrying the phase reached and the error, if any.
    pub async fn issue_credential(
        &self,
        request: IssueCredentialRequest,
        caller: &CallerIdentity,
        abort: &AbortSignal,
    ) -> Result<AttemptResult> {
        request.validate()?;
        self.gate.require(Action::IssueCredential, caller).await?;

        let institution_id = request
            .institution_id
            .clone()
            .or_else(|| caller.principal.clone());
        let mut attempt = IssuanceAttempt::new(caller.address, request.student_wallet, institution_id);
        self.attempts.save(&attempt).await?;
        info!(
            "Attempt {} started: {} issuing to {}",
            attempt.attempt_id,
            caller.address.short(),
            request.student_wallet.short()
        );

        self.drive(&mut attempt, Some(&request), abort).await;
        Ok(attempt.result())
    }

    /// Continues a saved attempt from its last recorded phase.
    ///
    /// Only the issuer that started the attempt may resume it. An attempt
    /// still in `Drafting` holds no uploaded content and must be issued
    /// again from the request.
    pub async fn resume_issuance(
        &self,
        attempt_id: Uuid,
        caller: &CallerIdentity,
        abort: &AbortSignal,
    ) -> Result<AttemptResult> {
        let mut attempt = self
            .attempts
            .load(attempt_id)
            .await?
            .ok_or_else(|| CredentialError::InputValidation(format!("unknown attempt {attempt_id}")))?;
        if attempt.issuer != caller.address {
            return Err(CredentialError::AuthorizationDenied(DenialReason::NotIssuer));
        }
        if attempt.is_complete() {
            return Ok(attempt.result());
        }
        match attempt.phase {
            IssuancePhase::Drafting => {
                return Err(CredentialError::InputValidation(format!(
                    "attempt {attempt_id} has no uploaded content; issue the credential again"
                )))
            }
            IssuancePhase::ContentUploaded => {
                if attempt.submission_unknown {
                    if let Err(e) = self.recover_submission(&mut attempt).await {
                        self.fail(&mut attempt, e);
                        self.persist(&attempt).await;
                        return Ok(attempt.result());
                    }
                }
                if attempt.phase == IssuancePhase::ContentUploaded {
                    // About to sign again; authorization may have changed since.
                    self.gate.require(Action::IssueCredential, caller).await?;
                }
            }
            _ => {}
        }
        info!("Resuming attempt {} from {:?}", attempt.attempt_id, attempt.phase);
        self.drive(&mut attempt, None, abort).await;
        Ok(attempt.result())
    }

    pub async fn attempt(&self, attempt_id: Uuid) -> Result<Option<IssuanceAttempt>> {
        self.attempts.load(attempt_id).await
    }

    /// Attempts that have neither been indexed nor failed for good.
    pub async fn list_incomplete(&self) -> Result<Vec<IssuanceAttempt>> {
        self.attempts.list_incomplete().await
    }

    async fn drive(&self, attempt: &mut IssuanceAttempt, request: Option<&IssueCredentialRequest>, abort: &AbortSignal) {
        loop {
            let step = match attempt.phase {
                IssuancePhase::Drafting => match request {
                    Some(request) => self.upload_content(attempt, request).await,
                    None => Step::Stop,
                },
                IssuancePhase::ContentUploaded => self.submit_transaction(attempt, abort).await,
                IssuancePhase::TxSubmitted => self.await_confirmation(attempt).await,
                IssuancePhase::TxConfirmed => self.write_index(attempt).await,
                IssuancePhase::Indexed => Step::Stop,
            };
            self.persist(attempt).await;
            if let Step::Stop = step {
                return;
            }
        }
    }

    /// Drafting → ContentUploaded.
    async fn upload_content(&self, attempt: &mut IssuanceAttempt, request: &IssueCredentialRequest) -> Step {
        let artifact = self
            .content_retry
            .run("artifact upload", || {
                self.content
                    .put(request.artifact.clone(), &request.artifact_content_type)
            })
            .await;
        let artifact_cid = match artifact {
            Ok(cid) => cid,
            Err(e) => return self.fail(attempt, e),
        };
        attempt.artifact_cid = Some(artifact_cid.to_string());

        let metadata = CredentialMetadata::build(request, &self.content.locator(&artifact_cid));
        let uploaded = self
            .content_retry
            .run("metadata upload", || put_json(self.content.as_ref(), &metadata))
            .await;
        let (metadata_cid, metadata_bytes) = match uploaded {
            Ok(uploaded) => uploaded,
            Err(e) => return self.fail(attempt, e),
        };

        attempt.metadata_uri = Some(metadata_cid.uri());
        attempt.credential_hash = Some(credential_commitment(&metadata_bytes));
        attempt.advance(IssuancePhase::ContentUploaded);
        info!(
            "Attempt {}: content uploaded (artifact {}, metadata {})",
            attempt.attempt_id, artifact_cid, metadata_cid
        );
        Step::Continue
    }

    /// ContentUploaded → TxSubmitted.
    async fn submit_transaction(&self, attempt: &mut IssuanceAttempt, abort: &AbortSignal) -> Step {
        let (Some(credential_hash), Some(metadata_uri)) = (attempt.credential_hash.clone(), attempt.metadata_uri.clone())
        else {
            let e = CredentialError::Conflict("attempt lost its uploaded metadata".into());
            attempt.terminal = true;
            return self.fail(attempt, e);
        };
        let intent = match TransactionIntent::issue_credential(
            attempt.student,
            credential_hash,
            metadata_uri,
            self.ledger.store_address(),
        ) {
            Ok(intent) => intent,
            Err(e) => return self.fail(attempt, e),
        };

        match self.transactions.submit(&attempt.issuer, &intent, abort).await {
            Ok(tx_hash) => {
                attempt.tx_hash = Some(tx_hash);
                attempt.advance(IssuancePhase::TxSubmitted);
                info!("Attempt {}: transaction {:#x} submitted", attempt.attempt_id, tx_hash);
                Step::Continue
            }
            Err(e) => {
                attempt.submission_unknown = e.may_have_dispatched();
                if attempt.submission_unknown {
                    warn!(
                        "Attempt {}: transaction may have been sent despite the error; resume will check the ledger",
                        attempt.attempt_id
                    );
                }
                self.fail(attempt, e)
            }
        }
    }

    /// Looks for a credential this attempt may already have issued.
    ///
    /// Matches on issuer, metadata URI, and commitment among the student's
    /// tokens. A match moves the attempt straight to `TxConfirmed`. Without
    /// one the attempt stays in `ContentUploaded` and will be signed again.
    async fn recover_submission(&self, attempt: &mut IssuanceAttempt) -> Result<()> {
        let (Some(credential_hash), Some(metadata_uri)) =
            (attempt.credential_hash.clone(), attempt.metadata_uri.clone())
        else {
            return Ok(());
        };
        for token_id in self.ledger.get_credentials_by_student(&attempt.student).await? {
            let Some(credential) = self.ledger.get_credential(token_id).await? else {
                continue;
            };
            if credential.issuer == attempt.issuer
                && credential.metadata_uri == metadata_uri
                && credential.credential_hash == credential_hash
            {
                info!(
                    "Attempt {}: found token {} already on the ledger, adopting it",
                    attempt.attempt_id, token_id
                );
                attempt.token_id = Some(token_id);
                attempt.issued_at = Some(credential.issued_at);
                attempt.advance(IssuancePhase::TxConfirmed);
                return Ok(());
            }
        }
        info!(
            "Attempt {}: no matching credential on the ledger, signing again",
            attempt.attempt_id
        );
        Ok(())
    }

    /// TxSubmitted → TxConfirmed. Only ever queries status.
    async fn await_confirmation(&self, attempt: &mut IssuanceAttempt) -> Step {
        let Some(tx_hash) = attempt.tx_hash else {
            attempt.terminal = true;
            return self.fail(attempt, CredentialError::Conflict("submitted attempt has no transaction hash".into()));
        };
        let outcome = match self.transactions.confirm(tx_hash).await {
            Ok(outcome) => outcome,
            Err(e @ CredentialError::LedgerRejected(_)) => {
                // Committed and aborted: this attempt can never progress.
                attempt.terminal = true;
                return self.fail(attempt, e);
            }
            Err(e) => return self.fail(attempt, e),
        };
        let Some(token_id) = outcome.issued_token_id() else {
            return self.fail(
                attempt,
                CredentialError::LedgerUnavailable(format!(
                    "transaction {tx_hash:#x} confirmed without a credential issued event"
                )),
            );
        };

        attempt.token_id = Some(token_id);
        attempt.issued_at = Some(outcome.timestamp.unwrap_or_else(Utc::now));
        attempt.advance(IssuancePhase::TxConfirmed);
        info!("Attempt {}: confirmed as token {}", attempt.attempt_id, token_id);
        Step::Continue
    }

    /// TxConfirmed → Indexed. Failure leaves the work to the reconciler.
    async fn write_index(&self, attempt: &mut IssuanceAttempt) -> Step {
        let record = match index_record(attempt) {
            Some(record) => record,
            None => {
                attempt.terminal = true;
                return self.fail(attempt, CredentialError::Conflict("confirmed attempt is missing ledger facts".into()));
            }
        };
        let written = self
            .index_retry
            .run("credential index write", || self.index.upsert_credential(&record))
            .await;
        match written {
            Ok(()) => {
                attempt.advance(IssuancePhase::Indexed);
                info!("Attempt {}: token {} indexed", attempt.attempt_id, record.token_id);
            }
            Err(e) => {
                let e = match e {
                    CredentialError::IndexWriteFailed(_) => e,
                    other => CredentialError::IndexWriteFailed(other.to_string()),
                };
                warn!(
                    "Attempt {}: token {} is on the ledger but not indexed: {}",
                    attempt.attempt_id, record.token_id, e
                );
                attempt.record_error(&e);
                if let Some(trigger) = &self.reconcile {
                    trigger.request(ReconcileScope::Token {
                        token_id: record.token_id,
                    });
                }
            }
        }
        Step::Stop
    }

    fn fail(&self, attempt: &mut IssuanceAttempt, error: CredentialError) -> Step {
        match &error {
            CredentialError::SigningRejected(_) | CredentialError::Aborted => {
                info!("Attempt {} stopped at {:?}: {}", attempt.attempt_id, attempt.phase, error)
            }
            _ => warn!("Attempt {} failed at {:?}: {}", attempt.attempt_id, attempt.phase, error),
        }
        attempt.record_error(&error);
        Step::Stop
    }

    async fn persist(&self, attempt: &IssuanceAttempt) {
        if let Err(e) = self.attempts.save(attempt).await {
            error!("Could not persist attempt {}: {}", attempt.attempt_id, e);
        }
    }
}

fn index_record(attempt: &IssuanceAttempt) -> Option<CredentialRecord> {
    Some(CredentialRecord {
        token_id: attempt.token_id?,
        issuer: attempt.issuer,
        student: attempt.student,
        credential_hash: attempt.credential_hash.clone()?,
        metadata_uri: attempt.metadata_uri.clone()?,
        issued_at: attempt.issued_at.unwrap_or(attempt.updated_at),
        revoked: false,
        revoked_at: None,
        artifact_cid: attempt.artifact_cid.clone(),
        institution_id: attempt.institution_id.clone(),
        issue_tx_hash: attempt.tx_hash,
    })
}
