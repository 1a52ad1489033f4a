// src/services/reconciler.rs
//! Index reconciler.
//!
//! Compares index records against live ledger queries and overwrites
//! divergent index fields. Data only ever flows ledger → index. Repairs:
//! - credentials confirmed on the ledger but missing from the index
//! - stale validity flags on indexed credentials
//! - stale issuer authorization flags
//!
//! Index records the ledger does not know are reported as still divergent
//! and left alone; nothing is ever deleted.

use crate::blockchain::LedgerClient;
use crate::error::{CredentialError, Result};
use crate::index::CredentialIndex;
use crate::models::{Address, CredentialRecord, IssuerRecord, LedgerCredential};
use crate::storage::RetryPolicy;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ReconcileScope {
    Issuer { address: Address },
    Student { address: Address },
    Token { token_id: u64 },
    /// Every issuer known to the ledger or the index.
    AllIssuers,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Records compared against the ledger.
    pub examined: usize,
    /// Index records created from ledger facts.
    pub created: usize,
    /// Index records overwritten from ledger facts.
    pub updated: usize,
    /// Divergences that could not be repaired.
    pub still_divergent: usize,
    pub errors: Vec<String>,
}

impl ReconciliationReport {
    pub fn repaired(&self) -> usize {
        self.created + self.updated
    }

    /// Nothing left to fix and nothing failed.
    pub fn is_converged(&self) -> bool {
        self.still_divergent == 0 && self.errors.is_empty()
    }

    fn merge(&mut self, other: ReconciliationReport) {
        self.examined += other.examined;
        self.created += other.created;
        self.updated += other.updated;
        self.still_divergent += other.still_divergent;
        self.errors.extend(other.errors);
    }

    fn fail(&mut self, what: impl std::fmt::Display, error: &CredentialError) {
        warn!("reconcile: {} failed: {}", what, error);
        self.errors.push(format!("{what}: {error}"));
    }
}

pub struct Reconciler {
    ledger: LedgerClient,
    index: Arc<dyn CredentialIndex>,
    index_retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(ledger: LedgerClient, index: Arc<dyn CredentialIndex>, index_retry: RetryPolicy) -> Self {
        Self {
            ledger,
            index,
            index_retry,
        }
    }

    pub async fn reconcile(&self, scope: &ReconcileScope) -> ReconciliationReport {
        let report = match scope {
            ReconcileScope::Token { token_id } => {
                let mut report = ReconciliationReport::default();
                self.reconcile_token(*token_id, &mut report).await;
                report
            }
            ReconcileScope::Issuer { address } => self.reconcile_issuer(address).await,
            ReconcileScope::Student { address } => self.reconcile_student(address).await,
            ReconcileScope::AllIssuers => self.reconcile_all_issuers().await,
        };
        if report.repaired() > 0 || !report.is_converged() {
            info!(
                "reconcile {:?}: examined {}, created {}, updated {}, still divergent {}, errors {}",
                scope,
                report.examined,
                report.created,
                report.updated,
                report.still_divergent,
                report.errors.len()
            );
        } else {
            debug!("reconcile {:?}: {} records in sync", scope, report.examined);
        }
        report
    }

    async fn reconcile_all_issuers(&self) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        let mut issuers = BTreeSet::new();
        match self.ledger.get_authorized_issuers().await {
            Ok(list) => issuers.extend(list),
            Err(e) => report.fail("ledger issuer list", &e),
        }
        match self.index.list_issuers().await {
            Ok(records) => issuers.extend(records.into_iter().map(|record| record.address)),
            Err(e) => report.fail("index issuer list", &e),
        }
        for issuer in issuers {
            report.merge(self.reconcile_issuer(&issuer).await);
        }
        report
    }

    async fn reconcile_issuer(&self, issuer: &Address) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        self.reconcile_issuer_flag(issuer, &mut report).await;

        let ledger_tokens = match self.ledger.get_credentials_by_issuer(issuer).await {
            Ok(tokens) => tokens,
            Err(e) => {
                report.fail(format_args!("ledger credentials of {}", issuer.short()), &e);
                return report;
            }
        };
        let indexed = match self.index.credentials_by_issuer(issuer).await {
            Ok(records) => records.into_iter().map(|record| record.token_id).collect(),
            Err(e) => {
                report.fail(format_args!("index credentials of {}", issuer.short()), &e);
                Vec::new()
            }
        };
        self.reconcile_tokens(ledger_tokens, indexed, &mut report).await;
        report
    }

    async fn reconcile_student(&self, student: &Address) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        let ledger_tokens = match self.ledger.get_credentials_by_student(student).await {
            Ok(tokens) => tokens,
            Err(e) => {
                report.fail(format_args!("ledger credentials of {}", student.short()), &e);
                return report;
            }
        };
        let indexed = match self.index.credentials_by_student(student).await {
            Ok(records) => records.into_iter().map(|record| record.token_id).collect(),
            Err(e) => {
                report.fail(format_args!("index credentials of {}", student.short()), &e);
                Vec::new()
            }
        };
        self.reconcile_tokens(ledger_tokens, indexed, &mut report).await;
        report
    }

    async fn reconcile_tokens(&self, ledger_tokens: Vec<u64>, indexed: Vec<u64>, report: &mut ReconciliationReport) {
        let tokens: BTreeSet<u64> = ledger_tokens.into_iter().chain(indexed).collect();
        for token_id in tokens {
            self.reconcile_token(token_id, report).await;
        }
    }

    /// Brings the index record of one token in line with the ledger.
    async fn reconcile_token(&self, token_id: u64, report: &mut ReconciliationReport) {
        report.examined += 1;
        let credential = match self.ledger.get_credential(token_id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                match self.index.get_credential(token_id).await {
                    Ok(Some(_)) => {
                        warn!("reconcile: token {} is indexed but unknown to the ledger", token_id);
                        report.still_divergent += 1;
                    }
                    Ok(None) => {}
                    Err(e) => report.fail(format_args!("index token {token_id}"), &e),
                }
                return;
            }
            Err(e) => {
                report.fail(format_args!("ledger token {token_id}"), &e);
                return;
            }
        };

        let existing = match self.index.get_credential(token_id).await {
            Ok(existing) => existing,
            Err(e) => {
                report.fail(format_args!("index token {token_id}"), &e);
                report.still_divergent += 1;
                return;
            }
        };

        match existing {
            None => {
                info!("reconcile: indexing confirmed token {} missing from the index", token_id);
                match self.write(&CredentialRecord::from_ledger(&credential)).await {
                    Ok(()) => report.created += 1,
                    Err(e) => {
                        report.fail(format_args!("index write {token_id}"), &e);
                        report.still_divergent += 1;
                    }
                }
            }
            Some(record) if record.matches_ledger(&credential) => {}
            Some(record) => match self.overwrite(record, &credential).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    report.fail(format_args!("index write {token_id}"), &e);
                    report.still_divergent += 1;
                }
            },
        }
    }

    /// Overwrites a divergent record. Re-reads it first so a concurrent
    /// writer's off-ledger fields survive; ledger facts win either way.
    async fn overwrite(&self, stale: CredentialRecord, credential: &LedgerCredential) -> Result<()> {
        if stale.revoked && !credential.revoked {
            warn!(
                "reconcile: index marks token {} revoked but the ledger reports it valid; ledger wins",
                credential.token_id
            );
        }
        let mut record = match self.index.get_credential(credential.token_id).await? {
            Some(current) if current != stale => {
                debug!("reconcile: token {} changed concurrently, rebasing", credential.token_id);
                current
            }
            _ => stale,
        };
        record.overwrite_from_ledger(credential);
        self.write(&record).await
    }

    async fn reconcile_issuer_flag(&self, issuer: &Address, report: &mut ReconciliationReport) {
        let authorized = match self.ledger.is_issuer_authorized(issuer).await {
            Ok(authorized) => authorized,
            Err(e) => {
                report.fail(format_args!("ledger authorization of {}", issuer.short()), &e);
                return;
            }
        };
        let existing = match self.index.get_issuer(issuer).await {
            Ok(existing) => existing,
            Err(e) => {
                report.fail(format_args!("index issuer {}", issuer.short()), &e);
                return;
            }
        };
        report.examined += 1;

        let (record, created) = match existing {
            Some(record) if record.authorized == authorized => return,
            Some(mut record) => {
                warn!(
                    "reconcile: index says {} authorized={}, ledger says {}",
                    issuer.short(),
                    record.authorized,
                    authorized
                );
                record.authorized = authorized;
                record.updated_at = Utc::now();
                (record, false)
            }
            None if authorized => (IssuerRecord::new(*issuer, true), true),
            None => return,
        };
        let written = self
            .index_retry
            .run("issuer index write", || self.index.upsert_issuer(&record))
            .await;
        match written {
            Ok(()) if created => report.created += 1,
            Ok(()) => report.updated += 1,
            Err(e) => {
                report.fail(format_args!("index issuer write {}", issuer.short()), &e);
                report.still_divergent += 1;
            }
        }
    }

    async fn write(&self, record: &CredentialRecord) -> Result<()> {
        self.index_retry
            .run("credential index write", || self.index.upsert_credential(record))
            .await
    }
}

/// Sender side used by orchestrators to request on-demand runs.
#[derive(Clone)]
pub struct ReconcileTrigger(mpsc::Sender<ReconcileScope>);

impl ReconcileTrigger {
    /// Queues a run. Never blocks; a full queue drops the request since the
    /// scheduled sweep will catch up.
    pub fn request(&self, scope: ReconcileScope) {
        if let Err(e) = self.0.try_send(scope) {
            warn!("reconcile request dropped: {}", e);
        }
    }
}

/// Creates a trigger and the receiver to pass to [`spawn_reconciler`].
pub fn trigger_channel(capacity: usize) -> (ReconcileTrigger, mpsc::Receiver<ReconcileScope>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ReconcileTrigger(tx), rx)
}

/// Runs the reconciler in the background: a full `AllIssuers` sweep every
/// `interval` (if any) plus whatever the trigger requests.
pub fn spawn_reconciler(
    reconciler: Arc<Reconciler>,
    interval: Option<Duration>,
    mut requests: mpsc::Receiver<ReconcileScope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let scheduled = interval.is_some();
        let mut ticker = interval.map(tokio::time::interval);
        let mut requests_open = true;
        loop {
            tokio::select! {
                _ = async {
                    match ticker.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let report = reconciler.reconcile(&ReconcileScope::AllIssuers).await;
                    if !report.errors.is_empty() {
                        error!("scheduled reconciliation finished with {} errors", report.errors.len());
                    }
                }
                scope = requests.recv(), if requests_open => match scope {
                    Some(scope) => {
                        reconciler.reconcile(&scope).await;
                    }
                    None => {
                        requests_open = false;
                        if !scheduled {
                            break;
                        }
                    }
                },
            }
        }
        info!("reconciler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use async_trait::async_trait;
    use ethers_core::types::H256;
    use serde_json::{json, Value};

    use crate::blockchain::{Confirmation, LedgerNode};

    /// Ledger with a fixed set of credentials for issuer 0xA1.
    struct FixedLedger {
        revoked: Vec<u64>,
        tokens: Vec<u64>,
    }

    #[async_trait]
    impl LedgerNode for FixedLedger {
        async fn view(&self, function: &str, arguments: Vec<Value>) -> Result<Vec<Value>> {
            let name = function.rsplit("::").next().unwrap_or_default();
            let tokens: Vec<String> = self.tokens.iter().map(u64::to_string).collect();
            Ok(vec![match name {
                "is_issuer_authorized" => json!(true),
                "get_authorized_issuers" => json!(["0xa1"]),
                "get_credentials_by_issuer" | "get_credentials_by_student" => json!(tokens),
                "get_credential" => {
                    let token: u64 = arguments[0].as_str().unwrap().parse().unwrap();
                    if !self.tokens.contains(&token) {
                        return Err(CredentialError::LedgerRejected(
                            crate::error::LedgerRejection::CredentialNotFound,
                        ));
                    }
                    let revoked = self.revoked.contains(&token);
                    json!({
                        "issuer": "0xa1",
                        "student": "0xb2",
                        "credential_hash": format!("0x{}", "11".repeat(32)),
                        "metadata_uri": format!("ipfs://QmMeta{token}"),
                        "issued_at": "1700000000",
                        "revoked": revoked,
                        "revoked_at": if revoked { "1700000500" } else { "0" },
                    })
                }
                other => panic!("unexpected view {other}"),
            }])
        }

        async fn submit(&self, _signed: &[u8]) -> Result<H256> {
            unreachable!()
        }

        async fn transaction_status(&self, _tx_hash: H256) -> Result<Confirmation> {
            unreachable!()
        }
    }

    fn reconciler(ledger: FixedLedger, index: Arc<InMemoryIndex>) -> Reconciler {
        let admin = Address::parse("0xAD").unwrap();
        let client = LedgerClient::new(Arc::new(ledger), admin, admin);
        Reconciler::new(client, index, RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_creates_missing_and_fixes_stale_flags() {
        let index = Arc::new(InMemoryIndex::new());
        let r = reconciler(
            FixedLedger {
                tokens: vec![1, 2, 3],
                revoked: vec![2],
            },
            index.clone(),
        );
        // Token 2 indexed as valid although the ledger revoked it.
        let stale = r.ledger.get_credential(2).await.unwrap().unwrap();
        let mut record = CredentialRecord::from_ledger(&stale);
        record.revoked = false;
        record.revoked_at = None;
        record.artifact_cid = Some("QmFile".into());
        index.upsert_credential(&record).await.unwrap();

        let issuer = Address::parse("0xA1").unwrap();
        let report = r.reconcile(&ReconcileScope::Issuer { address: issuer }).await;
        assert_eq!(report.created, 3, "two credentials plus the issuer record");
        assert_eq!(report.updated, 1);
        assert!(report.is_converged());

        let fixed = index.get_credential(2).await.unwrap().unwrap();
        assert!(fixed.revoked);
        assert!(fixed.revoked_at.is_some());
        assert_eq!(fixed.artifact_cid.as_deref(), Some("QmFile"));

        let again = r.reconcile(&ReconcileScope::AllIssuers).await;
        assert_eq!(again.repaired(), 0);
        assert!(again.is_converged());
    }

    #[tokio::test]
    async fn test_index_only_record_is_reported_not_deleted() {
        let index = Arc::new(InMemoryIndex::new());
        let r = reconciler(
            FixedLedger {
                tokens: vec![],
                revoked: vec![],
            },
            index.clone(),
        );
        let mut orphan = CredentialRecord::from_ledger(&LedgerCredential {
            token_id: 9,
            issuer: Address::parse("0xA1").unwrap(),
            student: Address::parse("0xB2").unwrap(),
            credential_hash: format!("0x{}", "22".repeat(32)),
            metadata_uri: "ipfs://QmGhost".into(),
            issued_at: Utc::now(),
            revoked: false,
            revoked_at: None,
        });
        orphan.institution_id = Some("inst".into());
        index.upsert_credential(&orphan).await.unwrap();

        let report = r.reconcile(&ReconcileScope::Token { token_id: 9 }).await;
        assert_eq!(report.still_divergent, 1);
        assert_eq!(index.credential_count().await, 1);
    }

    #[tokio::test]
    async fn test_trigger_runs_requested_scope() {
        let index = Arc::new(InMemoryIndex::new());
        let r = Arc::new(reconciler(
            FixedLedger {
                tokens: vec![5],
                revoked: vec![],
            },
            index.clone(),
        ));
        let (trigger, rx) = trigger_channel(4);
        let handle = spawn_reconciler(r, None, rx);
        trigger.request(ReconcileScope::Token { token_id: 5 });
        drop(trigger);
        handle.await.unwrap();
        assert!(index.get_credential(5).await.unwrap().is_some());
    }
}
