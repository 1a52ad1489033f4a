// tests/common/mod.rs
//! Full orchestration stack over the sandbox ledger and in-memory stores.

#![allow(dead_code)]

use credential_ledger::app::{Backends, Services, Tuning};
use credential_ledger::blockchain::sandbox::SandboxLedger;
use credential_ledger::blockchain::signer::AbortSignal;
use credential_ledger::blockchain::{LedgerNode, SigningAgent};
use credential_ledger::index::InMemoryIndex;
use credential_ledger::models::{Address, AttemptResult, CallerIdentity, IssueCredentialRequest, Subject};
use credential_ledger::services::ReconcileTrigger;
use credential_ledger::storage::{InMemoryAttemptStore, InMemoryContentStore, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

pub fn module() -> Address {
    Address::parse("0xC0DE").unwrap()
}

/// Store owner; the store lives at this account.
pub fn owner() -> Address {
    Address::parse("0xA11CE").unwrap()
}

pub fn issuer() -> Address {
    Address::parse("0xA1").unwrap()
}

pub fn student() -> Address {
    Address::parse("0xB2").unwrap()
}

pub fn stranger() -> Address {
    Address::parse("0xEE").unwrap()
}

pub fn caller(address: Address) -> CallerIdentity {
    CallerIdentity::new(address)
}

pub fn never() -> AbortSignal {
    AbortSignal::never()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    }
}

pub fn request(student: Address) -> IssueCredentialRequest {
    IssueCredentialRequest {
        student_name: "Ada Lovelace".into(),
        student_wallet: student,
        student_email: None,
        credential_type: "Degree Certificate".into(),
        degree: "BSc Mathematics".into(),
        major: Some("Analysis".into()),
        gpa: Some("3.9".into()),
        issue_date: "2024-06-01".into(),
        subjects: vec![Subject {
            id: "MA101".into(),
            name: "Calculus".into(),
            marks: "92".into(),
            max_marks: "100".into(),
            grade: Some("A".into()),
        }],
        institution_id: Some("inst-1".into()),
        institution_name: "Analytical Engine University".into(),
        artifact: format!("%PDF-1.4 certificate for {student}").into_bytes(),
        artifact_content_type: "application/pdf".into(),
    }
}

pub struct Harness {
    pub sandbox: Arc<SandboxLedger>,
    pub content: Arc<InMemoryContentStore>,
    pub index: Arc<InMemoryIndex>,
    pub attempts: Arc<InMemoryAttemptStore>,
    pub services: Services,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(SandboxLedger::new(module(), owner()), None)
    }

    pub fn build(sandbox: SandboxLedger, trigger: Option<ReconcileTrigger>) -> Self {
        let sandbox = Arc::new(sandbox);
        Self::build_with_signer(sandbox.clone(), sandbox, trigger)
    }

    /// Sandbox ledger behind a different wallet.
    pub fn build_with_signer(
        sandbox: Arc<SandboxLedger>,
        signer: Arc<dyn SigningAgent>,
        trigger: Option<ReconcileTrigger>,
    ) -> Self {
        Self::build_from(sandbox.clone(), sandbox, signer, trigger)
    }

    /// Sandbox ledger read through a different node.
    pub fn build_with_node(sandbox: Arc<SandboxLedger>, node: Arc<dyn LedgerNode>) -> Self {
        Self::build_from(sandbox.clone(), node, sandbox, None)
    }

    fn build_from(
        sandbox: Arc<SandboxLedger>,
        node: Arc<dyn LedgerNode>,
        signer: Arc<dyn SigningAgent>,
        trigger: Option<ReconcileTrigger>,
    ) -> Self {
        let content = Arc::new(InMemoryContentStore::default());
        let index = Arc::new(InMemoryIndex::new());
        let attempts = Arc::new(InMemoryAttemptStore::new());
        let backends = Backends {
            node,
            signer,
            content: content.clone(),
            index: index.clone(),
            attempts: attempts.clone(),
        };
        let tuning = Tuning {
            module_address: module(),
            store_address: owner(),
            confirmation_timeout: Duration::from_millis(100),
            content_retry: fast_retry(),
            index_retry: fast_retry(),
        };
        let services = Services::assemble(&backends, &tuning, trigger);
        Self {
            sandbox,
            content,
            index,
            attempts,
            services,
        }
    }

    /// Store initialized by the owner.
    pub async fn initialized(self) -> Self {
        self.services
            .admin
            .initialize_store(&caller(owner()), &never())
            .await
            .unwrap();
        self
    }

    /// Store initialized and `issuer()` authorized.
    pub async fn with_issuer(self) -> Self {
        let harness = self.initialized().await;
        harness
            .services
            .admin
            .authorize_issuer(&caller(owner()), issuer(), Some("inst-1".into()), &never())
            .await
            .unwrap();
        harness
    }

    pub async fn issue_to(&self, student: Address) -> AttemptResult {
        self.services
            .issuer
            .issue_credential(request(student), &caller(issuer()), &never())
            .await
            .unwrap()
    }
}
