// src/app.rs
//! Wiring: turns settings into backends, and backends into services.

use crate::blockchain::rest_node::RestLedgerNode;
use crate::blockchain::sandbox::SandboxLedger;
use crate::blockchain::signer::RemoteSigner;
use crate::blockchain::{LedgerClient, LedgerNode, SigningAgent};
use crate::config::{ContentProvider, IndexBackend, LedgerMode, Settings};
use crate::error::{CredentialError, Result};
use crate::index::{CredentialIndex, InMemoryIndex, PostgrestIndex};
use crate::models::Address;
use crate::services::{
    AdminService, ApiServer, AuthorizationGate, CredentialIssuer, ReconcileTrigger, Reconciler,
    RevocationOrchestrator, TransactionRunner, Verifier,
};
use crate::storage::pinata::DEFAULT_PINATA_API;
use crate::storage::{
    AttemptStore, ContentStore, FileAttemptStore, InMemoryAttemptStore, InMemoryContentStore, IpfsStorage,
    PinataStore, RetryPolicy,
};
use log::info;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_IPFS_API: &str = "http://localhost:5001";

/// External collaborators the services talk to.
#[derive(Clone)]
pub struct Backends {
    pub node: Arc<dyn LedgerNode>,
    pub signer: Arc<dyn SigningAgent>,
    pub content: Arc<dyn ContentStore>,
    pub index: Arc<dyn CredentialIndex>,
    pub attempts: Arc<dyn AttemptStore>,
}

/// Addresses and timing shared by every service.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub module_address: Address,
    pub store_address: Address,
    pub confirmation_timeout: Duration,
    pub content_retry: RetryPolicy,
    pub index_retry: RetryPolicy,
}

impl Tuning {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            module_address: settings.ledger.module_address()?,
            store_address: settings.ledger.store_address()?,
            confirmation_timeout: settings.ledger.confirmation_timeout(),
            content_retry: settings.content.retry,
            index_retry: settings.index.retry,
        })
    }
}

/// Every orchestrator, built over one set of backends.
pub struct Services {
    pub ledger: LedgerClient,
    pub gate: AuthorizationGate,
    pub issuer: CredentialIssuer,
    pub revocation: RevocationOrchestrator,
    pub admin: AdminService,
    pub verifier: Verifier,
    pub reconciler: Arc<Reconciler>,
    pub index: Arc<dyn CredentialIndex>,
}

impl Services {
    /// Builds the services. With a `trigger`, orchestrators request
    /// reconciliation after acting.
    pub fn assemble(backends: &Backends, tuning: &Tuning, trigger: Option<ReconcileTrigger>) -> Self {
        let ledger = LedgerClient::new(backends.node.clone(), tuning.module_address, tuning.store_address);
        let gate = AuthorizationGate::new(ledger.clone());
        let transactions = TransactionRunner::new(ledger.clone(), backends.signer.clone(), tuning.confirmation_timeout);

        let mut issuer = CredentialIssuer::new(
            gate.clone(),
            ledger.clone(),
            transactions.clone(),
            backends.content.clone(),
            backends.index.clone(),
            backends.attempts.clone(),
            tuning.content_retry,
            tuning.index_retry,
        );
        let mut revocation =
            RevocationOrchestrator::new(ledger.clone(), transactions.clone(), backends.index.clone(), tuning.index_retry);
        let mut admin = AdminService::new(
            gate.clone(),
            ledger.clone(),
            transactions,
            backends.index.clone(),
            tuning.index_retry,
        );
        if let Some(trigger) = trigger {
            issuer = issuer.with_reconcile_trigger(trigger.clone());
            revocation = revocation.with_reconcile_trigger(trigger.clone());
            admin = admin.with_reconcile_trigger(trigger);
        }

        Self {
            verifier: Verifier::new(ledger.clone(), backends.content.clone(), backends.index.clone()),
            reconciler: Arc::new(Reconciler::new(ledger.clone(), backends.index.clone(), tuning.index_retry)),
            index: backends.index.clone(),
            ledger,
            gate,
            issuer,
            revocation,
            admin,
        }
    }

    pub fn into_api(self) -> ApiServer {
        ApiServer::new(
            self.issuer,
            self.revocation,
            self.admin,
            self.verifier,
            self.gate,
            self.reconciler,
            self.index,
        )
    }
}

/// Connects the backends named in `settings`.
pub async fn connect_backends(settings: &Settings) -> Result<Backends> {
    let (node, signer): (Arc<dyn LedgerNode>, Arc<dyn SigningAgent>) = match settings.ledger.mode {
        LedgerMode::Sandbox => {
            info!("Using the in-process sandbox ledger");
            let sandbox = Arc::new(SandboxLedger::new(
                settings.ledger.module_address()?,
                settings.ledger.store_address()?,
            ));
            let node: Arc<dyn LedgerNode> = sandbox.clone();
            let signer: Arc<dyn SigningAgent> = sandbox;
            (node, signer)
        }
        LedgerMode::Rest => {
            info!("Using ledger node at {}", settings.ledger.node_url);
            let node: Arc<dyn LedgerNode> =
                Arc::new(RestLedgerNode::new(&settings.ledger.node_url, settings.ledger.poll_interval())?);
            let endpoint = settings
                .signer
                .url
                .as_deref()
                .ok_or_else(|| CredentialError::InputValidation("signer.url is not set".into()))?;
            let signer: Arc<dyn SigningAgent> = Arc::new(RemoteSigner::new(endpoint, node.clone())?);
            (node, signer)
        }
    };

    let gateway = settings.content.gateway.as_str();
    let content: Arc<dyn ContentStore> = match settings.content.provider {
        ContentProvider::Ipfs => Arc::new(IpfsStorage::new(
            settings.content.api_url.as_deref().unwrap_or(DEFAULT_IPFS_API),
            gateway,
        )?),
        ContentProvider::Pinata => Arc::new(PinataStore::new(
            settings.content.api_url.as_deref().unwrap_or(DEFAULT_PINATA_API),
            settings.content.pinata_jwt.as_deref().unwrap_or_default(),
            gateway,
        )?),
        ContentProvider::Memory => Arc::new(InMemoryContentStore::new(gateway)),
    };

    let index: Arc<dyn CredentialIndex> = match settings.index.backend {
        IndexBackend::Postgrest => Arc::new(PostgrestIndex::new(
            settings.index.url.as_deref().unwrap_or_default(),
            settings.index.api_key.as_deref().unwrap_or_default(),
        )?),
        IndexBackend::Memory => Arc::new(InMemoryIndex::new()),
    };

    let attempts: Arc<dyn AttemptStore> = match &settings.attempts.dir {
        Some(dir) => {
            info!("Persisting issuance attempts under {}", dir.display());
            Arc::new(FileAttemptStore::open(dir).await?)
        }
        None => Arc::new(InMemoryAttemptStore::new()),
    };

    Ok(Backends {
        node,
        signer,
        content,
        index,
        attempts,
    })
}
