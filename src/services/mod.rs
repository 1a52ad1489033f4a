// src/services/mod.rs
//! Orchestration layer: the authorization gate, issuance and revocation
//! orchestrators, administration, verification, reconciliation, and the
//! HTTP surface over them.

pub mod admin;
pub mod api_server;
pub mod authorization;
pub mod credential_issuer;
pub mod reconciler;
pub mod revocation;
pub mod transaction;
pub mod verifier;

pub use admin::{AdminService, IssuerAuthorization};
pub use api_server::ApiServer;
pub use authorization::{Action, AuthorizationGate, Decision};
pub use credential_issuer::CredentialIssuer;
pub use reconciler::{spawn_reconciler, trigger_channel, ReconcileScope, ReconcileTrigger, Reconciler, ReconciliationReport};
pub use revocation::RevocationOrchestrator;
pub use transaction::TransactionRunner;
pub use verifier::{VerificationReport, Verifier};
