// src/models/mod.rs
//! Data model shared by the ledger, content store, index, and orchestrators.

pub mod address;
pub mod attempt;
pub mod credential;
pub mod issuer;

pub use address::{Address, CallerIdentity};
pub use attempt::{AttemptResult, IssuanceAttempt, IssuancePhase, RevokeResult};
pub use credential::{
    CredentialMetadata, CredentialRecord, IssueCredentialRequest, LedgerCredential, Subject,
};
pub use issuer::{AuthorizationStatus, IssuerRecord};
