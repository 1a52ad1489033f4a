// src/error.rs
//! Error taxonomy for the credential lifecycle.
//!
//! Every fallible operation in the crate returns [`CredentialError`]. The
//! variants map one-to-one onto the outcomes a caller has to tell apart:
//! fix the input, retry the upload, re-approve in the wallet, wait and
//! re-check a transaction, or contact an administrator.

use ethers_core::types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CredentialError>;

/// Why the authorization gate refused an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Caller is not an authorized issuer at the store.
    NotAuthorized,
    /// Caller is not the store owner.
    NotOwner,
    /// Caller did not issue the credential it is trying to revoke.
    NotIssuer,
    /// The store does not exist, or the ledger could not be reached to tell.
    StoreUninitialized,
    /// No credential with the requested token id is known.
    CredentialNotFound,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotAuthorized => "caller is not an authorized issuer",
            Self::NotOwner => "caller is not the store owner",
            Self::NotIssuer => "caller is not the issuer of this credential",
            Self::StoreUninitialized => "credential store is not initialized",
            Self::CredentialNotFound => "credential not found",
        };
        f.write_str(text)
    }
}

/// Contract-level denial reported by the ledger, surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum LedgerRejection {
    NotAuthorized,
    NotOwner,
    NotIssuer,
    AlreadyRevoked,
    StoreUninitialized,
    StoreAlreadyInitialized,
    CredentialNotFound,
    Other(String),
}

impl LedgerRejection {
    /// Classifies a VM status / abort message returned by the ledger node.
    ///
    /// The contract aborts with named error constants (`E_NOT_AUTHORIZED`,
    /// `E_ALREADY_REVOKED`, ...). A missing store resource surfaces either as
    /// `E_STORE_NOT_INITIALIZED` or as the node's `RESOURCE_DOES_NOT_EXIST`.
    pub fn from_vm_status(status: &str) -> Self {
        let upper = status.to_ascii_uppercase();
        if upper.contains("E_ALREADY_REVOKED") {
            Self::AlreadyRevoked
        } else if upper.contains("E_NOT_OWNER") {
            Self::NotOwner
        } else if upper.contains("E_NOT_ISSUER") {
            Self::NotIssuer
        } else if upper.contains("E_NOT_AUTHORIZED") {
            Self::NotAuthorized
        } else if upper.contains("E_ALREADY_INITIALIZED") || upper.contains("RESOURCE_ALREADY_EXISTS") {
            Self::StoreAlreadyInitialized
        } else if upper.contains("E_STORE_NOT_INITIALIZED")
            || upper.contains("RESOURCE_DOES_NOT_EXIST")
            || upper.contains("MISSING_DATA")
        {
            Self::StoreUninitialized
        } else if upper.contains("E_CREDENTIAL_NOT_FOUND") {
            Self::CredentialNotFound
        } else {
            Self::Other(status.to_string())
        }
    }
}

impl fmt::Display for LedgerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthorized => f.write_str("E_NOT_AUTHORIZED"),
            Self::NotOwner => f.write_str("E_NOT_OWNER"),
            Self::NotIssuer => f.write_str("E_NOT_ISSUER"),
            Self::AlreadyRevoked => f.write_str("E_ALREADY_REVOKED"),
            Self::StoreUninitialized => f.write_str("E_STORE_NOT_INITIALIZED"),
            Self::StoreAlreadyInitialized => f.write_str("E_ALREADY_INITIALIZED"),
            Self::CredentialNotFound => f.write_str("E_CREDENTIAL_NOT_FOUND"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// Errors produced anywhere in the issuance, revocation, and reconciliation flows.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Malformed address, missing field, or bad configuration. Raised before any I/O.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Upload to or retrieval from the content store failed.
    #[error("content store error: {0}")]
    ContentStore(String),

    /// The wallet owner declined to sign.
    #[error("signing rejected: {0}")]
    SigningRejected(String),

    /// The caller aborted the attempt before a transaction was submitted.
    #[error("attempt aborted by caller")]
    Aborted,

    /// The transaction was submitted but its outcome is not yet known.
    /// Re-query the transaction status before retrying anything.
    #[error("confirmation timed out for transaction {tx_hash:#x}")]
    ConfirmationTimeout { tx_hash: H256 },

    /// The ledger contract refused the transaction or view.
    #[error("ledger rejected: {0}")]
    LedgerRejected(LedgerRejection),

    /// The ledger node could not be reached or answered with garbage.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Writing to the index failed. The ledger state is unaffected.
    #[error("index write failed: {0}")]
    IndexWriteFailed(String),

    /// Reading from the index failed.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// Returned by the authorization gate before any mutating step.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(DenialReason),

    /// The signing agent itself failed (transport, malformed reply).
    #[error("signing agent error: {0}")]
    SigningAgent(String),

    /// Persisting or loading an attempt record failed.
    #[error("attempt store error: {0}")]
    AttemptStore(String),

    /// The requested transition conflicts with current state.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Serializable discriminant of [`CredentialError`], carried in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputValidation,
    ContentStore,
    SigningRejected,
    Aborted,
    ConfirmationTimeout,
    LedgerRejected,
    LedgerUnavailable,
    IndexWriteFailed,
    IndexUnavailable,
    AuthorizationDenied,
    SigningAgent,
    AttemptStore,
    Conflict,
}

impl CredentialError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InputValidation(_) => FailureKind::InputValidation,
            Self::ContentStore(_) => FailureKind::ContentStore,
            Self::SigningRejected(_) => FailureKind::SigningRejected,
            Self::Aborted => FailureKind::Aborted,
            Self::ConfirmationTimeout { .. } => FailureKind::ConfirmationTimeout,
            Self::LedgerRejected(_) => FailureKind::LedgerRejected,
            Self::LedgerUnavailable(_) => FailureKind::LedgerUnavailable,
            Self::IndexWriteFailed(_) => FailureKind::IndexWriteFailed,
            Self::IndexUnavailable(_) => FailureKind::IndexUnavailable,
            Self::AuthorizationDenied(_) => FailureKind::AuthorizationDenied,
            Self::SigningAgent(_) => FailureKind::SigningAgent,
            Self::AttemptStore(_) => FailureKind::AttemptStore,
            Self::Conflict(_) => FailureKind::Conflict,
        }
    }

    /// Transient I/O failures worth a bounded retry at the call site.
    ///
    /// Signing and submission outcomes are never retryable: a rejected
    /// signature is a user decision and a timed-out confirmation may still land.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ContentStore(_)
                | Self::IndexWriteFailed(_)
                | Self::IndexUnavailable(_)
                | Self::LedgerUnavailable(_)
        )
    }

    /// Failures of the sign-and-submit step after which the transaction may
    /// still have reached the ledger: the wallet bridge or the node dropped
    /// the reply, not the request.
    pub fn may_have_dispatched(&self) -> bool {
        matches!(self, Self::SigningAgent(_) | Self::LedgerUnavailable(_))
    }

    /// Converts into a serializable detail for attempt records and API bodies.
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind(),
            message: self.to_string(),
            rejection: match self {
                Self::LedgerRejected(rejection) => Some(rejection.clone()),
                _ => None,
            },
            denial: match self {
                Self::AuthorizationDenied(reason) => Some(*reason),
                _ => None,
            },
        }
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(err: serde_json::Error) -> Self {
        CredentialError::InputValidation(format!("json: {err}"))
    }
}

/// Error information as stored in attempt records and returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<LedgerRejection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialReason>,
}
