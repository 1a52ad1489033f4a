// src/blockchain/intent.rs
//! Unsigned transaction intents.
//!
//! One variant per contract entry function, each with a fixed argument
//! shape. Intents are validated before they are rendered into a payload
//! and handed to the signing agent, so a malformed intent never reaches a
//! wallet.

use crate::error::{CredentialError, Result};
use crate::models::Address;
use crate::storage::ContentId;
use crate::utils::crypto::is_commitment;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Contract module holding the credential entry functions and views.
pub const CREDENTIAL_MODULE: &str = "credential_nft";

/// A state-changing contract call, before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransactionIntent {
    /// Creates the credential store under the signer's account.
    InitializeStore,
    /// Owner grants issuance rights to `issuer`.
    AuthorizeIssuer { issuer: Address },
    /// Authorized issuer mints a credential for `student`.
    IssueCredential {
        student: Address,
        credential_hash: String,
        metadata_uri: String,
        store: Address,
    },
    /// Original issuer revokes `token_id`.
    RevokeCredential { token_id: u64, store: Address },
}

impl TransactionIntent {
    /// Builds a validated issuance intent.
    pub fn issue_credential(
        student: Address,
        credential_hash: impl Into<String>,
        metadata_uri: impl Into<String>,
        store: Address,
    ) -> Result<Self> {
        let intent = Self::IssueCredential {
            student,
            credential_hash: credential_hash.into(),
            metadata_uri: metadata_uri.into(),
            store,
        };
        intent.validate()?;
        Ok(intent)
    }

    pub fn revoke_credential(token_id: u64, store: Address) -> Result<Self> {
        let intent = Self::RevokeCredential { token_id, store };
        intent.validate()?;
        Ok(intent)
    }

    pub fn authorize_issuer(issuer: Address) -> Result<Self> {
        let intent = Self::AuthorizeIssuer { issuer };
        intent.validate()?;
        Ok(intent)
    }

    /// Checks the argument shape of the intent.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::InitializeStore => Ok(()),
            Self::AuthorizeIssuer { issuer } => {
                if issuer.is_zero() {
                    return Err(invalid("issuer must not be the zero address"));
                }
                Ok(())
            }
            Self::IssueCredential {
                student,
                credential_hash,
                metadata_uri,
                store,
            } => {
                if student.is_zero() || store.is_zero() {
                    return Err(invalid("student and store must not be the zero address"));
                }
                if !is_commitment(credential_hash) {
                    return Err(invalid("credential_hash must be 0x followed by 64 hex digits"));
                }
                if !metadata_uri.starts_with("ipfs://") || ContentId::from_uri(metadata_uri).is_err() {
                    return Err(invalid("metadata_uri must be an ipfs:// URI"));
                }
                Ok(())
            }
            Self::RevokeCredential { store, .. } => {
                if store.is_zero() {
                    return Err(invalid("store must not be the zero address"));
                }
                Ok(())
            }
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            Self::InitializeStore => "initialize",
            Self::AuthorizeIssuer { .. } => "authorize_issuer",
            Self::IssueCredential { .. } => "issue_credential",
            Self::RevokeCredential { .. } => "revoke_credential",
        }
    }

    /// Positional arguments in contract order. The signer is implicit.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::InitializeStore => vec![],
            Self::AuthorizeIssuer { issuer } => vec![json!(issuer)],
            Self::IssueCredential {
                student,
                credential_hash,
                metadata_uri,
                store,
            } => vec![json!(student), json!(credential_hash), json!(metadata_uri), json!(store)],
            Self::RevokeCredential { token_id, store } => {
                vec![json!(token_id.to_string()), json!(store)]
            }
        }
    }

    /// Renders the intent as an entry-function payload for `module_address`.
    pub fn to_payload(&self, module_address: &Address) -> Result<EntryFunctionPayload> {
        self.validate()?;
        Ok(EntryFunctionPayload {
            kind: "entry_function_payload".to_string(),
            function: entry_function(module_address, self.function_name()),
            type_arguments: vec![],
            arguments: self.arguments(),
        })
    }
}

/// Fully qualified `address::credential_nft::name` reference.
pub fn entry_function(module_address: &Address, name: &str) -> String {
    format!("{module_address}::{CREDENTIAL_MODULE}::{name}")
}

/// Opaque payload handed to the signing agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFunctionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: String,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Value>,
}

impl EntryFunctionPayload {
    /// The bare function name, e.g. `issue_credential`.
    pub fn function_name(&self) -> &str {
        self.function.rsplit("::").next().unwrap_or(&self.function)
    }
}

fn invalid(message: &str) -> CredentialError {
    CredentialError::InputValidation(format!("transaction intent: {message}"))
}
