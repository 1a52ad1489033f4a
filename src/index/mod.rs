// src/index/mod.rs
//! Off-chain index: a rebuildable, query-friendly mirror of ledger facts.
//!
//! Any component may write here, but nothing read from the index is ever
//! used to gate a state-changing action. Writes are single-record upserts
//! keyed by token id or issuer address.

pub mod memory;
pub mod postgrest;

use crate::error::Result;
use crate::models::{Address, CredentialRecord, IssuerRecord};
use async_trait::async_trait;

pub use memory::InMemoryIndex;
pub use postgrest::PostgrestIndex;

/// Record-oriented index database.
///
/// Read failures surface as `IndexUnavailable`, write failures as
/// `IndexWriteFailed`.
#[async_trait]
pub trait CredentialIndex: Send + Sync {
    async fn upsert_credential(&self, record: &CredentialRecord) -> Result<()>;

    async fn get_credential(&self, token_id: u64) -> Result<Option<CredentialRecord>>;

    async fn credentials_by_issuer(&self, issuer: &Address) -> Result<Vec<CredentialRecord>>;

    async fn credentials_by_student(&self, student: &Address) -> Result<Vec<CredentialRecord>>;

    async fn upsert_issuer(&self, record: &IssuerRecord) -> Result<()>;

    async fn get_issuer(&self, address: &Address) -> Result<Option<IssuerRecord>>;

    async fn list_issuers(&self) -> Result<Vec<IssuerRecord>>;
}
