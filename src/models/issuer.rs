// src/models/issuer.rs
//! Issuer authorization as mirrored in the index.

use crate::models::address::Address;
use chrono::{DateTime, Utc};
use ethers_core::types::H256;
use serde::{Deserialize, Serialize};

/// Index copy of an issuer's authorization at the store.
///
/// Denormalized and possibly stale. Read for UI hints only; the gate always
/// asks the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRecord {
    pub address: Address,
    pub authorized: bool,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub authorization_tx_hash: Option<H256>,
    pub updated_at: DateTime<Utc>,
}

impl IssuerRecord {
    pub fn new(address: Address, authorized: bool) -> Self {
        Self {
            address,
            authorized,
            institution_id: None,
            authorization_tx_hash: None,
            updated_at: Utc::now(),
        }
    }
}

/// Answer of `check_authorization`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Authorized,
    NotAuthorized,
    StoreUninitialized,
}
