// src/models/address.rs
//! Account addresses and caller identity.
//!
//! Ledger accounts are 32-byte addresses written as `0x` followed by up to
//! 64 hex digits. Wallets hand them out in mixed case and with leading zeros
//! stripped, so every address is normalized on parse: left-padded to 64
//! digits and rendered lowercase. Two addresses compare equal exactly when
//! their canonical forms match, which makes every authorization comparison
//! case-insensitive.

use crate::error::{CredentialError, Result};
use ethers_core::types::H256;
use ethers_core::utils::hex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A normalized 32-byte ledger account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(H256);

impl Address {
    /// Parses `0x`-prefixed hex of 1 to 64 digits.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| {
                CredentialError::InputValidation(format!("address `{trimmed}` must start with 0x"))
            })?;
        if digits.is_empty() || digits.len() > 64 {
            return Err(CredentialError::InputValidation(format!(
                "address `{trimmed}` must have between 1 and 64 hex digits"
            )));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CredentialError::InputValidation(format!(
                "address `{trimmed}` contains non-hex characters"
            )));
        }
        let padded = format!("{digits:0>64}");
        let bytes = hex::decode(padded)
            .map_err(|e| CredentialError::InputValidation(format!("address `{trimmed}`: {e}")))?;
        Ok(Self(H256::from_slice(&bytes)))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(H256(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Full lowercase form, `0x` + 64 hex digits.
    pub fn canonical(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_bytes()))
    }

    /// `0x1234...abcd` form for log lines.
    pub fn short(&self) -> String {
        let full = self.canonical();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl FromStr for Address {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Who is asking. Always passed explicitly into the gate and orchestrators;
/// there is no ambient "connected wallet".
///
/// The principal link (institution or student account in the index) is
/// advisory. The ledger only ever looks at the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

impl CallerIdentity {
    pub fn new(address: Address) -> Self {
        Self { address, principal: None }
    }

    pub fn with_principal(address: Address, principal: impl Into<String>) -> Self {
        Self {
            address,
            principal: Some(principal.into()),
        }
    }
}

impl From<Address> for CallerIdentity {
    fn from(address: Address) -> Self {
        Self::new(address)
    }
}
