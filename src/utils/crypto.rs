// src/utils/crypto.rs
//! Hashing utilities.
//!
//! Uses Keccak-256 for the commitment recorded on the ledger alongside each
//! credential's metadata URI.

use ethers_core::types::H256;
use ethers_core::utils::{hex, keccak256};

/// Computes a Keccak-256 hash of the input data.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Commitment over the exact metadata bytes uploaded to the content store,
/// as `0x` + 64 lowercase hex digits.
pub fn credential_commitment(metadata_bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(hash_data(metadata_bytes)))
}

/// True for `0x` + 64 hex digits, the shape the contract accepts as a hash.
pub fn is_commitment(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .map(|digits| digits.len() == 64 && digits.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Deterministic 32-byte identifier derived from a label and a counter.
/// Used where a fresh transaction hash has to be minted locally.
pub fn derive_hash(label: &str, counter: u64) -> H256 {
    let mut buf = Vec::with_capacity(label.len() + 8);
    buf.extend_from_slice(label.as_bytes());
    buf.extend_from_slice(&counter.to_be_bytes());
    H256(hash_data(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_shape() {
        let commitment = credential_commitment(b"{\"name\":\"x\"}");
        assert!(is_commitment(&commitment));
        assert_eq!(commitment, credential_commitment(b"{\"name\":\"x\"}"));
        assert_ne!(commitment, credential_commitment(b"{\"name\":\"y\"}"));
    }

    #[test]
    fn test_is_commitment_rejects() {
        assert!(!is_commitment("0x1234"));
        assert!(!is_commitment(&"a".repeat(66)));
        assert!(!is_commitment(&format!("0x{}", "g".repeat(64))));
    }

    #[test]
    fn test_derive_hash_distinct() {
        assert_ne!(derive_hash("tx", 1), derive_hash("tx", 2));
    }
}
