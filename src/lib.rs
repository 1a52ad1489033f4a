// src/lib.rs
//! # Credential Ledger
//!
//! Lifecycle orchestration for academic credentials minted on a ledger.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: `LedgerClient` over a REST node (or the in-process
//!    sandbox), plus the signing agent boundary
//! 2. **Storage Layer**: content-addressed artifact storage (IPFS, Pinata)
//!    and persisted issuance attempts
//! 3. **Index Layer**: rebuildable off-chain mirror of ledger facts
//! 4. **Services Layer**: authorization gate, issuance and revocation
//!    orchestrators, reconciler, and the HTTP API
//!
//! The ledger is the only source of truth. The index is a projection that
//! the reconciler repairs; nothing read from it gates a state change.

pub mod app;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{CredentialError, Result};
