// src/index/memory.rs
//! In-memory index for local development and tests.
//!
//! Uses hashmaps keyed the same way as the database tables: credentials by
//! token id, issuers by address.

use crate::error::{CredentialError, Result};
use crate::index::CredentialIndex;
use crate::models::{Address, CredentialRecord, IssuerRecord};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    credentials: BTreeMap<u64, CredentialRecord>,
    issuers: HashMap<Address, IssuerRecord>,
    failing_writes: u32,
    unavailable: bool,
}

#[derive(Default)]
pub struct InMemoryIndex {
    tables: RwLock<Tables>,
    failing_reads: AtomicU32,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` reads fail.
    pub fn fail_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// The next `count` writes fail.
    pub async fn fail_writes(&self, count: u32) {
        self.tables.write().await.failing_writes = count;
    }

    /// While unavailable, every read and write fails.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.write().await.unavailable = unavailable;
    }

    pub async fn credential_count(&self) -> usize {
        self.tables.read().await.credentials.len()
    }

    /// Removes a record, simulating a lost write.
    pub async fn forget_credential(&self, token_id: u64) -> bool {
        self.tables.write().await.credentials.remove(&token_id).is_some()
    }

    fn check_write(tables: &mut Tables) -> Result<()> {
        if tables.unavailable {
            return Err(CredentialError::IndexWriteFailed("index offline".into()));
        }
        if tables.failing_writes > 0 {
            tables.failing_writes -= 1;
            return Err(CredentialError::IndexWriteFailed("simulated write failure".into()));
        }
        Ok(())
    }

    fn check_read(&self, tables: &Tables) -> Result<()> {
        if tables.unavailable {
            return Err(CredentialError::IndexUnavailable("index offline".into()));
        }
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(CredentialError::IndexUnavailable("simulated read failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialIndex for InMemoryIndex {
    async fn upsert_credential(&self, record: &CredentialRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        Self::check_write(&mut tables)?;
        tables.credentials.insert(record.token_id, record.clone());
        Ok(())
    }

    async fn get_credential(&self, token_id: u64) -> Result<Option<CredentialRecord>> {
        let tables = self.tables.read().await;
        self.check_read(&tables)?;
        Ok(tables.credentials.get(&token_id).cloned())
    }

    async fn credentials_by_issuer(&self, issuer: &Address) -> Result<Vec<CredentialRecord>> {
        let tables = self.tables.read().await;
        self.check_read(&tables)?;
        Ok(tables
            .credentials
            .values()
            .filter(|record| record.issuer == *issuer)
            .cloned()
            .collect())
    }

    async fn credentials_by_student(&self, student: &Address) -> Result<Vec<CredentialRecord>> {
        let tables = self.tables.read().await;
        self.check_read(&tables)?;
        Ok(tables
            .credentials
            .values()
            .filter(|record| record.student == *student)
            .cloned()
            .collect())
    }

    async fn upsert_issuer(&self, record: &IssuerRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        Self::check_write(&mut tables)?;
        tables.issuers.insert(record.address, record.clone());
        Ok(())
    }

    async fn get_issuer(&self, address: &Address) -> Result<Option<IssuerRecord>> {
        let tables = self.tables.read().await;
        self.check_read(&tables)?;
        Ok(tables.issuers.get(address).cloned())
    }

    async fn list_issuers(&self) -> Result<Vec<IssuerRecord>> {
        let tables = self.tables.read().await;
        self.check_read(&tables)?;
        let mut issuers: Vec<_> = tables.issuers.values().cloned().collect();
        issuers.sort_by_key(|record| record.address);
        Ok(issuers)
    }
}
