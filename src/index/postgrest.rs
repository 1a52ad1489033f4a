// src/index/postgrest.rs
//! Index backed by a PostgREST endpoint (e.g. Supabase `/rest/v1`).
//!
//! Tables:
//! - `credentials`, primary key `token_id`
//! - `issuers`, primary key `address`
//!
//! Upserts use `Prefer: resolution=merge-duplicates` so a repeated write of
//! the same key replaces the row.

use crate::error::{CredentialError, Result};
use crate::index::CredentialIndex;
use crate::models::{Address, CredentialRecord, IssuerRecord};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const CREDENTIALS: &str = "credentials";
const ISSUERS: &str = "issuers";

#[derive(Clone)]
pub struct PostgrestIndex {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PostgrestIndex {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(CredentialError::InputValidation("index url is empty".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CredentialError::InputValidation(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.header("apikey", &self.api_key).bearer_auth(&self.api_key)
        }
    }

    async fn upsert<T: Serialize + Sync>(&self, table: &str, key: &str, row: &T) -> Result<()> {
        let response = self
            .authed(self.http.post(format!("{}/{}", self.base_url, table)))
            .query(&[("on_conflict", key)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await
            .map_err(|e| CredentialError::IndexWriteFailed(format!("{table}: {e}")))?;
        if !response.status().is_success() {
            return Err(CredentialError::IndexWriteFailed(failure(table, response).await));
        }
        Ok(())
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, filters: &[(&str, String)]) -> Result<Vec<T>> {
        let mut query: Vec<(&str, String)> = vec![("select", "*".to_string())];
        query.extend(filters.iter().cloned());
        debug!("index select {} {:?}", table, filters);
        let response = self
            .authed(self.http.get(format!("{}/{}", self.base_url, table)))
            .query(&query)
            .send()
            .await
            .map_err(|e| CredentialError::IndexUnavailable(format!("{table}: {e}")))?;
        if !response.status().is_success() {
            return Err(CredentialError::IndexUnavailable(failure(table, response).await));
        }
        response
            .json()
            .await
            .map_err(|e| CredentialError::IndexUnavailable(format!("{table} rows: {e}")))
    }
}

async fn failure(table: &str, response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{table} returned {status}: {body}")
}

fn eq(value: impl ToString) -> String {
    format!("eq.{}", value.to_string())
}

#[async_trait]
impl CredentialIndex for PostgrestIndex {
    async fn upsert_credential(&self, record: &CredentialRecord) -> Result<()> {
        self.upsert(CREDENTIALS, "token_id", record).await
    }

    async fn get_credential(&self, token_id: u64) -> Result<Option<CredentialRecord>> {
        let rows: Vec<CredentialRecord> = self.select(CREDENTIALS, &[("token_id", eq(token_id))]).await?;
        Ok(rows.into_iter().next())
    }

    async fn credentials_by_issuer(&self, issuer: &Address) -> Result<Vec<CredentialRecord>> {
        self.select(CREDENTIALS, &[("issuer", eq(issuer)), ("order", "token_id.asc".into())])
            .await
    }

    async fn credentials_by_student(&self, student: &Address) -> Result<Vec<CredentialRecord>> {
        self.select(CREDENTIALS, &[("student", eq(student)), ("order", "token_id.asc".into())])
            .await
    }

    async fn upsert_issuer(&self, record: &IssuerRecord) -> Result<()> {
        self.upsert(ISSUERS, "address", record).await
    }

    async fn get_issuer(&self, address: &Address) -> Result<Option<IssuerRecord>> {
        let rows: Vec<IssuerRecord> = self.select(ISSUERS, &[("address", eq(address))]).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_issuers(&self) -> Result<Vec<IssuerRecord>> {
        self.select(ISSUERS, &[("order", "address.asc".into())]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LedgerCredential;
    use chrono::Utc;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn record() -> CredentialRecord {
        CredentialRecord::from_ledger(&LedgerCredential {
            token_id: 42,
            issuer: Address::parse("0xA1").unwrap(),
            student: Address::parse("0xB2").unwrap(),
            credential_hash: format!("0x{}", "ef".repeat(32)),
            metadata_uri: "ipfs://QmMeta".into(),
            issued_at: Utc::now(),
            revoked: false,
            revoked_at: None,
        })
    }

    #[tokio::test]
    async fn test_upsert_sends_merge_duplicates() {
        let mut server = Server::new_async().await;
        let upsert = server
            .mock("POST", "/credentials")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "token_id".into()))
            .match_header("prefer", Matcher::Regex("resolution=merge-duplicates".into()))
            .match_header("apikey", "anon-key")
            .match_body(Matcher::PartialJson(json!([{ "token_id": 42 }])))
            .with_status(201)
            .create_async()
            .await;

        let index = PostgrestIndex::new(&server.url(), "anon-key").unwrap();
        index.upsert_credential(&record()).await.unwrap();
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_credential_filters_by_key() {
        let mut server = Server::new_async().await;
        let row = serde_json::to_string(&[record()]).unwrap();
        server
            .mock("GET", "/credentials")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("token_id".into(), "eq.42".into()),
                Matcher::UrlEncoded("select".into(), "*".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(row)
            .create_async()
            .await;

        let index = PostgrestIndex::new(&server.url(), "").unwrap();
        let found = index.get_credential(42).await.unwrap().unwrap();
        assert_eq!(found.token_id, 42);
        assert_eq!(found.student, Address::parse("0xB2").unwrap());
    }

    #[tokio::test]
    async fn test_write_error_is_index_write_failed() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/issuers")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let index = PostgrestIndex::new(&server.url(), "").unwrap();
        let err = index
            .upsert_issuer(&IssuerRecord::new(Address::parse("0xA1").unwrap(), true))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::IndexWriteFailed(_)));
    }

    #[tokio::test]
    async fn test_read_error_is_index_unavailable() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/issuers")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let index = PostgrestIndex::new(&server.url(), "").unwrap();
        assert!(matches!(
            index.list_issuers().await,
            Err(CredentialError::IndexUnavailable(_))
        ));
    }
}
