// src/models/credential.rs
//! Academic credential data model.
//!
//! Three shapes of the same credential live in three systems:
//! - [`LedgerCredential`]: the facts the contract holds (authoritative)
//! - [`CredentialMetadata`]: the NFT-style document pinned in the content store
//! - [`CredentialRecord`]: the index row, a rebuildable mirror of the ledger

use crate::error::{CredentialError, Result};
use crate::models::address::Address;
use chrono::{DateTime, Utc};
use ethers_core::types::H256;
use serde::{Deserialize, Serialize};

/// A graded subject listed on a transcript-style credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub marks: String,
    #[serde(rename = "maxMarks")]
    pub max_marks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
}

/// Everything an institution supplies to issue one credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCredentialRequest {
    pub student_name: String,
    pub student_wallet: Address,
    #[serde(default)]
    pub student_email: Option<String>,

    pub credential_type: String,
    pub degree: String,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub gpa: Option<String>,
    /// Issue date as printed on the credential (free-form, e.g. `2024-06-01`).
    pub issue_date: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,

    #[serde(default)]
    pub institution_id: Option<String>,
    pub institution_name: String,

    /// Raw credential file (PDF, image, ...).
    #[serde(skip)]
    pub artifact: Vec<u8>,
    pub artifact_content_type: String,
}

impl IssueCredentialRequest {
    /// Rejects requests that cannot produce a well-formed credential.
    /// Runs before any I/O.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("student_name", &self.student_name),
            ("credential_type", &self.credential_type),
            ("degree", &self.degree),
            ("issue_date", &self.issue_date),
            ("institution_name", &self.institution_name),
            ("artifact_content_type", &self.artifact_content_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CredentialError::InputValidation(format!("{field} is required")));
            }
        }
        if self.student_wallet.is_zero() {
            return Err(CredentialError::InputValidation(
                "student_wallet must not be the zero address".into(),
            ));
        }
        if self.artifact.is_empty() {
            return Err(CredentialError::InputValidation("credential file is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataAttribute {
    pub trait_type: String,
    pub value: String,
}

/// The credential body embedded in the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialData {
    pub student_name: String,
    pub student_wallet: Address,
    pub degree: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpa: Option<String>,
    pub issue_date: String,
    pub institution_name: String,
    pub credential_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<Subject>,
}

/// NFT-style metadata document uploaded after the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    pub name: String,
    pub description: String,
    /// Resolvable locator of the uploaded artifact.
    pub image: String,
    pub attributes: Vec<MetadataAttribute>,
    pub credential_data: CredentialData,
}

impl CredentialMetadata {
    /// Builds the metadata for a request whose artifact is reachable at `artifact_url`.
    pub fn build(request: &IssueCredentialRequest, artifact_url: &str) -> Self {
        let mut attributes = vec![
            attribute("Credential Type", &request.credential_type),
            attribute("Degree", &request.degree),
            attribute("Institution", &request.institution_name),
            attribute("Issue Date", &request.issue_date),
        ];
        if let Some(major) = &request.major {
            attributes.push(attribute("Major", major));
        }
        if let Some(gpa) = &request.gpa {
            attributes.push(attribute("GPA", gpa));
        }
        if !request.subjects.is_empty() {
            attributes.push(attribute("Total Subjects", &request.subjects.len().to_string()));
        }

        Self {
            name: format!("{} - {}", request.credential_type, request.student_name),
            description: format!(
                "Academic credential issued by {} to {}",
                request.institution_name, request.student_name
            ),
            image: artifact_url.to_string(),
            attributes,
            credential_data: CredentialData {
                student_name: request.student_name.clone(),
                student_wallet: request.student_wallet,
                degree: request.degree.clone(),
                major: request.major.clone(),
                gpa: request.gpa.clone(),
                issue_date: request.issue_date.clone(),
                institution_name: request.institution_name.clone(),
                credential_type: request.credential_type.clone(),
                subjects: request.subjects.clone(),
            },
        }
    }
}

fn attribute(trait_type: &str, value: &str) -> MetadataAttribute {
    MetadataAttribute {
        trait_type: trait_type.to_string(),
        value: value.to_string(),
    }
}

/// Credential facts as reported by the ledger's `get_credential` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCredential {
    pub token_id: u64,
    pub issuer: Address,
    pub student: Address,
    pub credential_hash: String,
    pub metadata_uri: String,
    pub issued_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Index row for one credential, keyed by token id.
///
/// Created strictly after the issuing transaction is confirmed. Never
/// deleted; revocation only flips `revoked` and stamps `revoked_at` once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub token_id: u64,
    pub issuer: Address,
    pub student: Address,
    pub credential_hash: String,
    pub metadata_uri: String,
    pub issued_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,

    // Off-ledger context. Preserved across reconciliation.
    #[serde(default)]
    pub artifact_cid: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub issue_tx_hash: Option<H256>,
}

impl CredentialRecord {
    /// Fresh record mirroring a ledger credential.
    pub fn from_ledger(credential: &LedgerCredential) -> Self {
        Self {
            token_id: credential.token_id,
            issuer: credential.issuer,
            student: credential.student,
            credential_hash: credential.credential_hash.clone(),
            metadata_uri: credential.metadata_uri.clone(),
            issued_at: credential.issued_at,
            revoked: credential.revoked,
            revoked_at: credential.revoked_at,
            artifact_cid: None,
            institution_id: None,
            issue_tx_hash: None,
        }
    }

    /// True when every ledger-derived field agrees with `credential`.
    pub fn matches_ledger(&self, credential: &LedgerCredential) -> bool {
        self.token_id == credential.token_id
            && self.issuer == credential.issuer
            && self.student == credential.student
            && self.credential_hash == credential.credential_hash
            && self.metadata_uri == credential.metadata_uri
            // The contract clock has whole-second resolution.
            && self.issued_at.timestamp() == credential.issued_at.timestamp()
            && self.revoked == credential.revoked
            && (!credential.revoked || self.revoked_at.is_some())
    }

    /// Overwrites ledger-derived fields, keeping off-ledger context.
    ///
    /// A revocation timestamp already present in the index is kept when the
    /// ledger does not report one, so a record never gains a second
    /// distinct revocation time.
    pub fn overwrite_from_ledger(&mut self, credential: &LedgerCredential) {
        self.issuer = credential.issuer;
        self.student = credential.student;
        self.credential_hash = credential.credential_hash.clone();
        self.metadata_uri = credential.metadata_uri.clone();
        self.issued_at = credential.issued_at;
        if credential.revoked {
            self.revoked_at = credential
                .revoked_at
                .or(self.revoked_at)
                .or_else(|| Some(Utc::now()));
        } else {
            self.revoked_at = None;
        }
        self.revoked = credential.revoked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request() -> IssueCredentialRequest {
        IssueCredentialRequest {
            student_name: "Ada Lovelace".into(),
            student_wallet: Address::parse("0xB2").unwrap(),
            student_email: None,
            credential_type: "Bachelor's Degree".into(),
            degree: "BSc Mathematics".into(),
            major: Some("Analysis".into()),
            gpa: None,
            issue_date: "2024-06-01".into(),
            subjects: vec![],
            institution_id: Some("inst-1".into()),
            institution_name: "Example University".into(),
            artifact: b"%PDF-1.7".to_vec(),
            artifact_content_type: "application/pdf".into(),
        }
    }

    #[test]
    fn test_validate_requires_fields() {
        assert!(request().validate().is_ok());

        let mut missing = request();
        missing.degree = "  ".into();
        assert!(matches!(missing.validate(), Err(CredentialError::InputValidation(_))));

        let mut empty_file = request();
        empty_file.artifact.clear();
        assert!(empty_file.validate().is_err());
    }

    #[test]
    fn test_metadata_attributes() {
        let metadata = CredentialMetadata::build(&request(), "https://ipfs.io/ipfs/QmFile");
        assert_eq!(metadata.name, "Bachelor's Degree - Ada Lovelace");
        assert_eq!(metadata.image, "https://ipfs.io/ipfs/QmFile");
        let traits: Vec<_> = metadata.attributes.iter().map(|a| a.trait_type.as_str()).collect();
        assert_eq!(traits, ["Credential Type", "Degree", "Institution", "Issue Date", "Major"]);

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["credentialData"]["studentName"], "Ada Lovelace");
        assert!(json["credentialData"].get("gpa").is_none());
    }

    #[test]
    fn test_overwrite_keeps_first_revocation_time() {
        let issued = Utc::now();
        let first_revocation = issued + chrono::Duration::days(1);
        let mut ledger = LedgerCredential {
            token_id: 7,
            issuer: Address::parse("0xA1").unwrap(),
            student: Address::parse("0xB2").unwrap(),
            credential_hash: format!("0x{}", "ab".repeat(32)),
            metadata_uri: "ipfs://QmMeta".into(),
            issued_at: issued,
            revoked: false,
            revoked_at: None,
        };
        let mut record = CredentialRecord::from_ledger(&ledger);
        record.revoked = true;
        record.revoked_at = Some(first_revocation);

        ledger.revoked = true;
        assert!(record.matches_ledger(&ledger));
        record.overwrite_from_ledger(&ledger);
        assert_eq!(record.revoked_at, Some(first_revocation));
    }

    #[test]
    fn test_issue_time_drift_is_a_mismatch() {
        let issued = Utc.timestamp_opt(1_717_200_000, 0).unwrap();
        let ledger = LedgerCredential {
            token_id: 3,
            issuer: Address::parse("0xA1").unwrap(),
            student: Address::parse("0xB2").unwrap(),
            credential_hash: format!("0x{}", "cd".repeat(32)),
            metadata_uri: "ipfs://QmMeta".into(),
            issued_at: issued,
            revoked: false,
            revoked_at: None,
        };
        let mut record = CredentialRecord::from_ledger(&ledger);

        // Sub-second precision from a transaction timestamp is not drift.
        record.issued_at = issued + chrono::Duration::milliseconds(250);
        assert!(record.matches_ledger(&ledger));

        record.issued_at = issued - chrono::Duration::hours(3);
        assert!(!record.matches_ledger(&ledger));
        record.overwrite_from_ledger(&ledger);
        assert_eq!(record.issued_at, issued);
        assert!(record.matches_ledger(&ledger));
    }
}
