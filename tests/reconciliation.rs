// tests/reconciliation.rs
//! Index reconciliation against the sandbox ledger.

mod common;

use common::*;
use credential_ledger::blockchain::sandbox::SandboxLedger;
use credential_ledger::index::CredentialIndex;
use credential_ledger::models::{Address, CredentialRecord, IssuerRecord};
use chrono::Utc;
use credential_ledger::services::{spawn_reconciler, trigger_channel, ReconcileScope};
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_missing_records_converge_and_second_run_is_noop() {
    let harness = Harness::new().with_issuer().await;
    let students = ["0xB2", "0xB3", "0xB4", "0xB5"];
    let mut tokens = Vec::new();
    for s in students {
        let result = harness.issue_to(Address::parse(s).unwrap()).await;
        tokens.push(result.token_id.unwrap());
    }
    assert!(harness.index.forget_credential(tokens[0]).await);
    assert!(harness.index.forget_credential(tokens[2]).await);
    assert_eq!(harness.index.credential_count().await, 2);

    let scope = ReconcileScope::Issuer { address: issuer() };
    let report = harness.services.reconciler.reconcile(&scope).await;
    assert_eq!(report.created, 2);
    assert_eq!(report.updated, 0);
    assert!(report.is_converged());

    assert_eq!(harness.index.credential_count().await, tokens.len());
    for token_id in &tokens {
        let record = assert_ok!(harness.index.get_credential(*token_id).await).unwrap();
        assert!(record.matches_ledger(&harness.sandbox.credential(*token_id).unwrap()));
    }

    let again = harness.services.reconciler.reconcile(&scope).await;
    assert_eq!(again.repaired(), 0);
    assert!(again.is_converged());
}

#[tokio::test]
async fn test_ledger_validity_overwrites_index() {
    let harness = Harness::new().with_issuer().await;
    let token_id = harness.issue_to(student()).await.token_id.unwrap();

    // Index claims revoked; the ledger says valid.
    let mut record = assert_ok!(harness.index.get_credential(token_id).await).unwrap();
    record.revoked = true;
    record.revoked_at = Some(Utc::now());
    assert_ok!(harness.index.upsert_credential(&record).await);

    let report = harness
        .services
        .reconciler
        .reconcile(&ReconcileScope::Student { address: student() })
        .await;
    assert_eq!(report.updated, 1);
    let repaired = assert_ok!(harness.index.get_credential(token_id).await).unwrap();
    assert!(!repaired.revoked);
    assert_eq!(repaired.revoked_at, None);
    assert_eq!(repaired.institution_id.as_deref(), Some("inst-1"), "off-ledger context is kept");
}

#[tokio::test]
async fn test_wrong_issue_time_is_repaired() {
    let harness = Harness::new().with_issuer().await;
    let token_id = harness.issue_to(student()).await.token_id.unwrap();
    let on_ledger = harness.sandbox.credential(token_id).unwrap().issued_at;

    let mut record = assert_ok!(harness.index.get_credential(token_id).await).unwrap();
    record.issued_at = on_ledger - chrono::Duration::days(30);
    assert_ok!(harness.index.upsert_credential(&record).await);

    let report = harness
        .services
        .reconciler
        .reconcile(&ReconcileScope::Token { token_id })
        .await;
    assert_eq!(report.updated, 1);
    let repaired = assert_ok!(harness.index.get_credential(token_id).await).unwrap();
    assert_eq!(repaired.issued_at, on_ledger);
}

#[tokio::test]
async fn test_index_only_records_are_reported_not_deleted() {
    let harness = Harness::new().with_issuer().await;
    harness.issue_to(student()).await;
    let phantom = CredentialRecord {
        token_id: 777,
        issuer: issuer(),
        student: student(),
        credential_hash: format!("0x{}", "ab".repeat(32)),
        metadata_uri: "ipfs://QmPhantom".into(),
        issued_at: Utc::now(),
        revoked: false,
        revoked_at: None,
        artifact_cid: None,
        institution_id: None,
        issue_tx_hash: None,
    };
    assert_ok!(harness.index.upsert_credential(&phantom).await);

    let report = harness
        .services
        .reconciler
        .reconcile(&ReconcileScope::Issuer { address: issuer() })
        .await;
    assert_eq!(report.still_divergent, 1);
    assert!(assert_ok!(harness.index.get_credential(777).await).is_some());
}

#[tokio::test]
async fn test_issuer_flags_follow_the_ledger() {
    let harness = Harness::new().with_issuer().await;
    // Stale claim that a stranger is authorized.
    assert_ok!(harness.index.upsert_issuer(&IssuerRecord::new(stranger(), true)).await);

    let report = harness.services.reconciler.reconcile(&ReconcileScope::AllIssuers).await;
    assert!(report.is_converged(), "{report:?}");

    let stale = assert_ok!(harness.index.get_issuer(&stranger()).await).unwrap();
    assert!(!stale.authorized);
    let owner_record = assert_ok!(harness.index.get_issuer(&owner()).await).unwrap();
    assert!(owner_record.authorized);
    let issuer_record = assert_ok!(harness.index.get_issuer(&issuer()).await).unwrap();
    assert!(issuer_record.authorized);
    assert_eq!(issuer_record.institution_id.as_deref(), Some("inst-1"));
}

#[tokio::test]
async fn test_reauthorization_with_unreadable_index_keeps_institution() {
    let harness = Harness::new().with_issuer().await;
    harness.index.fail_reads(3);

    let authorization = assert_ok!(
        harness
            .services
            .admin
            .authorize_issuer(&caller(owner()), issuer(), None, &never())
            .await
    );
    assert!(!authorization.index_synced);

    let stored = assert_ok!(harness.index.get_issuer(&issuer()).await).unwrap();
    assert_eq!(stored.institution_id.as_deref(), Some("inst-1"));
    assert!(stored.authorized);

    let report = harness.services.reconciler.reconcile(&ReconcileScope::AllIssuers).await;
    assert!(report.is_converged(), "{report:?}");
    let stored = assert_ok!(harness.index.get_issuer(&issuer()).await).unwrap();
    assert_eq!(stored.institution_id.as_deref(), Some("inst-1"));
}

#[tokio::test]
async fn test_unreachable_ledger_is_reported_not_repaired() {
    let harness = Harness::new().with_issuer().await;
    let token_id = harness.issue_to(student()).await.token_id.unwrap();
    harness.index.forget_credential(token_id).await;
    harness.sandbox.set_unreachable(true);

    let report = harness
        .services
        .reconciler
        .reconcile(&ReconcileScope::Token { token_id })
        .await;
    assert_eq!(report.repaired(), 0);
    assert!(!report.errors.is_empty());
    assert_eq!(harness.index.credential_count().await, 0);
}

#[tokio::test]
async fn test_background_task_repairs_on_trigger() {
    let (trigger, requests) = trigger_channel(8);
    let harness = Harness::build(SandboxLedger::new(module(), owner()), Some(trigger))
        .with_issuer()
        .await;
    let task = spawn_reconciler(harness.services.reconciler.clone(), None, requests);

    harness.index.fail_writes(3).await;
    let result = harness.issue_to(student()).await;
    let token_id = result.token_id.unwrap();

    let mut indexed = false;
    for _ in 0..100 {
        if assert_ok!(harness.index.get_credential(token_id).await).is_some() {
            indexed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(indexed, "triggered reconcile never indexed token {token_id}");
    task.abort();
}
