// src/services/authorization.rs
//! Authorization gate.
//!
//! Decides whether the ledger permits a caller to perform an action. Every
//! decision is a live ledger query; the index copy of issuer flags is never
//! consulted here.
//!
//! Revocation policy: a credential may be revoked by the address recorded
//! as its issuer, whether or not that address is still an authorized
//! issuer. An institution that loses its authorization keeps the ability
//! to correct what it already issued.

use crate::blockchain::LedgerClient;
use crate::error::{CredentialError, DenialReason, LedgerRejection, Result};
use crate::models::{Address, AuthorizationStatus, CallerIdentity};
use log::{debug, warn};

/// A state-changing action subject to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    IssueCredential,
    /// Owner-only administration (authorizing issuers).
    AuthorizeIssuer,
    RevokeCredential { token_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenialReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// `Ok` when allowed, `AuthorizationDenied` otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => Err(CredentialError::AuthorizationDenied(reason)),
        }
    }
}

/// Revocation rule: only the recorded issuer may revoke.
pub fn revocation_decision(recorded_issuer: &Address, caller: &CallerIdentity) -> Decision {
    if *recorded_issuer == caller.address {
        Decision::Allowed
    } else {
        Decision::Denied(DenialReason::NotIssuer)
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    ledger: LedgerClient,
}

impl AuthorizationGate {
    pub fn new(ledger: LedgerClient) -> Self {
        Self { ledger }
    }

    /// Answers whether `caller` may perform `action` right now.
    pub async fn can_perform(&self, action: Action, caller: &CallerIdentity) -> Decision {
        let decision = match action {
            Action::IssueCredential => self.issue_decision(&caller.address).await,
            Action::AuthorizeIssuer => self.owner_decision(&caller.address).await,
            Action::RevokeCredential { token_id } => self.revoke_decision(token_id, caller).await,
        };
        debug!("gate: {:?} by {} -> {:?}", action, caller.address.short(), decision);
        decision
    }

    /// [`can_perform`](Self::can_perform) as a `Result`.
    pub async fn require(&self, action: Action, caller: &CallerIdentity) -> Result<()> {
        self.can_perform(action, caller).await.into_result()
    }

    /// Issuer authorization status of `address` at the configured store.
    pub async fn check_authorization(&self, address: &Address) -> AuthorizationStatus {
        match self.ledger.get_owner().await {
            Ok(Some(_)) => {}
            Ok(None) => return AuthorizationStatus::StoreUninitialized,
            Err(e) => {
                warn!("Ledger unreachable while checking {}: {}", address.short(), e);
                return AuthorizationStatus::StoreUninitialized;
            }
        }
        match self.ledger.is_issuer_authorized(address).await {
            Ok(true) => AuthorizationStatus::Authorized,
            Ok(false) => AuthorizationStatus::NotAuthorized,
            Err(e) => {
                warn!("Authorization query for {} failed: {}", address.short(), e);
                AuthorizationStatus::StoreUninitialized
            }
        }
    }

    async fn issue_decision(&self, caller: &Address) -> Decision {
        match self.ledger.is_issuer_authorized(caller).await {
            Ok(true) => Decision::Allowed,
            Ok(false) => Decision::Denied(DenialReason::NotAuthorized),
            Err(e) => uninitialized("issuer check", &e),
        }
    }

    async fn owner_decision(&self, caller: &Address) -> Decision {
        match self.ledger.get_owner().await {
            Ok(Some(owner)) if owner == *caller => Decision::Allowed,
            Ok(Some(_)) => Decision::Denied(DenialReason::NotOwner),
            Ok(None) => Decision::Denied(DenialReason::StoreUninitialized),
            Err(e) => uninitialized("owner check", &e),
        }
    }

    async fn revoke_decision(&self, token_id: u64, caller: &CallerIdentity) -> Decision {
        match self.ledger.get_credential(token_id).await {
            Ok(Some(credential)) => revocation_decision(&credential.issuer, caller),
            Ok(None) => Decision::Denied(DenialReason::CredentialNotFound),
            Err(e) => uninitialized("credential lookup", &e),
        }
    }
}

/// Unreachable ledger and missing store both deny as `StoreUninitialized`.
fn uninitialized(what: &str, error: &CredentialError) -> Decision {
    if !matches!(
        error,
        CredentialError::LedgerRejected(LedgerRejection::StoreUninitialized)
    ) {
        warn!("Gate {} failed, denying: {}", what, error);
    }
    Decision::Denied(DenialReason::StoreUninitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::sandbox::SandboxLedger;
    use crate::blockchain::signer::{SignOutcome, SigningAgent};
    use crate::blockchain::TransactionIntent;
    use std::sync::Arc;

    fn admin() -> Address {
        Address::parse("0xAD").unwrap()
    }

    async fn setup(initialize: bool) -> (Arc<SandboxLedger>, AuthorizationGate) {
        let sandbox = Arc::new(SandboxLedger::new(admin(), admin()));
        if initialize {
            let payload = TransactionIntent::InitializeStore.to_payload(&admin()).unwrap();
            let outcome = sandbox.sign_and_submit(&admin(), &payload).await.unwrap();
            assert!(matches!(outcome, SignOutcome::Submitted(_)));
        }
        let gate = AuthorizationGate::new(LedgerClient::new(sandbox.clone(), admin(), admin()));
        (sandbox, gate)
    }

    #[tokio::test]
    async fn test_owner_and_stranger_on_fresh_store() {
        let (_, gate) = setup(true).await;
        let stranger = Address::parse("0x5157").unwrap();
        assert_eq!(gate.check_authorization(&admin()).await, AuthorizationStatus::Authorized);
        assert_eq!(gate.check_authorization(&stranger).await, AuthorizationStatus::NotAuthorized);
        assert_eq!(
            gate.can_perform(Action::AuthorizeIssuer, &stranger.into()).await,
            Decision::Denied(DenialReason::NotOwner)
        );
        assert!(gate.can_perform(Action::AuthorizeIssuer, &admin().into()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_uninitialized_store_is_distinct_denial() {
        let (_, gate) = setup(false).await;
        assert_eq!(
            gate.can_perform(Action::IssueCredential, &admin().into()).await,
            Decision::Denied(DenialReason::StoreUninitialized)
        );
        assert_eq!(
            gate.check_authorization(&admin()).await,
            AuthorizationStatus::StoreUninitialized
        );
    }

    #[tokio::test]
    async fn test_unreachable_ledger_denies_as_uninitialized() {
        let (sandbox, gate) = setup(true).await;
        sandbox.set_unreachable(true);
        assert!(matches!(
            gate.require(Action::IssueCredential, &admin().into()).await,
            Err(CredentialError::AuthorizationDenied(DenialReason::StoreUninitialized))
        ));
    }

    #[tokio::test]
    async fn test_missing_credential_cannot_be_revoked() {
        let (_, gate) = setup(true).await;
        assert_eq!(
            gate.can_perform(Action::RevokeCredential { token_id: 99 }, &admin().into()).await,
            Decision::Denied(DenialReason::CredentialNotFound)
        );
    }

    #[test]
    fn test_revocation_requires_recorded_issuer() {
        let issuer = Address::parse("0xA1").unwrap();
        assert!(revocation_decision(&issuer, &CallerIdentity::new(issuer)).is_allowed());
        assert_eq!(
            revocation_decision(&issuer, &CallerIdentity::new(admin())),
            Decision::Denied(DenialReason::NotIssuer)
        );
    }
}
