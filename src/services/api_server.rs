// src/services/api_server.rs
//! HTTP API for the credential lifecycle.
//!
//! Thin axum layer over the orchestrators. Every mutating request names its
//! caller explicitly in the body; there is no session or ambient wallet.
//! Index-backed listing endpoints are convenience reads only and never feed
//! an authorization decision.
//!
//! Errors are returned as `{ "error": { "code", "message" } }`.

use crate::blockchain::signer::AbortSignal;
use crate::error::{CredentialError, DenialReason, ErrorDetail, FailureKind};
use crate::index::CredentialIndex;
use crate::models::{Address, AttemptResult, CallerIdentity, IssueCredentialRequest, RevokeResult};
use crate::services::admin::AdminService;
use crate::services::authorization::AuthorizationGate;
use crate::services::credential_issuer::CredentialIssuer;
use crate::services::reconciler::{ReconcileScope, Reconciler};
use crate::services::revocation::RevocationOrchestrator;
use crate::services::verifier::Verifier;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

// API request and response structures

/// Caller identity as carried in request bodies.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallerBody {
    pub caller: Address,
    #[serde(default)]
    pub principal: Option<String>,
}

impl CallerBody {
    fn identity(&self) -> CallerIdentity {
        CallerIdentity {
            address: self.caller,
            principal: self.principal.clone(),
        }
    }
}

/// Request payload for issuing a credential
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueCredentialBody {
    #[serde(flatten)]
    pub caller: CallerBody,
    /// Credential file, base64-encoded.
    pub artifact_base64: String,
    #[serde(flatten)]
    pub request: IssueCredentialRequest,
}

/// Request payload for authorizing an issuer
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeIssuerBody {
    #[serde(flatten)]
    pub caller: CallerBody,
    pub issuer: Address,
    #[serde(default)]
    pub institution_id: Option<String>,
}

#[derive(Serialize)]
struct AuthorizationResponse {
    address: Address,
    status: crate::models::AuthorizationStatus,
}

#[derive(Serialize)]
struct InitializeResponse {
    tx_hash: String,
}

/// Handler error, rendered as a JSON error body.
#[derive(Debug)]
pub enum AppError {
    Credential(CredentialError),
    NotFound(String),
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::Credential(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Credential(err) => {
                let status = match &err {
                    CredentialError::AuthorizationDenied(DenialReason::CredentialNotFound) => StatusCode::NOT_FOUND,
                    other => status_for(other.kind()),
                };
                (status, code_for(err.kind()), err.to_string())
            }
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
        };
        if status.is_server_error() {
            warn!("request failed with {}: {}", status, message);
        }
        (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
    }
}

fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InputValidation => StatusCode::BAD_REQUEST,
        FailureKind::AuthorizationDenied => StatusCode::FORBIDDEN,
        FailureKind::Conflict
        | FailureKind::SigningRejected
        | FailureKind::Aborted
        | FailureKind::LedgerRejected => StatusCode::CONFLICT,
        FailureKind::ConfirmationTimeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::LedgerUnavailable | FailureKind::IndexUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::ContentStore | FailureKind::IndexWriteFailed | FailureKind::SigningAgent => {
            StatusCode::BAD_GATEWAY
        }
        FailureKind::AttemptStore => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn code_for(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::InputValidation => "input_validation",
        FailureKind::ContentStore => "content_store",
        FailureKind::SigningRejected => "signing_rejected",
        FailureKind::Aborted => "aborted",
        FailureKind::ConfirmationTimeout => "confirmation_timeout",
        FailureKind::LedgerRejected => "ledger_rejected",
        FailureKind::LedgerUnavailable => "ledger_unavailable",
        FailureKind::IndexWriteFailed => "index_write_failed",
        FailureKind::IndexUnavailable => "index_unavailable",
        FailureKind::AuthorizationDenied => "authorization_denied",
        FailureKind::SigningAgent => "signing_agent",
        FailureKind::AttemptStore => "attempt_store",
        FailureKind::Conflict => "conflict",
    }
}

/// Status for an attempt that exists: `success` when it went all the way,
/// otherwise derived from the recorded error.
fn attempt_status(result: &AttemptResult, success: StatusCode) -> StatusCode {
    match &result.error {
        None if result.is_indexed() => success,
        None => StatusCode::ACCEPTED,
        Some(ErrorDetail { kind, .. }) => status_for(*kind),
    }
}

fn revoke_status(result: &RevokeResult) -> StatusCode {
    match result {
        RevokeResult::Revoked { .. } | RevokeResult::AlreadyRevoked { .. } => StatusCode::OK,
        RevokeResult::Denied {
            reason: DenialReason::CredentialNotFound,
            ..
        } => StatusCode::NOT_FOUND,
        RevokeResult::Denied { .. } => StatusCode::FORBIDDEN,
        RevokeResult::Failed { error, .. } => status_for(error.kind),
    }
}

fn parse_address(raw: &str) -> Result<Address, AppError> {
    Ok(Address::parse(raw)?)
}

/// API server state containing all service dependencies
pub struct ApiServer {
    /// Issuance saga driver
    credential_issuer: Arc<CredentialIssuer>,

    revocation: Arc<RevocationOrchestrator>,

    /// Store initialization and issuer authorization
    admin: Arc<AdminService>,

    verifier: Arc<Verifier>,

    /// Live ledger authorization checks
    gate: AuthorizationGate,

    reconciler: Arc<Reconciler>,

    /// Index reads for the listing endpoints
    index: Arc<dyn CredentialIndex>,
}

impl ApiServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credential_issuer: CredentialIssuer,
        revocation: RevocationOrchestrator,
        admin: AdminService,
        verifier: Verifier,
        gate: AuthorizationGate,
        reconciler: Arc<Reconciler>,
        index: Arc<dyn CredentialIndex>,
    ) -> Self {
        ApiServer {
            credential_issuer: Arc::new(credential_issuer),
            revocation: Arc::new(revocation),
            admin: Arc::new(admin),
            verifier: Arc::new(verifier),
            gate,
            reconciler,
            index,
        }
    }

    /// Builds the router with all API routes.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(Self::health_handler))
            .route("/authorization/:address", get(Self::authorization_handler))
            .route("/credentials", post(Self::issue_credential_handler))
            .route("/credentials/attempts/:attempt_id", get(Self::attempt_handler))
            .route("/credentials/attempts/:attempt_id/resume", post(Self::resume_handler))
            .route("/credentials/:token_id/revoke", post(Self::revoke_handler))
            .route("/credentials/:token_id/verify", get(Self::verify_handler))
            .route("/students/:address/credentials", get(Self::student_credentials_handler))
            .route("/issuers/:address/credentials", get(Self::issuer_credentials_handler))
            .route("/admin/initialize", post(Self::initialize_handler))
            .route("/admin/issuers", post(Self::authorize_issuer_handler))
            .route("/reconcile", post(Self::reconcile_handler))
            .with_state(self)
    }

    /// Starts the API server and serves until the listener fails.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", addr);
        axum::serve(listener, app).await
    }

    // =====================
    // Status Handlers
    // =====================

    /// # Endpoint
    /// GET /health
    async fn health_handler() -> impl IntoResponse {
        Json(json!({ "status": "ok" }))
    }

    /// Reports whether an address may issue credentials, straight from the ledger.
    ///
    /// # Endpoint
    /// GET /authorization/:address
    ///
    /// # Responses
    /// - 200 OK: `authorized`, `not_authorized`, or `store_uninitialized`
    /// - 400 Bad Request: Malformed address
    async fn authorization_handler(
        Path(address): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> Result<impl IntoResponse, AppError> {
        let address = parse_address(&address)?;
        let status = state.gate.check_authorization(&address).await;
        Ok(Json(AuthorizationResponse { address, status }))
    }

    // =====================
    // Credential Handlers
    // =====================

    /// Issues a credential.
    ///
    /// # Endpoint
    /// POST /credentials
    ///
    /// # Request Body
    /// Credential fields, `caller`, and the artifact as `artifact_base64`
    ///
    /// # Responses
    /// - 201 Created: Credential minted and indexed
    /// - 202 Accepted: Minted, index write still pending
    /// - 400 Bad Request: Invalid input
    /// - 403 Forbidden: Caller may not issue
    /// - other: attempt stopped; body carries the attempt result
    async fn issue_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Json(body): Json<IssueCredentialBody>,
    ) -> Result<impl IntoResponse, AppError> {
        let artifact = base64::decode(body.artifact_base64.trim())
            .map_err(|e| CredentialError::InputValidation(format!("artifact_base64: {e}")))?;
        let mut request = body.request;
        request.artifact = artifact;

        let result = state
            .credential_issuer
            .issue_credential(request, &body.caller.identity(), &AbortSignal::never())
            .await?;
        Ok((attempt_status(&result, StatusCode::CREATED), Json(result)))
    }

    /// # Endpoint
    /// GET /credentials/attempts/:attempt_id
    async fn attempt_handler(
        Path(attempt_id): Path<Uuid>,
        State(state): State<Arc<ApiServer>>,
    ) -> Result<impl IntoResponse, AppError> {
        match state.credential_issuer.attempt(attempt_id).await? {
            Some(attempt) => Ok(Json(attempt)),
            None => Err(AppError::NotFound(format!("attempt {attempt_id} not found"))),
        }
    }

    /// Continues a stopped issuance attempt from its recorded phase.
    ///
    /// # Endpoint
    /// POST /credentials/attempts/:attempt_id/resume
    async fn resume_handler(
        Path(attempt_id): Path<Uuid>,
        State(state): State<Arc<ApiServer>>,
        Json(body): Json<CallerBody>,
    ) -> Result<impl IntoResponse, AppError> {
        let result = state
            .credential_issuer
            .resume_issuance(attempt_id, &body.identity(), &AbortSignal::never())
            .await?;
        Ok((attempt_status(&result, StatusCode::OK), Json(result)))
    }

    /// Revokes a credential. Only its recorded issuer may do so.
    ///
    /// # Endpoint
    /// POST /credentials/:token_id/revoke
    ///
    /// # Responses
    /// - 200 OK: `revoked` or `already_revoked`
    /// - 403 Forbidden: Caller is not the issuer
    /// - 404 Not Found: Unknown token id
    async fn revoke_handler(
        Path(token_id): Path<u64>,
        State(state): State<Arc<ApiServer>>,
        Json(body): Json<CallerBody>,
    ) -> impl IntoResponse {
        let result = state
            .revocation
            .revoke(token_id, &body.identity(), &AbortSignal::never())
            .await;
        (revoke_status(&result), Json(result))
    }

    /// # Endpoint
    /// GET /credentials/:token_id/verify
    async fn verify_handler(
        Path(token_id): Path<u64>,
        State(state): State<Arc<ApiServer>>,
    ) -> Result<impl IntoResponse, AppError> {
        Ok(Json(state.verifier.verify(token_id).await?))
    }

    /// # Endpoint
    /// GET /students/:address/credentials
    async fn student_credentials_handler(
        Path(address): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> Result<impl IntoResponse, AppError> {
        let address = parse_address(&address)?;
        Ok(Json(state.index.credentials_by_student(&address).await?))
    }

    /// # Endpoint
    /// GET /issuers/:address/credentials
    async fn issuer_credentials_handler(
        Path(address): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> Result<impl IntoResponse, AppError> {
        let address = parse_address(&address)?;
        Ok(Json(state.index.credentials_by_issuer(&address).await?))
    }

    // =====================
    // Administration Handlers
    // =====================

    /// Creates the credential store.
    ///
    /// # Endpoint
    /// POST /admin/initialize
    ///
    /// # Responses
    /// - 200 OK: Returns transaction hash
    /// - 409 Conflict: Store already initialized
    async fn initialize_handler(
        State(state): State<Arc<ApiServer>>,
        Json(body): Json<CallerBody>,
    ) -> Result<impl IntoResponse, AppError> {
        let tx_hash = state
            .admin
            .initialize_store(&body.identity(), &AbortSignal::never())
            .await?;
        Ok(Json(InitializeResponse {
            tx_hash: format!("{tx_hash:#x}"),
        }))
    }

    /// Authorizes an issuer. Owner only.
    ///
    /// # Endpoint
    /// POST /admin/issuers
    async fn authorize_issuer_handler(
        State(state): State<Arc<ApiServer>>,
        Json(body): Json<AuthorizeIssuerBody>,
    ) -> Result<impl IntoResponse, AppError> {
        let authorization = state
            .admin
            .authorize_issuer(&body.caller.identity(), body.issuer, body.institution_id, &AbortSignal::never())
            .await?;
        Ok(Json(authorization))
    }

    /// Runs a reconciliation pass now and returns its report.
    ///
    /// # Endpoint
    /// POST /reconcile
    ///
    /// # Request Body
    /// A scope, e.g. `{"scope": "token", "token_id": 7}` or `{"scope": "all_issuers"}`
    async fn reconcile_handler(
        State(state): State<Arc<ApiServer>>,
        Json(scope): Json<ReconcileScope>,
    ) -> impl IntoResponse {
        Json(state.reconciler.reconcile(&scope).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerRejection;
    use axum::body::to_bytes;

    #[test]
    fn test_failures_map_to_distinct_statuses() {
        assert_eq!(status_for(FailureKind::InputValidation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(FailureKind::ConfirmationTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(FailureKind::LedgerRejected), StatusCode::CONFLICT);
        assert_eq!(status_for(FailureKind::IndexWriteFailed), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(FailureKind::LedgerUnavailable), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_error_body_carries_code_and_message() {
        let response = AppError::from(CredentialError::LedgerRejected(LedgerRejection::AlreadyRevoked)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "ledger_rejected");
        assert!(body["error"]["message"].as_str().unwrap().contains("E_ALREADY_REVOKED"));
    }

    #[test]
    fn test_revocation_outcomes_map_to_statuses() {
        let denied = RevokeResult::Denied {
            token_id: 1,
            reason: DenialReason::NotIssuer,
        };
        let missing = RevokeResult::Denied {
            token_id: 1,
            reason: DenialReason::CredentialNotFound,
        };
        let repeated = RevokeResult::AlreadyRevoked {
            token_id: 1,
            revoked_at: None,
        };
        assert_eq!(revoke_status(&denied), StatusCode::FORBIDDEN);
        assert_eq!(revoke_status(&missing), StatusCode::NOT_FOUND);
        assert_eq!(revoke_status(&repeated), StatusCode::OK);
    }
}
