use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::chain::ReviewerId;
use super::domain::{Decision, LinkToken};
use super::orchestrator::{ApprovalError, ApprovalOrchestrator};
use super::repository::{ApprovalStatusStore, ChainStore, LinkStore, StoreError};

/// Router builder exposing the reviewer decision endpoint, the owner status
/// view, and the admin chain management surface.
pub fn approval_router<C, S, L>(orchestrator: Arc<ApprovalOrchestrator<C, S, L>>) -> Router
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/share-links/:token/decisions",
            post(decision_handler::<C, S, L>),
        )
        .route(
            "/api/v1/share-links/:token/approval",
            get(owner_status_handler::<C, S, L>),
        )
        .route(
            "/api/v1/admin/share-links/:token/approval",
            get(approval_info_handler::<C, S, L>),
        )
        .route(
            "/api/v1/admin/approval-chains",
            get(department_chain_count_handler::<C, S, L>)
                .put(replace_department_chains_handler::<C, S, L>),
        )
        .route(
            "/api/v1/admin/user-approval-chains/:user",
            put(replace_user_chain_handler::<C, S, L>)
                .get(user_chain_handler::<C, S, L>)
                .delete(delete_user_chain_handler::<C, S, L>),
        )
        .with_state(orchestrator)
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    pub reviewer: String,
    pub decision: Decision,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChainBatchRequest {
    /// Entries of the form `department<->chain-text`.
    pub chains: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserChainRequest {
    pub chain: String,
}

pub(crate) async fn decision_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
    Path(token): Path<String>,
    axum::Json(request): axum::Json<DecisionRequest>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    let token = LinkToken(token);
    let reviewer = ReviewerId::new(&request.reviewer);

    // Human reviewers only pass or veto; the high-risk verdict belongs to
    // the scanner.
    if request.decision == Decision::BlockHighRisk {
        let payload = json!({ "error": "decision must be 'pass' or 'veto'" });
        return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
    }

    match orchestrator.is_reviewer(&reviewer) {
        Ok(true) => {}
        Ok(false) => {
            let payload = json!({ "error": "not a reviewer" });
            return (StatusCode::FORBIDDEN, axum::Json(payload)).into_response();
        }
        Err(err) => return approval_error_response(err),
    }

    match orchestrator.on_reviewer_decision(&token, &reviewer, request.decision, Utc::now()) {
        Ok(outcome) => {
            let payload = json!({
                "token": token.0,
                "outcome": outcome.label(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => approval_error_response(err),
    }
}

pub(crate) async fn owner_status_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
    Path(token): Path<String>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    let token = LinkToken(token);
    match orchestrator.owner_view(&token) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => approval_error_response(err),
    }
}

pub(crate) async fn approval_info_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
    Path(token): Path<String>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    let token = LinkToken(token);
    match orchestrator.approval_info(&token) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => approval_error_response(err),
    }
}

pub(crate) async fn department_chain_count_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    match orchestrator.department_count() {
        Ok(count) => (StatusCode::OK, axum::Json(json!({ "count": count }))).into_response(),
        Err(err) => approval_error_response(err),
    }
}

/// Replace department chains in batch. Entries that fail to parse or name
/// unresolvable users land in `failed`; they are reported, never silently
/// dropped.
pub(crate) async fn replace_department_chains_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
    axum::Json(request): axum::Json<ChainBatchRequest>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    if request.chains.is_empty() {
        let payload = json!({ "error": "chains must not be empty" });
        return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
    }

    let mut success = Vec::new();
    let mut failed = Vec::new();

    for entry in &request.chains {
        let Some((department, chain_text)) = split_chain_entry(entry) else {
            failed.push(entry.clone());
            continue;
        };

        match orchestrator.replace_department_chain(department, chain_text) {
            Ok(_) => success.push(entry.clone()),
            Err(ApprovalError::Chain(_)) => failed.push(entry.clone()),
            Err(err) => return approval_error_response(err),
        }
    }

    let payload = json!({ "success": success, "failed": failed });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn replace_user_chain_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
    Path(user): Path<String>,
    axum::Json(request): axum::Json<UserChainRequest>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    match orchestrator.replace_user_chain(&user, &request.chain) {
        Ok(chain) => {
            let payload = json!({
                "user": user,
                "chain": chain.serialize(false, orchestrator.directory()),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => approval_error_response(err),
    }
}

pub(crate) async fn user_chain_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
    Path(user): Path<String>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    match orchestrator.user_chain(&user) {
        Ok(Some(chain)) => {
            let payload = json!({
                "user": user,
                "chain": chain.serialize(false, orchestrator.directory()),
                "display": chain.serialize(true, orchestrator.directory()),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(None) => {
            let payload = json!({ "error": "chain not found" });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(err) => approval_error_response(err),
    }
}

pub(crate) async fn delete_user_chain_handler<C, S, L>(
    State(orchestrator): State<Arc<ApprovalOrchestrator<C, S, L>>>,
    Path(user): Path<String>,
) -> Response
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    match orchestrator.delete_user_chain(&user) {
        Ok(true) => (StatusCode::OK, axum::Json(json!({ "success": true }))).into_response(),
        Ok(false) => {
            let payload = json!({ "error": "chain not found" });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(err) => approval_error_response(err),
    }
}

fn split_chain_entry(entry: &str) -> Option<(&str, &str)> {
    let (department, chain) = entry.split_once("<->")?;
    let department = department.trim();
    let chain = chain.trim();
    if department.is_empty() || chain.is_empty() {
        return None;
    }
    Some((department, chain))
}

fn approval_error_response(err: ApprovalError) -> Response {
    let status = match &err {
        ApprovalError::UnknownLink(_) => StatusCode::NOT_FOUND,
        ApprovalError::UnknownReviewer { .. } => StatusCode::FORBIDDEN,
        ApprovalError::Conflict(_) => StatusCode::CONFLICT,
        ApprovalError::DuplicateSeed(_) => StatusCode::CONFLICT,
        ApprovalError::Chain(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ApprovalError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
        ApprovalError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({ "error": err.to_string() });
    (status, axum::Json(payload)).into_response()
}
