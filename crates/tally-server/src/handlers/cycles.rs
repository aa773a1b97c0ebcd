//! Billing cycle handlers: preview, import-and-link, listings and link control

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    Json,
};
use serde::Deserialize;

use super::{clamp_page, read_json, PageQuery};
use crate::{get_user_email, AppError, AppState};
use tally_core::models::{
    CollapseResult, ConfirmedMatch, CycleDetail, CycleImport, CyclePage, ImportAndLinkResult,
    ImportPreview, LinkResult, MatchCandidate, Selection, SelectionOutcome,
};
use tally_core::Reconciler;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub cycles: Vec<CycleImport>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub cycles: Vec<CycleImport>,
    #[serde(default)]
    pub confirmed_matches: Vec<ConfirmedMatch>,
    /// Leave cycles without a confirmed match unregistered
    #[serde(default)]
    pub skip_unmatched: bool,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub account_id: i64,
    pub billing_cycle: String,
    pub bill_id: i64,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnlinkRequest {
    pub account_id: i64,
    pub billing_cycle: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub account_id: i64,
    pub billing_cycle: String,
    pub bill_id: Option<i64>,
    #[serde(default)]
    pub keep_pending: bool,
    #[serde(default)]
    pub force: bool,
}

fn reconciler(state: &AppState) -> Reconciler<'_> {
    Reconciler::with_config(&state.db, state.reconcile.clone())
}

/// POST /api/cycles/preview - Score candidate bills without touching state
pub async fn preview_import(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<ImportPreview>, AppError> {
    let user_email = get_user_email(request.headers());
    let req: PreviewRequest = read_json(request).await?;

    let preview = reconciler(&state)
        .preview_import(&req.cycles)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "preview",
        Some("billing_cycle"),
        None,
        Some(&format!(
            "cycles={}, unmatched={}",
            req.cycles.len(),
            preview.unmatched_count
        )),
    )?;

    Ok(Json(preview))
}

/// POST /api/cycles/import - Register cycles and expand confirmed matches atomically
pub async fn import_and_link(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<ImportAndLinkResult>, AppError> {
    let user_email = get_user_email(request.headers());
    let req: ImportRequest = read_json(request).await?;

    let result = reconciler(&state)
        .import_and_link(&req.cycles, &req.confirmed_matches, req.skip_unmatched)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "import",
        Some("billing_cycle"),
        None,
        Some(&format!(
            "imported={}, matched={}, unmatched={}",
            result.imported_count, result.matched_count, result.unmatched_count
        )),
    )?;

    Ok(Json(result))
}

/// GET /api/cycles/pending - Cycles not yet linked, with summary
pub async fn list_pending_cycles(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
    request: Request,
) -> Result<Json<CyclePage>, AppError> {
    let user_email = get_user_email(request.headers());
    let (limit, offset) = clamp_page(params.limit, params.offset);

    let page = state.db.list_pending_cycles(limit, offset)?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("billing_cycle"),
        None,
        Some(&format!("status=pending, count={}", page.cycles.len())),
    )?;

    Ok(Json(page))
}

/// GET /api/cycles/linked - Linked cycles, with mismatch summary
pub async fn list_linked_cycles(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
    request: Request,
) -> Result<Json<CyclePage>, AppError> {
    let user_email = get_user_email(request.headers());
    let (limit, offset) = clamp_page(params.limit, params.offset);

    let page = state.db.list_linked_cycles(limit, offset)?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("billing_cycle"),
        None,
        Some(&format!("status=linked, count={}", page.cycles.len())),
    )?;

    Ok(Json(page))
}

/// GET /api/cycles/:account_id/:cycle - A cycle with its stored lines
pub async fn get_cycle(
    State(state): State<Arc<AppState>>,
    Path((account_id, billing_cycle)): Path<(i64, String)>,
    request: Request,
) -> Result<Json<CycleDetail>, AppError> {
    let user_email = get_user_email(request.headers());

    let detail = state
        .db
        .get_cycle_detail(account_id, &billing_cycle)?
        .ok_or_else(|| {
            AppError::not_found(&format!(
                "Billing cycle {} not found for account {}",
                billing_cycle, account_id
            ))
        })?;

    state.db.log_audit(
        &user_email,
        "get",
        Some("billing_cycle"),
        Some(detail.cycle.id),
        None,
    )?;

    Ok(Json(detail))
}

/// GET /api/cycles/:account_id/:cycle/candidates - Current ranked candidates
pub async fn get_cycle_candidates(
    State(state): State<Arc<AppState>>,
    Path((account_id, billing_cycle)): Path<(i64, String)>,
    request: Request,
) -> Result<Json<Vec<MatchCandidate>>, AppError> {
    let user_email = get_user_email(request.headers());

    let candidates = reconciler(&state)
        .candidates_for(account_id, &billing_cycle)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "candidates",
        Some("billing_cycle"),
        None,
        Some(&format!(
            "account_id={}, cycle={}, count={}",
            account_id,
            billing_cycle,
            candidates.len()
        )),
    )?;

    Ok(Json(candidates))
}

/// POST /api/cycles/link - Manually link a cycle to a bill
pub async fn link_cycle(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<LinkResult>, AppError> {
    let user_email = get_user_email(request.headers());
    let req: LinkRequest = read_json(request).await?;

    let result = reconciler(&state)
        .link(req.account_id, &req.billing_cycle, req.bill_id, req.force)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "link",
        Some("billing_cycle"),
        Some(req.bill_id),
        Some(&format!(
            "account_id={}, cycle={}, difference={}, forced={}",
            req.account_id, req.billing_cycle, result.amount_difference, result.forced
        )),
    )?;

    Ok(Json(result))
}

/// POST /api/cycles/unlink - Collapse the bill linked to a cycle
pub async fn unlink_cycle(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<CollapseResult>, AppError> {
    let user_email = get_user_email(request.headers());
    let req: UnlinkRequest = read_json(request).await?;

    let result = reconciler(&state)
        .unlink(req.account_id, &req.billing_cycle)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "unlink",
        Some("billing_cycle"),
        Some(result.transaction_id),
        Some(&format!(
            "account_id={}, cycle={}, deleted={}",
            req.account_id, req.billing_cycle, result.deleted_transaction_count
        )),
    )?;

    Ok(Json(result))
}

/// POST /api/cycles/select - Resolve a cycle awaiting selection
pub async fn select_for_cycle(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<SelectionOutcome>, AppError> {
    let user_email = get_user_email(request.headers());
    let req: SelectRequest = read_json(request).await?;

    let selection = match (req.bill_id, req.keep_pending) {
        (Some(_), true) => {
            return Err(AppError::bad_request(
                "Provide either bill_id or keep_pending, not both",
            ))
        }
        (Some(id), false) => Selection::Bill(id),
        (None, true) => Selection::KeepPending,
        (None, false) => return Err(AppError::bad_request("bill_id or keep_pending is required")),
    };

    let outcome = reconciler(&state)
        .select(req.account_id, &req.billing_cycle, selection, req.force)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "select",
        Some("billing_cycle"),
        req.bill_id,
        Some(&format!(
            "account_id={}, cycle={}, keep_pending={}",
            req.account_id, req.billing_cycle, req.keep_pending
        )),
    )?;

    Ok(Json(outcome))
}
