//! Reconciliation pass and integrity check handlers

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{get_user_email, AppError, AppState};
use tally_core::models::{IntegrityIssue, ReconciliationReport};
use tally_core::Reconciler;

#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    /// Limit the pass to one account's cycles
    pub account_id: Option<i64>,
}

/// POST /api/reconcile - Run one reconciliation pass over pending cycles
pub async fn trigger_reconciliation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReconcileQuery>,
    request: Request,
) -> Result<Json<ReconciliationReport>, AppError> {
    let user_email = get_user_email(request.headers());

    let reconciler = Reconciler::with_config(&state.db, state.reconcile.clone());
    let report = reconciler
        .trigger_reconciliation(params.account_id)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "reconcile",
        Some("billing_cycle"),
        None,
        Some(&format!(
            "examined={}, auto_linked={}, requires_selection={}, no_match={}",
            report.summary.examined,
            report.summary.auto_linked,
            report.summary.requires_selection,
            report.summary.no_match
        )),
    )?;

    Ok(Json(report))
}

#[derive(Serialize)]
pub struct IntegrityResponse {
    pub ok: bool,
    pub issues: Vec<IntegrityIssue>,
}

/// GET /api/integrity - Scan expanded bills and links for structural violations
pub async fn check_integrity(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<IntegrityResponse>, AppError> {
    let user_email = get_user_email(request.headers());

    let issues = state.db.check_integrity()?;

    state.db.log_audit(
        &user_email,
        "verify",
        Some("cycle_link"),
        None,
        Some(&format!("issues={}", issues.len())),
    )?;

    Ok(Json(IntegrityResponse {
        ok: issues.is_empty(),
        issues,
    }))
}
