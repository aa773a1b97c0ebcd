//! Statement upload handler

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    Json,
};
use serde::Deserialize;

use crate::{get_user_email, AppError, AppState, MAX_UPLOAD_SIZE};
use tally_core::models::StatementImport;
use tally_core::Reconciler;

#[derive(Debug, Deserialize)]
pub struct StatementUploadQuery {
    pub account_id: i64,
    /// YYYY-MM; derived from the statement when absent
    pub billing_cycle: Option<String>,
}

/// POST /api/statements - Upload a raw CSV statement for one account
///
/// The body is the statement file itself. Lines are normalized, hashed and
/// registered as a pending cycle; linking happens on the next reconciliation.
pub async fn upload_statement(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatementUploadQuery>,
    request: Request,
) -> Result<Json<StatementImport>, AppError> {
    let user_email = get_user_email(request.headers());

    let bytes = axum::body::to_bytes(request.into_body(), MAX_UPLOAD_SIZE)
        .await
        .map_err(|_| AppError::bad_request("Statement too large or unreadable"))?;
    let content = std::str::from_utf8(&bytes)
        .map_err(|_| AppError::bad_request("Statement must be UTF-8 text"))?;

    let reconciler = Reconciler::with_config(&state.db, state.reconcile.clone());
    let result = reconciler
        .import_statement(params.account_id, content, params.billing_cycle.as_deref())
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "import",
        Some("billing_cycle"),
        Some(result.cycle_id),
        Some(&format!(
            "account_id={}, cycle={}, new={}, duplicates={}",
            result.account_id, result.billing_cycle, result.new_lines, result.duplicate_lines
        )),
    )?;

    Ok(Json(result))
}
