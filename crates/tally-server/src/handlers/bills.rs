//! Bill collapse handler

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    Json,
};

use crate::{get_user_email, AppError, AppState};
use tally_core::models::CollapseResult;

/// POST /api/bills/:id/collapse - Restore an expanded bill to its aggregate form
pub async fn collapse_bill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<CollapseResult>, AppError> {
    let user_email = get_user_email(request.headers());

    let result = state.db.collapse_bill(id).map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "collapse",
        Some("transaction"),
        Some(id),
        Some(&format!(
            "cycle={}, restored={}, deleted={}",
            result.billing_cycle, result.restored_amount, result.deleted_transaction_count
        )),
    )?;

    Ok(Json(result))
}
