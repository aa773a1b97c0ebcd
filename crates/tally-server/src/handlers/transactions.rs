//! Ledger transaction handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{clamp_page, read_json};
use crate::{get_user_email, AppError, AppState};
use tally_core::db::TransactionQuery;
use tally_core::models::{NewTransaction, Transaction};

/// Query parameters for listing transactions
#[derive(Debug, Deserialize)]
pub struct TransactionListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub account_id: Option<i64>,
    pub billing_cycle: Option<String>,
    /// Itemized rows of one expanded bill
    pub bill_id: Option<i64>,
    #[serde(default)]
    pub include_hidden: bool,
}

fn default_limit() -> i64 {
    50
}

/// Response for transaction list with pagination info
#[derive(Serialize)]
pub struct TransactionResponse {
    pub transactions: Vec<Transaction>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /api/transactions - List ledger transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionListQuery>,
    request: Request,
) -> Result<Json<TransactionResponse>, AppError> {
    let user_email = get_user_email(request.headers());
    let (limit, offset) = clamp_page(params.limit, params.offset);

    let query = TransactionQuery {
        account_id: params.account_id,
        billing_cycle: params.billing_cycle,
        credit_card_payment_id: params.bill_id,
        include_hidden: params.include_hidden,
        limit,
        offset,
    };

    let transactions = state.db.list_transactions(&query)?;
    let total = state.db.count_transactions(&query)?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("transaction"),
        None,
        Some(&format!("count={}, total={}", transactions.len(), total)),
    )?;

    Ok(Json(TransactionResponse {
        transactions,
        total,
        limit,
        offset,
    }))
}

/// POST /api/transactions - Record a ledger transaction (e.g. a card bill payment)
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Transaction>, AppError> {
    let user_email = get_user_email(request.headers());
    let new_tx: NewTransaction = read_json(request).await?;

    let id = state
        .db
        .create_transaction(&new_tx)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "create",
        Some("transaction"),
        Some(id),
        Some(&format!("amount={}, date={}", new_tx.amount, new_tx.date)),
    )?;

    let transaction = state
        .db
        .get_transaction(id)?
        .ok_or_else(|| AppError::internal("Transaction not found after creation"))?;

    Ok(Json(transaction))
}

/// GET /api/transactions/:id
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<Transaction>, AppError> {
    let user_email = get_user_email(request.headers());

    let transaction = state
        .db
        .get_transaction(id)?
        .ok_or_else(|| AppError::not_found(&format!("Transaction {} not found", id)))?;

    state
        .db
        .log_audit(&user_email, "get", Some("transaction"), Some(id), None)?;

    Ok(Json(transaction))
}
