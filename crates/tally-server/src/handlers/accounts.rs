//! Account management handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    Json,
};
use serde::Deserialize;

use super::read_json;
use crate::{get_user_email, AppError, AppState};
use tally_core::models::Account;

/// Request body for creating an account
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(default)]
    pub issuer: Option<String>,
}

/// GET /api/accounts - List all accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Vec<Account>>, AppError> {
    let user_email = get_user_email(request.headers());

    let accounts = state.db.list_accounts()?;

    // Audit log - read access
    state.db.log_audit(
        &user_email,
        "list",
        Some("account"),
        None,
        Some(&format!("count={}", accounts.len())),
    )?;

    Ok(Json(accounts))
}

/// POST /api/accounts - Create (or look up) an account by name
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Account>, AppError> {
    let user_email = get_user_email(request.headers());
    let req: CreateAccountRequest = read_json(request).await?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Account name is required"));
    }

    let account_id = state.db.upsert_account(name, req.issuer.as_deref())?;

    state.db.log_audit(
        &user_email,
        "create",
        Some("account"),
        Some(account_id),
        Some(&format!("name={}", name)),
    )?;

    let account = state
        .db
        .get_account(account_id)?
        .ok_or_else(|| AppError::internal("Account not found after creation"))?;

    Ok(Json(account))
}

/// GET /api/accounts/:id - Get a single account
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<Account>, AppError> {
    let user_email = get_user_email(request.headers());

    let account = state
        .db
        .get_account(id)?
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", id)))?;

    state
        .db
        .log_audit(&user_email, "get", Some("account"), Some(id), None)?;

    Ok(Json(account))
}
