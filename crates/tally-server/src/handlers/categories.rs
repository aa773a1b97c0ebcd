//! Category catalog handlers

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    Json,
};
use serde::Deserialize;

use super::read_json;
use crate::{get_user_email, AppError, AppState};
use tally_core::models::{Category, CategoryKind};

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub kind: String,
}

/// GET /api/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Vec<Category>>, AppError> {
    let user_email = get_user_email(request.headers());

    let categories = state.db.list_categories()?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("category"),
        None,
        Some(&format!("count={}", categories.len())),
    )?;

    Ok(Json(categories))
}

/// POST /api/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Category>, AppError> {
    let user_email = get_user_email(request.headers());
    let req: CreateCategoryRequest = read_json(request).await?;

    let kind: CategoryKind = req
        .kind
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;

    let id = state
        .db
        .create_category(&req.name, kind)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "create",
        Some("category"),
        Some(id),
        Some(&format!("name={}, kind={}", req.name, kind)),
    )?;

    let category = state
        .db
        .get_category(id)?
        .ok_or_else(|| AppError::internal("Category not found after creation"))?;

    Ok(Json(category))
}
