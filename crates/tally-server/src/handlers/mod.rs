//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod accounts;
pub mod audit;
pub mod auth;
pub mod bills;
pub mod categories;
pub mod cycles;
pub mod reconcile;
pub mod statements;
pub mod transactions;

// Re-export all handlers for use in router
pub use accounts::*;
pub use audit::*;
pub use auth::*;
pub use bills::*;
pub use categories::*;
pub use cycles::*;
pub use reconcile::*;
pub use statements::*;
pub use transactions::*;

use axum::extract::Request;
use serde::de::DeserializeOwned;

use crate::{AppError, MAX_JSON_BODY};

/// Read and decode a JSON request body
pub(crate) async fn read_json<T: DeserializeOwned>(request: Request) -> Result<T, AppError> {
    let bytes = axum::body::to_bytes(request.into_body(), MAX_JSON_BODY)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    serde_json::from_slice(&bytes).map_err(|e| AppError::bad_request(&format!("Invalid JSON: {}", e)))
}

/// Clamp caller-supplied pagination
pub(crate) fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(1, crate::MAX_PAGE_LIMIT), offset.max(0))
}

fn default_limit() -> i64 {
    50
}

/// Query parameters for paginated listings
#[derive(Debug, serde::Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
