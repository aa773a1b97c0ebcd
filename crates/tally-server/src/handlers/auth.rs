//! Authentication-related handlers

use axum::extract::Request;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::{get_user_email, AppState};

/// Response for the /api/me endpoint
#[derive(Serialize)]
pub struct MeResponse {
    /// The authenticated caller's identifier
    pub user: String,
    /// How the caller was authenticated
    pub auth_method: String,
}

/// Get the currently authenticated caller
pub async fn get_me(State(state): State<Arc<AppState>>, request: Request) -> Json<MeResponse> {
    let user = get_user_email(request.headers());

    let auth_method = if !state.config.require_auth {
        "none"
    } else if user == "api-key" {
        "api_key"
    } else {
        "unknown"
    };

    Json(MeResponse {
        user,
        auth_method: auth_method.to_string(),
    })
}
