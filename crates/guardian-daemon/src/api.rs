//! The API server (component D.2): token register/revoke/list, localhost.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use guardian_core::{GuardianError, TokenInfo};
use serde::{Deserialize, Serialize};

use crate::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/tokens", post(register).get(list))
        .route("/tokens/:token", axum::routing::delete(revoke))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    cloister: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    worktree: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    token: String,
}

async fn register(
    State(state): State<SharedState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let token = state.tokens.register(body.cloister, body.project, body.worktree)?;
    Ok(Json(RegisterResponse { token }))
}

async fn revoke(State(state): State<SharedState>, Path(token): Path<String>) -> Result<StatusCode, ApiError> {
    let removed = state.tokens.revoke(&token)?;
    if removed.is_none() {
        return Err(ApiError(GuardianError::NotFound(format!("unknown token: {token}"))));
    }
    state.policy.clear_session(&token);
    Ok(StatusCode::NO_CONTENT)
}

async fn list(State(state): State<SharedState>) -> Json<Vec<TokenInfo>> {
    Json(state.tokens.list().into_values().collect())
}

/// Wraps [`GuardianError`] for this server's status-code mapping (§7:
/// auth failures surface as 401 here, unlike the proxy's 407).
struct ApiError(GuardianError);

impl From<GuardianError> for ApiError {
    fn from(e: GuardianError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GuardianError::Auth => StatusCode::UNAUTHORIZED,
            GuardianError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GuardianError::NotFound(_) => StatusCode::NOT_FOUND,
            GuardianError::PolicyDenied { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}
