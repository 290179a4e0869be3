//! CLI login handoff: single-use codes redeemable for a signed token.
//!
//! The browser mints a short-lived code while logged in; the CLI posts it
//! back and receives a stateless bearer token. Codes are deleted in the same
//! statement that redeems them, so a code can be exchanged at most once.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::{
    principal::RequireAuth,
    secrets::hash_token,
    state::AuthState,
    storage::{create_auth_code, exchange_auth_code},
    token,
    types::{CliCodeResponse, CliExchangeRequest, CliExchangeResponse},
};

#[utoipa::path(
    post,
    path = "/auth/cli/code",
    responses(
        (status = 200, description = "Single-use login code minted", body = CliCodeResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn create_code(
    RequireAuth(identity): RequireAuth,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let ttl = auth_state.config().auth_code_ttl_seconds();
    match create_auth_code(&pool, identity.id, ttl).await {
        Ok(code) => (
            StatusCode::OK,
            Json(CliCodeResponse {
                code,
                expires_in: ttl,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to mint CLI login code: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/cli/exchange",
    request_body = CliExchangeRequest,
    responses(
        (status = 200, description = "Code redeemed for a signed token", body = CliExchangeResponse),
        (status = 401, description = "Code unknown, expired, or already used")
    ),
    tag = "auth"
)]
pub async fn exchange(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<CliExchangeRequest>,
) -> impl IntoResponse {
    let code_hash = hash_token(payload.code.trim());
    let user = match exchange_auth_code(&pool, &code_hash).await {
        Ok(Some(user)) => user,
        // Unknown and already-redeemed codes are indistinguishable on purpose.
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to exchange CLI login code: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let ttl = auth_state.config().session_ttl_seconds();
    match token::issue(
        auth_state.config().token_secret(),
        user.user_id,
        &user.login,
        ttl,
    ) {
        Ok(signed) => (
            StatusCode::OK,
            Json(CliExchangeResponse {
                token: signed,
                login: user.login,
                expires_in: ttl,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to sign CLI token: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
