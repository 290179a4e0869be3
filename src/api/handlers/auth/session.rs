//! Session endpoints and cookie construction.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::{
    resolver::{read_cookie, session_cookie_name},
    secrets::hash_token,
    state::{AuthConfig, AuthState},
    storage::delete_session,
    types::StatusResponse,
};
use crate::api::handlers::auth::principal::OptionalAuth;
use crate::api::handlers::users::fetch_user_by_id;

const STATE_COOKIE_NAME: &str = "oauth_state";

#[utoipa::path(
    get,
    path = "/auth/status",
    responses(
        (status = 200, description = "Authentication state of the caller", body = StatusResponse)
    ),
    tag = "auth"
)]
pub async fn status(auth: OptionalAuth, pool: Extension<PgPool>) -> impl IntoResponse {
    let Some(identity) = auth.0 else {
        return Json(StatusResponse {
            authenticated: false,
            user: None,
        })
        .into_response();
    };

    match fetch_user_by_id(&pool, identity.id).await {
        Ok(user) => Json(StatusResponse {
            authenticated: user.is_some(),
            user,
        })
        .into_response(),
        Err(err) => {
            error!("Failed to load user for status: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_token(&token);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    read_cookie(headers, session_cookie_name())
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Build the secure `HttpOnly` cookie carrying the session token.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}",
        session_cookie_name()
    );
    append_attributes(&mut cookie, config);
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        session_cookie_name()
    );
    append_attributes(&mut cookie, config);
    HeaderValue::from_str(&cookie)
}

/// Short-lived CSRF-state cookie for the OAuth round trip.
pub(super) fn state_cookie(
    config: &AuthConfig,
    value: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.state_ttl_seconds();
    let mut cookie =
        format!("{STATE_COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_state_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{STATE_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn read_state_cookie(headers: &HeaderMap) -> Option<String> {
    read_cookie(headers, STATE_COOKIE_NAME)
}

fn append_attributes(cookie: &mut String, config: &AuthConfig) {
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
}
