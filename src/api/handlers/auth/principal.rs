//! Authenticated identity extraction and authorization helpers.
//!
//! Flow Overview: pick one credential string off the request, resolve it
//! through the verification chain, and hand downstream handlers an
//! [`Identity`]. Ownership checks stay in the mutating handlers; the gate
//! only proves who is calling.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::resolver::{extract_credential, resolve};
use super::state::AuthState;

/// Named permission restricting an API key's capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Publish,
    Delete,
}

impl Scope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Publish => "publish",
            Self::Delete => "delete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "read" => Some(Self::Read),
            "publish" => Some(Self::Publish),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Parse a stored comma-separated scope list. Unknown names are dropped.
pub(crate) fn parse_scopes(stored: &str) -> Vec<Scope> {
    stored.split(',').filter_map(Scope::parse).collect()
}

/// Authenticated caller, resolved from any of the three credential types.
///
/// `scopes` is `None` for session and signed-token logins, which are fully
/// privileged; API keys carry their explicit list.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub login: String,
    pub scopes: Option<Vec<Scope>>,
}

impl Identity {
    /// Whether this identity may perform an operation guarded by `scope`.
    ///
    /// Absence of a scope list means every scope is implicitly granted.
    #[must_use]
    pub fn has_scope(&self, scope: Scope) -> bool {
        match &self.scopes {
            None => true,
            Some(scopes) => scopes.contains(&scope),
        }
    }
}

/// Extractor that rejects unauthenticated requests with 401.
#[derive(Debug, Clone)]
pub struct RequireAuth(pub Identity);

/// Extractor for routes that adapt to an optional identity.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<Identity>);

async fn resolve_from_parts(parts: &Parts) -> Result<Option<Identity>, StatusCode> {
    let pool = parts.extensions.get::<PgPool>().cloned().ok_or_else(|| {
        error!("Database pool missing from request extensions");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let auth_state = parts
        .extensions
        .get::<Arc<AuthState>>()
        .cloned()
        .ok_or_else(|| {
            error!("Auth state missing from request extensions");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let Some(credential) = extract_credential(&parts.headers, parts.uri.query()) else {
        return Ok(None);
    };

    Ok(resolve(&pool, &auth_state, &credential).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match resolve_from_parts(parts).await? {
            Some(identity) => Ok(Self(identity)),
            None => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Resolution failures degrade to "not authenticated" here; optional
        // routes must not 500 because an extension was missing in tests.
        Ok(Self(resolve_from_parts(parts).await.unwrap_or(None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(scopes: Option<Vec<Scope>>) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            login: "octocat".to_string(),
            scopes,
        }
    }

    #[test]
    fn no_scope_list_grants_everything() {
        let identity = identity(None);
        assert!(identity.has_scope(Scope::Read));
        assert!(identity.has_scope(Scope::Publish));
        assert!(identity.has_scope(Scope::Delete));
    }

    #[test]
    fn explicit_scopes_restrict() {
        let identity = identity(Some(vec![Scope::Read]));
        assert!(identity.has_scope(Scope::Read));
        assert!(!identity.has_scope(Scope::Publish));
        assert!(!identity.has_scope(Scope::Delete));
    }

    #[test]
    fn default_stored_scope_list_grants_everything() {
        let identity = identity(Some(parse_scopes("read,publish,delete")));
        assert!(identity.has_scope(Scope::Read));
        assert!(identity.has_scope(Scope::Publish));
        assert!(identity.has_scope(Scope::Delete));
    }

    #[test]
    fn parse_scopes_trims_and_drops_unknown() {
        assert_eq!(
            parse_scopes(" read , publish ,unknown"),
            vec![Scope::Read, Scope::Publish]
        );
        assert!(parse_scopes("").is_empty());
    }

    #[test]
    fn scope_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Scope::Publish).expect("json"),
            serde_json::json!("publish")
        );
        assert_eq!(Scope::Delete.as_str(), "delete");
    }
}
