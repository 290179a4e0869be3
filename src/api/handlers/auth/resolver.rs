//! Credential resolution: one extracted string, three verification strategies.
//!
//! Extraction picks exactly one candidate string per request; there is no
//! fallback across extraction sources. A garbage `Authorization` header wins
//! over a valid session cookie and the request resolves unauthenticated.
//! Verification, by contrast, tries every strategy in order until one
//! accepts, so overlapping credential formats degrade gracefully.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use sqlx::PgPool;
use tracing::{debug, warn};

use super::principal::{parse_scopes, Identity};
use super::secrets::{hash_token, verify_secret};
use super::state::AuthState;
use super::{storage, token};

/// Prefix of the public API-key format. Keys embed no lookup id beyond it.
pub(crate) const API_KEY_PREFIX: &str = "rg_";

const SESSION_COOKIE_NAME: &str = "registro_session";

pub(crate) fn session_cookie_name() -> &'static str {
    SESSION_COOKIE_NAME
}

/// Pick the single credential string off a request, if any.
///
/// Order: `Authorization: Bearer x` header, raw `Authorization` value,
/// `token` query parameter, session cookie. First non-empty wins.
pub(crate) fn extract_credential(headers: &HeaderMap, raw_query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let trimmed = value.trim();
        let bearer = trimmed
            .strip_prefix("Bearer ")
            .or_else(|| trimmed.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());
        if let Some(token) = bearer {
            return Some(token.to_string());
        }
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    if let Some(token) = query_token(raw_query) {
        return Some(token);
    }

    read_cookie(headers, SESSION_COOKIE_NAME)
}

fn query_token(raw_query: Option<&str>) -> Option<String> {
    let query = raw_query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, value)| key == "token" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

pub(crate) fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

/// Resolve a credential string to an identity, or `None`.
///
/// Store read errors are logged and treated as "no credential"; a wrong
/// secret and an absent credential are indistinguishable to the caller.
pub(crate) async fn resolve(
    pool: &PgPool,
    auth_state: &AuthState,
    credential: &str,
) -> Option<Identity> {
    if let Some(identity) = try_session(pool, credential).await {
        return Some(identity);
    }

    if let Some(identity) = try_signed_token(auth_state, credential) {
        return Some(identity);
    }

    if let Some(identity) = try_api_key(pool, credential).await {
        return Some(identity);
    }

    debug!("Credential did not resolve through any strategy");
    None
}

/// Strategy 1: server-side session lookup. Full privileges on success.
async fn try_session(pool: &PgPool, credential: &str) -> Option<Identity> {
    let token_hash = hash_token(credential);
    match storage::lookup_session(pool, &token_hash).await {
        Ok(Some(session)) => Some(Identity {
            id: session.user_id,
            login: session.login,
            scopes: None,
        }),
        Ok(None) => None,
        Err(err) => {
            warn!("Session lookup failed during resolution: {err}");
            None
        }
    }
}

/// Strategy 2: stateless signed token. No database hit.
fn try_signed_token(auth_state: &AuthState, credential: &str) -> Option<Identity> {
    token::verify(auth_state.config().token_secret(), credential).map(|claims| Identity {
        id: claims.sub,
        login: claims.login,
        scopes: None,
    })
}

/// Strategy 3: salted-hash API-key verification, gated on the key prefix.
///
/// Linear scan over stored hashes: the key format carries no lookup id, so
/// every candidate must be re-derived and compared.
async fn try_api_key(pool: &PgPool, credential: &str) -> Option<Identity> {
    if !credential.starts_with(API_KEY_PREFIX) {
        return None;
    }

    let candidates = match storage::list_api_key_candidates(pool).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!("API key listing failed during resolution: {err}");
            return None;
        }
    };

    for candidate in candidates {
        if !verify_secret(credential, &candidate.key_hash) {
            continue;
        }

        let login = match storage::fetch_login(pool, candidate.user_id).await {
            Ok(Some(login)) => login,
            Ok(None) => {
                warn!("API key {} references a missing user", candidate.id);
                return None;
            }
            Err(err) => {
                warn!("User lookup failed during API key resolution: {err}");
                return None;
            }
        };

        if let Err(err) = storage::touch_api_key(pool, candidate.id).await {
            warn!("Failed to update api key last_used_at: {err}");
        }

        let scopes = candidate
            .scopes
            .as_deref()
            .map(parse_scopes)
            .unwrap_or_default();
        return Some(Identity {
            id: candidate.user_id,
            login,
            // An empty stored list means the key predates scopes; treat as full access.
            scopes: if scopes.is_empty() { None } else { Some(scopes) },
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: axum::http::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).expect("header value"));
        headers
    }

    #[test]
    fn bearer_header_wins() {
        let headers = headers_with(AUTHORIZATION, "Bearer abc123");
        assert_eq!(
            extract_credential(&headers, Some("token=querytoken")),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn raw_header_value_is_accepted() {
        let headers = headers_with(AUTHORIZATION, "rg_rawkey");
        assert_eq!(
            extract_credential(&headers, None),
            Some("rg_rawkey".to_string())
        );
    }

    #[test]
    fn query_parameter_is_third() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_credential(&headers, Some("page=2&token=fromquery")),
            Some("fromquery".to_string())
        );
    }

    #[test]
    fn cookie_is_last() {
        let headers = headers_with(
            axum::http::header::COOKIE,
            "other=1; registro_session=sess456",
        );
        assert_eq!(
            extract_credential(&headers, None),
            Some("sess456".to_string())
        );
    }

    #[test]
    fn garbage_header_shadows_valid_cookie() {
        // Extraction picks exactly one string: a bad Authorization value is
        // chosen over the session cookie, and resolution will fail outright.
        let mut headers = headers_with(AUTHORIZATION, "garbage");
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("registro_session=validSessionToken"),
        );
        assert_eq!(
            extract_credential(&headers, None),
            Some("garbage".to_string())
        );
    }

    #[test]
    fn nothing_extracts_to_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_credential(&headers, None), None);
        assert_eq!(extract_credential(&headers, Some("page=2")), None);
    }

    #[test]
    fn empty_values_are_skipped() {
        let headers = headers_with(axum::http::header::COOKIE, "registro_session=");
        assert_eq!(extract_credential(&headers, Some("token=")), None);
    }

    #[test]
    fn read_cookie_parses_pairs() {
        let headers = headers_with(
            axum::http::header::COOKIE,
            "a=1; registro_session=tok; b=2",
        );
        assert_eq!(read_cookie(&headers, "registro_session"), Some("tok".to_string()));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }
}
