//! GitHub OAuth exchange flow.
//!
//! Flow Overview: mint a CSRF state nonce bound to a short-lived cookie,
//! exchange the callback code for a provider token, fetch the profile,
//! upsert the local user and mint a session. Any failure after the callback
//! aborts the whole attempt; the user restarts from the login route. The
//! analytics enrichment fetch runs detached and can neither delay nor fail
//! the login.

use axum::{
    extract::{Extension, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use super::{
    secrets::random_string,
    session::{clear_state_cookie, read_state_cookie, session_cookie, state_cookie},
    state::{AuthConfig, AuthState},
    storage::{self, ClientMetadata},
    utils::{extract_client_ip, extract_user_agent},
};

const STATE_LEN: usize = 32;

/// Terminal failure states of the exchange flow.
#[derive(Debug)]
pub(super) enum FlowError {
    ConfigurationMissing,
    MissingCode,
    StateMismatch,
    TokenExchange(String),
    ProfileFetch(String),
    Internal(String),
}

impl FlowError {
    fn title(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing => "Configuration Missing",
            Self::MissingCode => "Invalid Request",
            Self::StateMismatch => "Session Expired",
            Self::TokenExchange(_) => "Token Exchange Failed",
            Self::ProfileFetch(_) => "GitHub Profile Error",
            Self::Internal(_) => "Server Error",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing => "GitHub sign-in is not configured on this server.",
            Self::MissingCode => "No authorization code was provided.",
            Self::StateMismatch => "Authentication session expired. Please try again.",
            Self::TokenExchange(_) => "GitHub did not accept the authorization code.",
            Self::ProfileFetch(_) => "Failed to retrieve profile information.",
            Self::Internal(_) => "An unexpected error occurred.",
        }
    }

    /// Operator-facing detail; provider text is shown but never trusted.
    fn detail(&self) -> Option<&str> {
        match self {
            Self::TokenExchange(detail) | Self::ProfileFetch(detail) | Self::Internal(detail) => {
                Some(detail)
            }
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/github",
    responses(
        (status = 303, description = "Redirect to the provider authorize endpoint"),
        (status = 400, description = "OAuth client is not configured")
    ),
    tag = "auth"
)]
pub async fn login(auth_state: Extension<Arc<AuthState>>) -> Response {
    let config = auth_state.config();

    let Some(client_id) = config.github_client_id() else {
        return error_page(config, &FlowError::ConfigurationMissing);
    };

    let mut authorize = match Url::parse(config.authorize_url()) {
        Ok(url) => url,
        Err(err) => {
            error!("Invalid authorize URL in configuration: {err}");
            return error_page(config, &FlowError::ConfigurationMissing);
        }
    };

    let state = random_string(STATE_LEN);
    authorize
        .query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", &config.callback_url())
        .append_pair("scope", "user:email")
        .append_pair("state", &state);

    let mut headers = HeaderMap::new();
    if let Ok(cookie) = state_cookie(config, &state) {
        headers.insert(SET_COOKIE, cookie);
    }

    (headers, Redirect::to(authorize.as_str())).into_response()
}

#[utoipa::path(
    get,
    path = "/auth/github/callback",
    responses(
        (status = 303, description = "Login complete, session cookie set"),
        (status = 400, description = "Exchange failed, error page rendered")
    ),
    tag = "auth"
)]
pub async fn callback(
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let config = auth_state.config();

    // The state cookie is single-use: cleared on every callback outcome.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_state_cookie(config) {
        response_headers.insert(SET_COOKIE, cookie);
    }

    match run_callback(&headers, &params, &pool, &auth_state).await {
        Ok(session_token) => {
            match session_cookie(config, &session_token) {
                Ok(cookie) => {
                    response_headers.append(SET_COOKIE, cookie);
                }
                Err(err) => {
                    error!("Failed to build session cookie: {err}");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
            let destination = format!("{}/dashboard", config.base_url());
            (response_headers, Redirect::to(&destination)).into_response()
        }
        Err(flow_error) => {
            let page = error_page(config, &flow_error);
            (response_headers, page).into_response()
        }
    }
}

/// Drive the exchange to a minted session token or a terminal failure.
///
/// Steps are awaited in strict dependency order: state check, code exchange,
/// profile fetch, upsert, session mint. Nothing is persisted before the
/// profile is confirmed.
async fn run_callback(
    headers: &HeaderMap,
    params: &CallbackParams,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<String, FlowError> {
    let config = auth_state.config();
    let code = validate_callback(params, read_state_cookie(headers).as_deref())?;

    let access_token = exchange_code(auth_state, &code).await?;

    // Email listing is best-effort; the profile fetch is not.
    let (profile, emails) = tokio::join!(
        fetch_profile(auth_state, &access_token),
        fetch_emails(auth_state, &access_token)
    );
    let profile = profile?;
    let emails = emails.unwrap_or_else(|err| {
        debug!("Email listing failed, falling back to profile email: {err}");
        Vec::new()
    });

    let email = pick_email(&emails, profile.email.as_deref());
    let user = storage::upsert_github_user(
        pool,
        profile.id,
        &profile.login,
        profile.name.as_deref().or(Some(profile.login.as_str())),
        profile.avatar_url.as_deref(),
        &email,
    )
    .await
    .map_err(|err| FlowError::Internal(err.to_string()))?;

    let metadata = ClientMetadata {
        ip_address: extract_client_ip(headers),
        user_agent: extract_user_agent(headers),
    };
    let session_token =
        storage::create_session(pool, user.user_id, config.session_ttl_seconds(), &metadata)
            .await
            .map_err(|err| FlowError::Internal(err.to_string()))?;

    spawn_enrichment(
        pool.clone(),
        auth_state.http().clone(),
        config.api_url().to_string(),
        access_token,
        profile.login.clone(),
        user.user_id,
    );

    Ok(session_token)
}

/// Reject callbacks without a code or with a state that does not round-trip.
fn validate_callback(
    params: &CallbackParams,
    cookie_state: Option<&str>,
) -> Result<String, FlowError> {
    let code = params
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or(FlowError::MissingCode)?;

    let state = params.state.as_deref().filter(|state| !state.is_empty());
    // Both values are server-issued nonces; presence and equality suffice.
    match (state, cookie_state) {
        (Some(state), Some(cookie)) if state == cookie => Ok(code.to_string()),
        _ => Err(FlowError::StateMismatch),
    }
}

#[derive(Deserialize, Debug)]
struct TokenExchangeResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(super) struct ProviderProfile {
    pub(super) id: i64,
    pub(super) login: String,
    pub(super) name: Option<String>,
    pub(super) email: Option<String>,
    pub(super) avatar_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(super) struct ProviderEmail {
    pub(super) email: String,
    #[serde(default)]
    pub(super) primary: bool,
    #[serde(default)]
    pub(super) verified: bool,
}

async fn exchange_code(auth_state: &AuthState, code: &str) -> Result<String, FlowError> {
    let config = auth_state.config();
    let client_id = config
        .github_client_id()
        .ok_or(FlowError::ConfigurationMissing)?;
    let client_secret = config
        .github_client_secret()
        .map(|secret| secret.expose_secret().to_string())
        .unwrap_or_default();

    let body = serde_json::json!({
        "client_id": client_id,
        "client_secret": client_secret,
        "code": code,
        "redirect_uri": config.callback_url(),
    });

    let response = auth_state
        .http()
        .post(config.token_url())
        .header(reqwest::header::ACCEPT, "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|err| FlowError::TokenExchange(err.to_string()))?;

    let payload: TokenExchangeResponse = response
        .json()
        .await
        .map_err(|err| FlowError::TokenExchange(err.to_string()))?;

    if let Some(error) = payload.error {
        let detail = payload.error_description.unwrap_or(error);
        return Err(FlowError::TokenExchange(detail));
    }

    payload
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| FlowError::TokenExchange("response carried no access token".to_string()))
}

async fn fetch_profile(
    auth_state: &AuthState,
    access_token: &str,
) -> Result<ProviderProfile, FlowError> {
    let url = format!("{}/user", auth_state.config().api_url());
    let response = auth_state
        .http()
        .get(url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|err| FlowError::ProfileFetch(err.to_string()))?;

    if !response.status().is_success() {
        return Err(FlowError::ProfileFetch(format!(
            "provider returned {}",
            response.status()
        )));
    }

    response
        .json::<ProviderProfile>()
        .await
        .map_err(|err| FlowError::ProfileFetch(err.to_string()))
}

async fn fetch_emails(
    auth_state: &AuthState,
    access_token: &str,
) -> Result<Vec<ProviderEmail>, anyhow::Error> {
    let url = format!("{}/user/emails", auth_state.config().api_url());
    let response = auth_state
        .http()
        .get(url)
        .bearer_auth(access_token)
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("provider returned {}", response.status());
    }

    Ok(response.json::<Vec<ProviderEmail>>().await?)
}

/// Prefer the primary verified email, then the first listed, then the
/// profile's top-level email field.
pub(super) fn pick_email(emails: &[ProviderEmail], profile_email: Option<&str>) -> String {
    if let Some(email) = emails.iter().find(|email| email.primary && email.verified) {
        return email.email.clone();
    }
    if let Some(email) = emails.first() {
        return email.email.clone();
    }
    profile_email.unwrap_or_default().to_string()
}

#[derive(Deserialize, Debug)]
struct ProviderRepo {
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    forks_count: i64,
    language: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub(super) struct LanguageShare {
    pub(super) name: String,
    pub(super) percentage: i64,
}

pub(super) struct Analytics {
    pub(super) stars: i64,
    pub(super) forks: i64,
    pub(super) languages: Vec<LanguageShare>,
}

/// Kick off the best-effort analytics fetch after login.
///
/// Runs detached from the response path; failures are observed only in logs.
fn spawn_enrichment(
    pool: PgPool,
    http: reqwest::Client,
    api_url: String,
    access_token: String,
    login: String,
    user_id: Uuid,
) {
    tokio::spawn(async move {
        let analytics = match fetch_analytics(&http, &api_url, &access_token, &login).await {
            Ok(analytics) => analytics,
            Err(err) => {
                debug!("Analytics enrichment fetch failed for {login}: {err}");
                return;
            }
        };

        let languages_json = match serde_json::to_string(&analytics.languages) {
            Ok(json) => json,
            Err(err) => {
                debug!("Failed to serialize language shares: {err}");
                return;
            }
        };

        if let Err(err) = storage::update_github_analytics(
            &pool,
            user_id,
            analytics.stars,
            analytics.forks,
            &languages_json,
        )
        .await
        {
            debug!("Failed to store analytics snapshot for {login}: {err}");
        }
    });
}

async fn fetch_analytics(
    http: &reqwest::Client,
    api_url: &str,
    access_token: &str,
    login: &str,
) -> Result<Analytics, anyhow::Error> {
    let url = format!("{api_url}/users/{login}/repos?per_page=100");
    let response = http.get(url).bearer_auth(access_token).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("provider returned {}", response.status());
    }

    let repos: Vec<ProviderRepo> = response.json().await?;
    Ok(aggregate_analytics(&repos))
}

fn aggregate_analytics(repos: &[ProviderRepo]) -> Analytics {
    let mut stars = 0;
    let mut forks = 0;
    let mut language_counts: Vec<(String, i64)> = Vec::new();

    for repo in repos {
        stars += repo.stargazers_count;
        forks += repo.forks_count;
        if let Some(language) = &repo.language {
            match language_counts.iter_mut().find(|(name, _)| name == language) {
                Some((_, count)) => *count += 1,
                None => language_counts.push((language.clone(), 1)),
            }
        }
    }

    language_counts.sort_by(|a, b| b.1.cmp(&a.1));
    language_counts.truncate(5);

    let total: i64 = language_counts.iter().map(|(_, count)| count).sum();
    let languages = language_counts
        .into_iter()
        .map(|(name, count)| LanguageShare {
            name,
            percentage: if total > 0 {
                ((count as f64 / total as f64) * 100.0).round() as i64
            } else {
                0
            },
        })
        .collect();

    Analytics {
        stars,
        forks,
        languages,
    }
}

/// Render a terminal flow failure as a user-facing page with a retry action.
fn error_page(config: &AuthConfig, flow_error: &FlowError) -> Response {
    error!(
        "OAuth flow failed: {} ({})",
        flow_error.title(),
        flow_error.detail().unwrap_or("no detail")
    );

    let base = config.base_url();
    let detail_html = flow_error
        .detail()
        .map(|detail| format!("<pre class=\"detail\">{}</pre>", escape_html(detail)))
        .unwrap_or_default();

    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8"><title>Sign-in error - Registro</title>
  <style>
    body {{ font-family: system-ui; background: #0b0b0d; color: #fafafa;
           display: flex; align-items: center; justify-content: center; min-height: 100vh; }}
    .card {{ max-width: 36rem; padding: 2rem; border: 1px solid #2a2a2e; border-radius: 1rem; }}
    .detail {{ color: #f87171; background: #161618; padding: 1rem; overflow-x: auto; }}
    a {{ color: #fafafa; margin-right: 1rem; }}
  </style>
</head>
<body>
  <div class="card">
    <h1>{title}</h1>
    <p>{message}</p>
    {detail_html}
    <p><a href="{base}">Return Home</a><a href="{base}/auth/github">Try Again</a></p>
  </div>
</body>
</html>
"#,
        title = flow_error.title(),
        message = flow_error.message(),
    );

    (StatusCode::BAD_REQUEST, Html(body)).into_response()
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, routing::post, Json, Router};
    use secrecy::SecretString;
    use tokio::net::TcpListener;

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
        }
    }

    #[test]
    fn validate_callback_accepts_matching_state() {
        let result = validate_callback(&params(Some("code123"), Some("stateA")), Some("stateA"));
        assert_eq!(result.expect("code"), "code123");
    }

    #[test]
    fn validate_callback_rejects_missing_code() {
        let result = validate_callback(&params(None, Some("stateA")), Some("stateA"));
        assert!(matches!(result, Err(FlowError::MissingCode)));

        let result = validate_callback(&params(Some(""), Some("stateA")), Some("stateA"));
        assert!(matches!(result, Err(FlowError::MissingCode)));
    }

    #[test]
    fn validate_callback_rejects_state_mismatch() {
        // Mismatched, absent, or cookie-less states all abort before any
        // provider call; no session can be minted from this path.
        let result = validate_callback(&params(Some("code123"), Some("stateA")), Some("stateB"));
        assert!(matches!(result, Err(FlowError::StateMismatch)));

        let result = validate_callback(&params(Some("code123"), None), Some("stateB"));
        assert!(matches!(result, Err(FlowError::StateMismatch)));

        let result = validate_callback(&params(Some("code123"), Some("stateA")), None);
        assert!(matches!(result, Err(FlowError::StateMismatch)));
    }

    #[test]
    fn pick_email_prefers_primary_verified() {
        let emails = vec![
            ProviderEmail {
                email: "first@example.com".to_string(),
                primary: false,
                verified: true,
            },
            ProviderEmail {
                email: "primary@example.com".to_string(),
                primary: true,
                verified: true,
            },
        ];
        assert_eq!(
            pick_email(&emails, Some("profile@example.com")),
            "primary@example.com"
        );
    }

    #[test]
    fn pick_email_falls_back_to_first_then_profile() {
        let emails = vec![ProviderEmail {
            email: "first@example.com".to_string(),
            primary: false,
            verified: false,
        }];
        assert_eq!(pick_email(&emails, None), "first@example.com");
        assert_eq!(
            pick_email(&[], Some("profile@example.com")),
            "profile@example.com"
        );
        assert_eq!(pick_email(&[], None), "");
    }

    #[test]
    fn aggregate_analytics_counts_and_ranks() {
        let repos = vec![
            ProviderRepo {
                stargazers_count: 10,
                forks_count: 2,
                language: Some("Rust".to_string()),
            },
            ProviderRepo {
                stargazers_count: 5,
                forks_count: 1,
                language: Some("Rust".to_string()),
            },
            ProviderRepo {
                stargazers_count: 1,
                forks_count: 0,
                language: Some("Go".to_string()),
            },
            ProviderRepo {
                stargazers_count: 0,
                forks_count: 0,
                language: None,
            },
        ];
        let analytics = aggregate_analytics(&repos);
        assert_eq!(analytics.stars, 16);
        assert_eq!(analytics.forks, 3);
        assert_eq!(
            analytics.languages,
            vec![
                LanguageShare {
                    name: "Rust".to_string(),
                    percentage: 67
                },
                LanguageShare {
                    name: "Go".to_string(),
                    percentage: 33
                },
            ]
        );
    }

    #[test]
    fn aggregate_analytics_handles_empty_input() {
        let analytics = aggregate_analytics(&[]);
        assert_eq!(analytics.stars, 0);
        assert!(analytics.languages.is_empty());
    }

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(escape_html("<b>&x</b>"), "&lt;b&gt;&amp;x&lt;/b&gt;");
    }

    async fn provider_stub(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });
        format!("http://{addr}")
    }

    fn state_for(base: &str) -> AuthState {
        let config = AuthConfig::new(
            "http://localhost:8080".to_string(),
            SecretString::from("sekret".to_string()),
        )
        .with_github_client("client-id".to_string(), None)
        .with_token_url(format!("{base}/login/oauth/access_token"))
        .with_api_url(base.to_string());
        AuthState::new(config).expect("state")
    }

    #[tokio::test]
    async fn exchange_code_returns_access_token() {
        let router = Router::new().route(
            "/login/oauth/access_token",
            post(|| async { Json(serde_json::json!({ "access_token": "gho_abc" })) }),
        );
        let base = provider_stub(router).await;
        let state = state_for(&base);

        let token = exchange_code(&state, "code123").await.expect("token");
        assert_eq!(token, "gho_abc");
    }

    #[tokio::test]
    async fn exchange_code_surfaces_provider_error() {
        let router = Router::new().route(
            "/login/oauth/access_token",
            post(|| async {
                Json(serde_json::json!({
                    "error": "bad_verification_code",
                    "error_description": "The code passed is incorrect or expired."
                }))
            }),
        );
        let base = provider_stub(router).await;
        let state = state_for(&base);

        let result = exchange_code(&state, "stale").await;
        match result {
            Err(FlowError::TokenExchange(detail)) => {
                assert!(detail.contains("incorrect or expired"));
            }
            other => panic!("expected token exchange failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_profile_decodes_user() {
        let router = Router::new().route(
            "/user",
            get(|| async {
                Json(serde_json::json!({
                    "id": 583231,
                    "login": "octocat",
                    "name": "The Octocat",
                    "email": null,
                    "avatar_url": "https://avatars.example/583231"
                }))
            }),
        );
        let base = provider_stub(router).await;
        let state = state_for(&base);

        let profile = fetch_profile(&state, "gho_abc").await.expect("profile");
        assert_eq!(profile.id, 583_231);
        assert_eq!(profile.login, "octocat");
        assert_eq!(profile.name.as_deref(), Some("The Octocat"));
    }

    #[tokio::test]
    async fn fetch_profile_maps_failure_status() {
        let router = Router::new().route(
            "/user",
            get(|| async { (StatusCode::UNAUTHORIZED, "bad credentials") }),
        );
        let base = provider_stub(router).await;
        let state = state_for(&base);

        let result = fetch_profile(&state, "expired").await;
        assert!(matches!(result, Err(FlowError::ProfileFetch(_))));
    }
}
