//! Auth configuration and shared state.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_STATE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_AUTH_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const DEFAULT_API_URL: &str = "https://api.github.com";

// Provider calls get a hard deadline instead of platform defaults; a timeout
// surfaces as the corresponding terminal OAuth failure.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    cookie_domain: Option<String>,
    github_client_id: Option<String>,
    github_client_secret: Option<SecretString>,
    authorize_url: String,
    token_url: String,
    api_url: String,
    token_secret: SecretString,
    session_ttl_seconds: i64,
    state_ttl_seconds: i64,
    auth_code_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String, token_secret: SecretString) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_domain: None,
            github_client_id: None,
            github_client_secret: None,
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            token_secret,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            state_ttl_seconds: DEFAULT_STATE_TTL_SECONDS,
            auth_code_ttl_seconds: DEFAULT_AUTH_CODE_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_github_client(mut self, client_id: String, secret: Option<SecretString>) -> Self {
        self.github_client_id = Some(client_id);
        self.github_client_secret = secret;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: String) -> Self {
        self.cookie_domain = Some(domain);
        self
    }

    #[must_use]
    pub fn with_authorize_url(mut self, url: String) -> Self {
        self.authorize_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: String) -> Self {
        self.token_url = url;
        self
    }

    #[must_use]
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_state_ttl_seconds(mut self, seconds: i64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    pub(crate) fn github_client_id(&self) -> Option<&str> {
        self.github_client_id.as_deref()
    }

    pub(crate) fn github_client_secret(&self) -> Option<&SecretString> {
        self.github_client_secret.as_ref()
    }

    pub(crate) fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    pub(crate) fn token_url(&self) -> &str {
        &self.token_url
    }

    pub(crate) fn api_url(&self) -> &str {
        &self.api_url
    }

    pub(crate) fn token_secret(&self) -> &SecretString {
        &self.token_secret
    }

    pub(crate) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(crate) fn state_ttl_seconds(&self) -> i64 {
        self.state_ttl_seconds
    }

    pub(crate) fn auth_code_ttl_seconds(&self) -> i64 {
        self.auth_code_ttl_seconds
    }

    /// Only mark cookies secure when the service is served over HTTPS.
    pub(crate) fn cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    pub(crate) fn callback_url(&self) -> String {
        format!("{}/auth/github/callback", self.base_url)
    }
}

pub struct AuthState {
    config: AuthConfig,
    http: reqwest::Client,
}

impl AuthState {
    /// Build the shared auth state, including the provider HTTP client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .context("failed to build provider HTTP client")?;

        Ok(Self { config, http })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://registro.dev/".to_string(),
            SecretString::from("sekret".to_string()),
        )
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = config();

        assert_eq!(config.base_url(), "https://registro.dev");
        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(config.state_ttl_seconds(), DEFAULT_STATE_TTL_SECONDS);
        assert_eq!(config.authorize_url(), DEFAULT_AUTHORIZE_URL);
        assert!(config.github_client_id().is_none());
        assert!(config.cookie_secure());

        let config = config
            .with_github_client("client-id".to_string(), None)
            .with_api_url("https://ghe.example.com/api/v3/".to_string())
            .with_session_ttl_seconds(60)
            .with_cookie_domain("registro.dev".to_string());

        assert_eq!(config.github_client_id(), Some("client-id"));
        assert_eq!(config.api_url(), "https://ghe.example.com/api/v3");
        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.cookie_domain(), Some("registro.dev"));
    }

    #[test]
    fn callback_url_appends_path() {
        assert_eq!(
            config().callback_url(),
            "https://registro.dev/auth/github/callback"
        );
    }

    #[test]
    fn plain_http_disables_secure_cookies() {
        let config = AuthConfig::new(
            "http://localhost:8080".to_string(),
            SecretString::from("sekret".to_string()),
        );
        assert!(!config.cookie_secure());
    }

    #[test]
    fn auth_state_builds_client() {
        let state = AuthState::new(config()).expect("state");
        assert_eq!(state.config().base_url(), "https://registro.dev");
    }
}
