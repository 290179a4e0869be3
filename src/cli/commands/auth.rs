use anyhow::{Context, Result};
use clap::{Arg, Command};
use secrecy::SecretString;

pub fn with_args(command: Command) -> Command {
    let command = with_service_args(command);
    let command = with_github_args(command);
    with_credential_args(command)
}

fn with_service_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .help("Public base URL of this service, used for OAuth redirect URIs and cookies")
                .env("REGISTRO_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new("cookie-domain")
                .long("cookie-domain")
                .help("Optional Domain attribute for the session cookie")
                .env("REGISTRO_COOKIE_DOMAIN"),
        )
}

fn with_github_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("github-client-id")
                .long("github-client-id")
                .help("GitHub OAuth application client id")
                .env("REGISTRO_GITHUB_CLIENT_ID"),
        )
        .arg(
            Arg::new("github-client-secret")
                .long("github-client-secret")
                .help("GitHub OAuth application client secret")
                .env("REGISTRO_GITHUB_CLIENT_SECRET"),
        )
        .arg(
            Arg::new("github-authorize-url")
                .long("github-authorize-url")
                .help("Authorize endpoint of the OAuth provider")
                .env("REGISTRO_GITHUB_AUTHORIZE_URL")
                .default_value("https://github.com/login/oauth/authorize"),
        )
        .arg(
            Arg::new("github-token-url")
                .long("github-token-url")
                .help("Token exchange endpoint of the OAuth provider")
                .env("REGISTRO_GITHUB_TOKEN_URL")
                .default_value("https://github.com/login/oauth/access_token"),
        )
        .arg(
            Arg::new("github-api-url")
                .long("github-api-url")
                .help("Base URL of the provider REST API")
                .env("REGISTRO_GITHUB_API_URL")
                .default_value("https://api.github.com"),
        )
}

fn with_credential_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("token-secret")
                .long("token-secret")
                .help("Symmetric secret used to sign stateless tokens")
                .env("REGISTRO_TOKEN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session lifetime in seconds")
                .env("REGISTRO_SESSION_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
}

/// Parsed auth/OAuth options.
#[derive(Debug)]
pub struct Options {
    pub base_url: String,
    pub cookie_domain: Option<String>,
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<SecretString>,
    pub github_authorize_url: String,
    pub github_token_url: String,
    pub github_api_url: String,
    pub token_secret: SecretString,
    pub session_ttl_seconds: i64,
}

impl Options {
    /// Extract the auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let base_url = matches
            .get_one::<String>("base-url")
            .cloned()
            .context("missing required argument: --base-url")?;
        let token_secret = matches
            .get_one::<String>("token-secret")
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --token-secret")?;

        Ok(Self {
            base_url,
            cookie_domain: matches.get_one::<String>("cookie-domain").cloned(),
            github_client_id: matches.get_one::<String>("github-client-id").cloned(),
            github_client_secret: matches
                .get_one::<String>("github-client-secret")
                .cloned()
                .map(SecretString::from),
            github_authorize_url: matches
                .get_one::<String>("github-authorize-url")
                .cloned()
                .context("missing required argument: --github-authorize-url")?,
            github_token_url: matches
                .get_one::<String>("github-token-url")
                .cloned()
                .context("missing required argument: --github-token-url")?,
            github_api_url: matches
                .get_one::<String>("github-api-url")
                .cloned()
                .context("missing required argument: --github-api-url")?,
            token_secret,
            session_ttl_seconds: matches
                .get_one::<i64>("session-ttl-seconds")
                .copied()
                .unwrap_or(30 * 24 * 60 * 60),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn matches_from(args: Vec<&str>) -> clap::ArgMatches {
        let command = crate::cli::commands::new();
        command.get_matches_from(args)
    }

    #[test]
    fn parse_defaults() {
        temp_env::with_vars(
            [
                ("REGISTRO_BASE_URL", None::<&str>),
                ("REGISTRO_GITHUB_CLIENT_ID", None),
                ("REGISTRO_SESSION_TTL_SECONDS", None),
            ],
            || {
                let matches = matches_from(vec![
                    "registro",
                    "--dsn",
                    "postgres://localhost/registro",
                    "--token-secret",
                    "sekret",
                ]);
                let options = Options::parse(&matches).expect("options");
                assert_eq!(options.base_url, "http://localhost:8080");
                assert_eq!(options.session_ttl_seconds, 2_592_000);
                assert!(options.github_client_id.is_none());
                assert_eq!(options.token_secret.expose_secret(), "sekret");
                assert_eq!(
                    options.github_token_url,
                    "https://github.com/login/oauth/access_token"
                );
            },
        );
    }

    #[test]
    fn parse_overrides() {
        temp_env::with_vars([("REGISTRO_COOKIE_DOMAIN", None::<&str>)], || {
            let matches = matches_from(vec![
                "registro",
                "--dsn",
                "postgres://localhost/registro",
                "--token-secret",
                "sekret",
                "--base-url",
                "https://registro.dev",
                "--github-client-id",
                "iv1.client",
                "--session-ttl-seconds",
                "3600",
            ]);
            let options = Options::parse(&matches).expect("options");
            assert_eq!(options.base_url, "https://registro.dev");
            assert_eq!(options.github_client_id.as_deref(), Some("iv1.client"));
            assert_eq!(options.session_ttl_seconds, 3600);
        });
    }
}
