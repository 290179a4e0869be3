use crate::{
    api,
    api::handlers::auth::AuthConfig,
    cli::{actions::Action, commands::auth},
};
use anyhow::Result;

/// Server action arguments assembled by the dispatcher.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth: auth::Options,
}

/// Handle the server action: build the auth configuration and run the API.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server(args) = action;

    let mut config = AuthConfig::new(args.auth.base_url, args.auth.token_secret)
        .with_authorize_url(args.auth.github_authorize_url)
        .with_token_url(args.auth.github_token_url)
        .with_api_url(args.auth.github_api_url)
        .with_session_ttl_seconds(args.auth.session_ttl_seconds);

    if let Some(client_id) = args.auth.github_client_id {
        config = config.with_github_client(client_id, args.auth.github_client_secret);
    }
    if let Some(domain) = args.auth.cookie_domain {
        config = config.with_cookie_domain(domain);
    }

    api::new(args.port, args.dsn, config).await
}
