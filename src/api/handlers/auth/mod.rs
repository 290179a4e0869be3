//! Auth handlers and supporting modules.
//!
//! This module coordinates the GitHub OAuth exchange, session management, and
//! credential resolution for the three coexisting credential types.
//!
//! ## Credential resolution
//!
//! Every protected route resolves its caller through one chain: extract a
//! single credential string (Authorization header, `token` query parameter,
//! or session cookie), then try session lookup, signed-token verification,
//! and API-key verification in order. Adding a credential type means adding
//! one strategy to [`resolver`].
//!
//! ## Storage hygiene
//!
//! Session tokens and CLI codes are stored as SHA-256 hashes; API keys as
//! salted scrypt hashes. No raw credential ever reaches the database, and a
//! key's plaintext is shown to its creator exactly once.

pub(crate) mod cli_token;
pub(crate) mod github;
pub(crate) mod principal;
pub(crate) mod resolver;
mod secrets;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
mod token;
pub(crate) mod types;
mod utils;

pub use principal::{Identity, OptionalAuth, RequireAuth, Scope};
pub use state::{AuthConfig, AuthState};

pub(crate) use resolver::API_KEY_PREFIX;
pub(crate) use secrets::{checksum, hash_secret, random_string};

#[cfg(test)]
mod tests;
