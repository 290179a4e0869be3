//! # Registro (Package Registry API)
//!
//! `registro` is the HTTP backend of a package registry: users sign in with
//! GitHub, publish packages and versions, and automate against the API with
//! long-lived keys.
//!
//! ## Credentials
//!
//! Three credential types coexist and resolve through a single chain:
//!
//! - **Sessions:** server-side records minted after the OAuth exchange and
//!   carried in an `HttpOnly` cookie. Only a hash of the session token is
//!   stored. Sessions expire 30 days after issuance and are never renewed.
//! - **Signed tokens:** stateless HS256 tokens for the CLI, minted by
//!   redeeming a single-use login code. Verification needs no database hit.
//! - **API keys:** `rg_`-prefixed secrets stored as salted scrypt hashes,
//!   optionally restricted to a scope subset (`read`, `publish`, `delete`).
//!
//! Protected routes accept any of the three via the `Authorization` header,
//! a `token` query parameter, or the session cookie, in that order.
//!
//! ## Authorization
//!
//! Session and signed-token identities are fully privileged. API keys carry
//! an explicit scope list. Ownership of packages and keys is checked by the
//! mutating handlers themselves.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
