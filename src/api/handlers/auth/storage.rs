//! Database helpers for credentials and identity state.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use tracing::{error, Instrument};
use uuid::Uuid;

use super::secrets::{hash_token, random_string};
use super::utils::is_unique_violation;

const SESSION_TOKEN_LEN: usize = 48;
const AUTH_CODE_LEN: usize = 16;

/// Minimal identity attached to a verified credential.
pub(crate) struct SessionUser {
    pub(crate) user_id: Uuid,
    pub(crate) login: String,
}

/// Connection metadata captured for the login audit trail.
#[derive(Debug, Default)]
pub(crate) struct ClientMetadata {
    pub(crate) ip_address: Option<String>,
    pub(crate) user_agent: Option<String>,
}

/// Create a session: random token, hashed at rest, absolute expiry.
///
/// Writes one audit row as a side effect; audit failure is logged and never
/// fails the login. Returns the raw token so the caller can set the cookie.
pub(crate) async fn create_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
    metadata: &ClientMetadata,
) -> Result<String> {
    let token = insert_session(pool, user_id, ttl_seconds).await?;

    if let Err(err) = record_login(pool, user_id, metadata).await {
        error!("Failed to record login audit entry: {err}");
    }

    Ok(token)
}

async fn insert_session(pool: &PgPool, user_id: Uuid, ttl_seconds: i64) -> Result<String> {
    let query = r"
        INSERT INTO user_sessions (session_hash, user_id, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = random_string(SESSION_TOKEN_LEN);
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(&token_hash)
            .bind(user_id)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Look up an unexpired session by token hash.
///
/// Expired rows are treated as absent but not deleted; invalidation is lazy.
pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionUser>> {
    let query = r"
        SELECT users.id, users.login
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| SessionUser {
        user_id: row.get("id"),
        login: row.get("login"),
    }))
}

/// Delete a session. Idempotent: revoking an unknown token is a no-op.
pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

async fn record_login(pool: &PgPool, user_id: Uuid, metadata: &ClientMetadata) -> Result<()> {
    let query = r"
        INSERT INTO logins (user_id, ip_address, user_agent)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(metadata.ip_address.as_deref())
        .bind(metadata.user_agent.as_deref())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert login audit entry")?;
    Ok(())
}

/// Upsert a user on login, keyed by the immutable provider id.
///
/// Insert assigns a fresh internal id; update refreshes login, display name
/// and avatar, and backfills the email only when it was previously empty.
/// Profile fields edited in the app (bio, location, blog) are untouched.
pub(crate) async fn upsert_github_user(
    pool: &PgPool,
    github_id: i64,
    login: &str,
    name: Option<&str>,
    avatar_url: Option<&str>,
    email: &str,
) -> Result<SessionUser> {
    let query = r"
        INSERT INTO users (github_id, login, name, avatar_url, email)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (github_id) DO UPDATE SET
            login = EXCLUDED.login,
            name = EXCLUDED.name,
            avatar_url = EXCLUDED.avatar_url,
            email = CASE
                WHEN users.email = '' THEN EXCLUDED.email
                ELSE users.email
            END,
            updated_at = NOW()
        RETURNING id, login
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(github_id)
        .bind(login)
        .bind(name)
        .bind(avatar_url)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to upsert user")?;

    Ok(SessionUser {
        user_id: row.get("id"),
        login: row.get("login"),
    })
}

/// Store the provider analytics snapshot gathered by the enrichment task.
pub(crate) async fn update_github_analytics(
    pool: &PgPool,
    user_id: Uuid,
    stars: i64,
    forks: i64,
    languages_json: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET github_stars = $2,
            github_forks = $3,
            github_languages = $4,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(stars)
        .bind(forks)
        .bind(languages_json)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update analytics snapshot")?;
    Ok(())
}

/// Mint a single-use CLI login code bound to a user.
pub(crate) async fn create_auth_code(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO auth_codes (code_hash, user_id, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let code = random_string(AUTH_CODE_LEN);
        let code_hash = hash_token(&code);
        let result = sqlx::query(query)
            .bind(&code_hash)
            .bind(user_id)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(code),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert auth code"),
        }
    }

    Err(anyhow!("failed to generate unique auth code"))
}

/// Redeem an auth code: delete-on-exchange enforces at-most-once semantics.
///
/// The delete and the validity check are a single statement, so a code can
/// never be redeemed twice even under concurrent exchange attempts.
pub(crate) async fn exchange_auth_code(
    pool: &PgPool,
    code_hash: &[u8],
) -> Result<Option<SessionUser>> {
    let query = r"
        DELETE FROM auth_codes
        USING users
        WHERE auth_codes.code_hash = $1
          AND auth_codes.expires_at > NOW()
          AND users.id = auth_codes.user_id
        RETURNING users.id, users.login
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to exchange auth code")?;

    Ok(row.map(|row| SessionUser {
        user_id: row.get("id"),
        login: row.get("login"),
    }))
}

/// Stored key material needed to verify an API-key credential.
pub(crate) struct ApiKeyCandidate {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) key_hash: String,
    pub(crate) scopes: Option<String>,
}

/// List every stored key hash.
///
/// The public key format embeds no lookup fragment, so verification walks the
/// whole table. Fine at current key counts; revisit before it is not.
pub(crate) async fn list_api_key_candidates(pool: &PgPool) -> Result<Vec<ApiKeyCandidate>> {
    let query = "SELECT id, user_id, key_hash, scopes FROM api_keys";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list api keys")?;

    Ok(rows
        .into_iter()
        .map(|row| ApiKeyCandidate {
            id: row.get("id"),
            user_id: row.get("user_id"),
            key_hash: row.get("key_hash"),
            scopes: row.get("scopes"),
        })
        .collect())
}

pub(crate) async fn fetch_login(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT login FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch user login")?;
    Ok(row.map(|row| row.get("login")))
}

/// Stored key metadata, safe to show to its owner. Never carries the hash.
pub(crate) struct ApiKeyRecord {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) scopes: String,
    pub(crate) last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub(crate) created_at: chrono::DateTime<chrono::Utc>,
}

/// Persist a new API key. Only the salted hash is stored.
pub(crate) async fn insert_api_key(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    description: Option<&str>,
    key_hash: &str,
    scopes: Option<&str>,
) -> Result<ApiKeyRecord> {
    let query = r"
        INSERT INTO api_keys (user_id, name, description, key_hash, scopes)
        VALUES ($1, $2, $3, $4, COALESCE($5, 'read,publish,delete'))
        RETURNING id, name, description, scopes, last_used_at, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(name)
        .bind(description)
        .bind(key_hash)
        .bind(scopes)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert api key")?;

    Ok(api_key_record_from_row(&row))
}

pub(crate) async fn list_api_keys_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<ApiKeyRecord>> {
    let query = r"
        SELECT id, name, description, scopes, last_used_at, created_at
        FROM api_keys
        WHERE user_id = $1
        ORDER BY created_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list api keys for user")?;

    Ok(rows.iter().map(api_key_record_from_row).collect())
}

/// Delete a key, but only for its owner. Returns whether a row was removed.
pub(crate) async fn delete_api_key(pool: &PgPool, user_id: Uuid, key_id: Uuid) -> Result<bool> {
    let query = "DELETE FROM api_keys WHERE id = $1 AND user_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(key_id)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete api key")?;
    Ok(result.rows_affected() > 0)
}

fn api_key_record_from_row(row: &sqlx::postgres::PgRow) -> ApiKeyRecord {
    ApiKeyRecord {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        scopes: row.get("scopes"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
    }
}

/// Record that a key was used. Best-effort; callers log failures.
pub(crate) async fn touch_api_key(pool: &PgPool, key_id: Uuid) -> Result<()> {
    let query = "UPDATE api_keys SET last_used_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(key_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update api key last_used_at")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ClientMetadata, SessionUser};
    use uuid::Uuid;

    #[test]
    fn client_metadata_defaults_to_none() {
        let metadata = ClientMetadata::default();
        assert!(metadata.ip_address.is_none());
        assert!(metadata.user_agent.is_none());
    }

    #[test]
    fn session_user_holds_values() {
        let record = SessionUser {
            user_id: Uuid::nil(),
            login: "octocat".to_string(),
        };
        assert_eq!(record.user_id, Uuid::nil());
        assert_eq!(record.login, "octocat");
    }
}
