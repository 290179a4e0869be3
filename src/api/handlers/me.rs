//! Authenticated self-service endpoints.
//!
//! Flow Overview:
//! 1) Resolve the caller through the credential chain.
//! 2) Load or mutate their own records; ownership is implicit in the WHERE.
//! 3) API keys: plaintext returned exactly once at creation, never again.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{error, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::handlers::auth::{
    hash_secret, random_string,
    storage::{delete_api_key, insert_api_key, list_api_keys_for_user, ApiKeyRecord},
    RequireAuth, Scope, API_KEY_PREFIX,
};
use crate::api::handlers::packages::{list_packages_by_owner, PackageSummary};
use crate::api::handlers::users::{fetch_user_by_id, UserProfile};

const API_KEY_SECRET_LEN: usize = 40;

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginAuditEntry {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub scopes: Vec<String>,
    pub last_used_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub user: UserProfile,
    pub packages: Vec<PackageSummary>,
    pub logins: Vec<LoginAuditEntry>,
    pub api_keys: Vec<ApiKeySummary>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SettingsRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub description: Option<String>,
    /// Omit for a fully-privileged key.
    pub scopes: Option<Vec<Scope>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateApiKeyResponse {
    /// The plaintext key. Shown here once; only a salted hash is stored.
    pub api_key: String,
    pub key: ApiKeySummary,
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile, packages, login history and API keys", body = DashboardResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "me"
)]
pub async fn dashboard(
    RequireAuth(identity): RequireAuth,
    pool: Extension<PgPool>,
) -> impl IntoResponse {
    let user = match fetch_user_by_id(&pool, identity.id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to load dashboard profile: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let packages = match list_packages_by_owner(&pool, identity.id).await {
        Ok(packages) => packages,
        Err(err) => {
            error!("Failed to load dashboard packages: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Audit history and key listings are non-critical; degrade to empty.
    let logins = fetch_recent_logins(&pool, identity.id)
        .await
        .unwrap_or_else(|err| {
            error!("Failed to load login history: {err}");
            Vec::new()
        });
    let api_keys = list_api_keys_for_user(&pool, identity.id)
        .await
        .map(|keys| keys.iter().map(api_key_summary).collect())
        .unwrap_or_else(|err| {
            error!("Failed to load api keys: {err}");
            Vec::new()
        });

    Json(DashboardResponse {
        user,
        packages,
        logins,
        api_keys,
    })
    .into_response()
}

#[utoipa::path(
    patch,
    path = "/me/settings",
    request_body = SettingsRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "No updates provided"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "me"
)]
pub async fn update_settings(
    RequireAuth(identity): RequireAuth,
    pool: Extension<PgPool>,
    Json(payload): Json<SettingsRequest>,
) -> impl IntoResponse {
    let name = normalize_optional(payload.name);
    let email = normalize_optional(payload.email);
    let bio = normalize_optional(payload.bio);
    let location = normalize_optional(payload.location);
    let blog = normalize_optional(payload.blog);

    if name.is_none() && email.is_none() && bio.is_none() && location.is_none() && blog.is_none() {
        return (StatusCode::BAD_REQUEST, "No updates provided.").into_response();
    }

    match apply_settings(&pool, identity.id, name, email, bio, location, blog).await {
        Ok(()) => {}
        Err(err) => {
            error!("Failed to update profile settings: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match fetch_user_by_id(&pool, identity.id).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to reload profile after update: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/me/api-key",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 200, description = "Key created; plaintext shown once", body = CreateApiKeyResponse),
        (status = 400, description = "Missing key name"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "me"
)]
pub async fn create_api_key(
    RequireAuth(identity): RequireAuth,
    pool: Extension<PgPool>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> impl IntoResponse {
    let name = payload.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "Key name is required.").into_response();
    }

    let plaintext = format!("{API_KEY_PREFIX}{}", random_string(API_KEY_SECRET_LEN));
    let key_hash = match hash_secret(&plaintext) {
        Ok(key_hash) => key_hash,
        Err(err) => {
            error!("Failed to derive api key hash: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let scopes = payload.scopes.map(|scopes| {
        scopes
            .iter()
            .map(|scope| scope.as_str())
            .collect::<Vec<_>>()
            .join(",")
    });

    match insert_api_key(
        &pool,
        identity.id,
        name,
        payload.description.as_deref(),
        &key_hash,
        scopes.as_deref(),
    )
    .await
    {
        Ok(record) => Json(CreateApiKeyResponse {
            api_key: plaintext,
            key: api_key_summary(&record),
        })
        .into_response(),
        Err(err) => {
            error!("Failed to create api key: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/me/api-key/{id}",
    params(("id" = Uuid, Path, description = "Key id")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown key, or owned by someone else")
    ),
    tag = "me"
)]
pub async fn revoke_api_key(
    RequireAuth(identity): RequireAuth,
    Path(key_id): Path<Uuid>,
    pool: Extension<PgPool>,
) -> impl IntoResponse {
    match delete_api_key(&pool, identity.id, key_id).await {
        // Someone else's key id is indistinguishable from an unknown one.
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to revoke api key: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn api_key_summary(record: &ApiKeyRecord) -> ApiKeySummary {
    ApiKeySummary {
        id: record.id,
        name: record.name.clone(),
        description: record.description.clone(),
        scopes: record
            .scopes
            .split(',')
            .map(|scope| scope.trim().to_string())
            .filter(|scope| !scope.is_empty())
            .collect(),
        last_used_at: record.last_used_at.map(|at| at.to_rfc3339()),
        created_at: record.created_at.to_rfc3339(),
    }
}

async fn apply_settings(
    pool: &PgPool,
    user_id: Uuid,
    name: Option<String>,
    email: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    blog: Option<String>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET name = COALESCE($2, name),
            email = COALESCE($3, email),
            bio = COALESCE($4, bio),
            location = COALESCE($5, location),
            blog = COALESCE($6, blog),
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
        .bind(name)
        .bind(email)
        .bind(bio)
        .bind(location)
        .bind(blog)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update profile settings")?;
    Ok(())
}

async fn fetch_recent_logins(pool: &PgPool, user_id: Uuid) -> Result<Vec<LoginAuditEntry>> {
    let query = r"
        SELECT ip_address, user_agent, created_at
        FROM logins
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 10
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
        .context("failed to fetch login history")?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
            LoginAuditEntry {
                ip_address: row.get("ip_address"),
                user_agent: row.get("user_agent"),
                created_at: created_at.to_rfc3339(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_optional_trims_and_drops_empty() {
        assert_eq!(normalize_optional(Some("  x  ".into())), Some("x".into()));
        assert_eq!(normalize_optional(Some("   ".into())), None);
        assert_eq!(normalize_optional(None), None);
    }

    #[test]
    fn api_key_summary_splits_scopes() {
        let record = ApiKeyRecord {
            id: Uuid::nil(),
            name: "ci".to_string(),
            description: None,
            scopes: "read,publish".to_string(),
            last_used_at: None,
            created_at: chrono::Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        let summary = api_key_summary(&record);
        assert_eq!(summary.scopes, vec!["read", "publish"]);
        assert!(summary.last_used_at.is_none());
        assert_eq!(summary.created_at, "2025-01-01T00:00:00+00:00");
    }
}
