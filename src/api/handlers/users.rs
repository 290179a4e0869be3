//! Public user profiles.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::{error, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::handlers::packages::{list_packages_by_owner, PackageSummary};

/// Profile fields exposed over the API. Never includes credential material.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub login: String,
    pub name: Option<String>,
    pub email: String,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
    pub avatar_url: Option<String>,
    pub github_stars: i64,
    pub github_forks: i64,
    /// Top languages as `{name, percentage}` pairs from the last enrichment.
    pub github_languages: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicProfileResponse {
    #[serde(flatten)]
    pub user: UserProfile,
    pub packages: Vec<PackageSummary>,
}

#[utoipa::path(
    get,
    path = "/users/{login}",
    params(("login" = String, Path, description = "User login")),
    responses(
        (status = 200, description = "Public profile with owned packages", body = PublicProfileResponse),
        (status = 404, description = "Unknown user")
    ),
    tag = "users"
)]
pub async fn profile(Path(login): Path<String>, pool: Extension<PgPool>) -> impl IntoResponse {
    let user = match fetch_user_by_login(&pool, &login).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to fetch profile for {login}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match list_packages_by_owner(&pool, user.id).await {
        Ok(packages) => Json(PublicProfileResponse { user, packages }).into_response(),
        Err(err) => {
            error!("Failed to list packages for {login}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

const USER_COLUMNS: &str = r"
    SELECT id, login, name, email, bio, location, blog, avatar_url,
           github_stars, github_forks, github_languages, created_at
    FROM users
";

pub(crate) async fn fetch_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserProfile>> {
    let query = format!("{USER_COLUMNS} WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch user by id")?;
    Ok(row.map(user_profile_from_row))
}

pub(crate) async fn fetch_user_by_login(pool: &PgPool, login: &str) -> Result<Option<UserProfile>> {
    let query = format!("{USER_COLUMNS} WHERE login = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(login)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch user by login")?;
    Ok(row.map(user_profile_from_row))
}

fn user_profile_from_row(row: sqlx::postgres::PgRow) -> UserProfile {
    let languages: Option<String> = row.get("github_languages");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    UserProfile {
        id: row.get("id"),
        login: row.get("login"),
        name: row.get("name"),
        email: row.get("email"),
        bio: row.get("bio"),
        location: row.get("location"),
        blog: row.get("blog"),
        avatar_url: row.get("avatar_url"),
        github_stars: row.get("github_stars"),
        github_forks: row.get("github_forks"),
        github_languages: parse_languages(languages.as_deref()),
        created_at: created_at.to_rfc3339(),
    }
}

/// Stored as serialized JSON text; unreadable snapshots degrade to an empty list.
fn parse_languages(stored: Option<&str>) -> serde_json::Value {
    stored
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::parse_languages;

    #[test]
    fn parse_languages_reads_snapshot() {
        let value = parse_languages(Some(r#"[{"name":"Rust","percentage":80}]"#));
        assert_eq!(value[0]["name"], "Rust");
        assert_eq!(value[0]["percentage"], 80);
    }

    #[test]
    fn parse_languages_degrades_to_empty_array() {
        assert_eq!(parse_languages(None), serde_json::json!([]));
        assert_eq!(parse_languages(Some("not-json")), serde_json::json!([]));
    }
}
