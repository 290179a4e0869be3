//! Package catalog: browsing, publishing, versions and registry stats.
//!
//! Mutations prove ownership here, after the gate has proven identity.
//! Published versions are immutable: re-publishing an existing version is a
//! conflict, never an overwrite.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, error, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::handlers::auth::{checksum, RequireAuth, Scope};

#[derive(Debug, Serialize, ToSchema)]
pub struct PackageSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub license: Option<String>,
    pub downloads: i64,
    pub stars: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PackageDetail {
    #[serde(flatten)]
    pub summary: PackageSummary,
    pub repo_url: Option<String>,
    pub homepage: Option<String>,
    pub owner_login: String,
    pub owner_avatar_url: Option<String>,
    pub updated_at: String,
    pub versions: Vec<VersionSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VersionSummary {
    pub version: String,
    pub changelog: Option<String>,
    pub checksum: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_packages: i64,
    pub total_downloads: i64,
    pub trending: Vec<PackageSummary>,
    pub top_downloaded: Vec<PackageSummary>,
    pub recent: Vec<PackageSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    q: Option<String>,
    sort: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishRequest {
    pub name: String,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishVersionRequest {
    pub version: String,
    pub changelog: Option<String>,
    pub readme_content: Option<String>,
}

#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Registry-wide counters and highlight lists", body = StatsResponse)
    ),
    tag = "packages"
)]
pub async fn stats(pool: Extension<PgPool>) -> impl IntoResponse {
    match build_stats(&pool).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => {
            error!("Failed to build registry stats: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/packages",
    params(
        ("q" = Option<String>, Query, description = "Substring filter on name or description"),
        ("sort" = Option<String>, Query, description = "downloads (default), stars, or recent")
    ),
    responses(
        (status = 200, description = "Matching packages", body = [PackageSummary])
    ),
    tag = "packages"
)]
pub async fn list(Query(params): Query<ListQuery>, pool: Extension<PgPool>) -> impl IntoResponse {
    // Sort keys are whitelisted; user input never reaches the ORDER BY text.
    let order = match params.sort.as_deref() {
        Some("stars") => "stars DESC",
        Some("recent") => "created_at DESC",
        _ => "downloads DESC",
    };
    let query = format!(
        r"
        SELECT id, name, description, license, downloads, stars, created_at
        FROM packages
        WHERE ($1::text IS NULL OR name ILIKE $2 OR description ILIKE $2)
        ORDER BY {order}
        LIMIT 50
    "
    );
    let pattern = params
        .q
        .as_deref()
        .map(|q| format!("%{}%", q.replace(['%', '_'], "")));

    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(pattern.as_deref())
        .bind(pattern.as_deref().unwrap_or("%"))
        .fetch_all(&pool.0)
        .instrument(span)
        .await;

    match rows {
        Ok(rows) => {
            let packages: Vec<PackageSummary> = rows.into_iter().map(summary_from_row).collect();
            Json(packages).into_response()
        }
        Err(err) => {
            error!("Failed to list packages: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/packages/{name}",
    params(("name" = String, Path, description = "Package name")),
    responses(
        (status = 200, description = "Package detail with versions", body = PackageDetail),
        (status = 404, description = "Unknown package")
    ),
    tag = "packages"
)]
pub async fn detail(Path(name): Path<String>, pool: Extension<PgPool>) -> impl IntoResponse {
    let package = match fetch_detail(&pool, &name).await {
        Ok(Some(package)) => package,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to fetch package {name}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Download counting is fire-and-forget; a failed bump never fails a read.
    spawn_download_bump(pool.0.clone(), package.summary.id);

    Json(package).into_response()
}

#[utoipa::path(
    post,
    path = "/packages",
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Package created or updated", body = PackageSummary),
        (status = 400, description = "Invalid package name"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing publish scope, or package owned by someone else")
    ),
    tag = "packages"
)]
pub async fn publish(
    RequireAuth(identity): RequireAuth,
    pool: Extension<PgPool>,
    Json(payload): Json<PublishRequest>,
) -> impl IntoResponse {
    if !identity.has_scope(Scope::Publish) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !valid_package_name(&payload.name) {
        return (
            StatusCode::BAD_REQUEST,
            "Package names use lowercase letters, digits and hyphens, starting with a letter.",
        )
            .into_response();
    }

    match upsert_package(&pool, identity.id, &payload).await {
        Ok(Some(summary)) => Json(summary).into_response(),
        Ok(None) => StatusCode::FORBIDDEN.into_response(),
        Err(err) => {
            error!("Failed to publish package {}: {err}", payload.name);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/packages/{name}",
    params(("name" = String, Path, description = "Package name")),
    responses(
        (status = 204, description = "Package deleted"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing delete scope"),
        (status = 404, description = "Unknown package or not the owner")
    ),
    tag = "packages"
)]
pub async fn remove(
    RequireAuth(identity): RequireAuth,
    Path(name): Path<String>,
    pool: Extension<PgPool>,
) -> impl IntoResponse {
    if !identity.has_scope(Scope::Delete) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let query = "DELETE FROM packages WHERE name = $1 AND owner_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(&name)
        .bind(identity.id)
        .execute(&pool.0)
        .instrument(span)
        .await
    {
        Ok(result) if result.rows_affected() > 0 => StatusCode::NO_CONTENT.into_response(),
        Ok(_) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to delete package {name}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/packages/{name}/versions",
    params(("name" = String, Path, description = "Package name")),
    responses(
        (status = 200, description = "Published versions, newest first", body = [VersionSummary]),
        (status = 404, description = "Unknown package")
    ),
    tag = "packages"
)]
pub async fn list_versions(Path(name): Path<String>, pool: Extension<PgPool>) -> impl IntoResponse {
    let package_id = match fetch_package_id(&pool, &name).await {
        Ok(Some((package_id, _))) => package_id,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to resolve package {name}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match fetch_versions(&pool, package_id).await {
        Ok(versions) => Json(versions).into_response(),
        Err(err) => {
            error!("Failed to list versions for {name}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/packages/{name}/versions",
    params(("name" = String, Path, description = "Package name")),
    request_body = PublishVersionRequest,
    responses(
        (status = 200, description = "Version published", body = VersionSummary),
        (status = 400, description = "Invalid version string"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing publish scope or not the owner"),
        (status = 404, description = "Unknown package"),
        (status = 409, description = "Version already exists")
    ),
    tag = "packages"
)]
pub async fn publish_version(
    RequireAuth(identity): RequireAuth,
    Path(name): Path<String>,
    pool: Extension<PgPool>,
    Json(payload): Json<PublishVersionRequest>,
) -> impl IntoResponse {
    if !identity.has_scope(Scope::Publish) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !valid_semver(&payload.version) {
        return (
            StatusCode::BAD_REQUEST,
            "Versions use semantic versioning, e.g. 1.0.0 or 1.2.0-beta.1",
        )
            .into_response();
    }

    let (package_id, owner_id) = match fetch_package_id(&pool, &name).await {
        Ok(Some(ids)) => ids,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to resolve package {name}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if owner_id != identity.id {
        return StatusCode::FORBIDDEN.into_response();
    }

    match insert_version(&pool, package_id, &payload).await {
        Ok(Some(version)) => Json(version).into_response(),
        Ok(None) => (StatusCode::CONFLICT, "Version already exists").into_response(),
        Err(err) => {
            error!("Failed to publish {name}@{}: {err}", payload.version);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `^[a-z][a-z0-9-]*$`
fn valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// `major.minor.patch` with an optional dash-separated pre-release tag.
fn valid_semver(version: &str) -> bool {
    let (base, pre) = match version.split_once('-') {
        Some((base, pre)) => (base, Some(pre)),
        None => (version, None),
    };

    let mut parts = 0;
    for part in base.split('.') {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    if parts != 3 {
        return false;
    }

    match pre {
        None => true,
        Some(pre) => {
            !pre.is_empty()
                && pre
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        }
    }
}

async fn build_stats(pool: &PgPool) -> Result<StatsResponse> {
    let totals_query = r"
        SELECT COUNT(*) AS total_packages,
               COALESCE(SUM(downloads), 0)::bigint AS total_downloads
        FROM packages
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = totals_query
    );
    let totals = sqlx::query(totals_query)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to aggregate package totals")?;

    let trending = fetch_ranked(pool, "stars DESC", 6).await?;
    let top_downloaded = fetch_ranked(pool, "downloads DESC", 6).await?;
    let recent = fetch_ranked(pool, "created_at DESC", 5).await?;

    Ok(StatsResponse {
        total_packages: totals.get("total_packages"),
        total_downloads: totals.get("total_downloads"),
        trending,
        top_downloaded,
        recent,
    })
}

async fn fetch_ranked(pool: &PgPool, order: &str, limit: i64) -> Result<Vec<PackageSummary>> {
    // `order` comes from the fixed strings above, never from request input.
    let query = format!(
        r"
        SELECT id, name, description, license, downloads, stars, created_at
        FROM packages
        ORDER BY {order}
        LIMIT $1
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(limit)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to fetch ranked packages")?;
    Ok(rows.into_iter().map(summary_from_row).collect())
}

pub(crate) async fn list_packages_by_owner(
    pool: &PgPool,
    owner_id: Uuid,
) -> Result<Vec<PackageSummary>> {
    let query = r"
        SELECT id, name, description, license, downloads, stars, created_at
        FROM packages
        WHERE owner_id = $1
        ORDER BY downloads DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(owner_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list packages by owner")?;
    Ok(rows.into_iter().map(summary_from_row).collect())
}

async fn fetch_detail(pool: &PgPool, name: &str) -> Result<Option<PackageDetail>> {
    let query = r"
        SELECT p.id, p.name, p.description, p.license, p.downloads, p.stars,
               p.created_at, p.updated_at, p.repo_url, p.homepage,
               u.login AS owner_login, u.avatar_url AS owner_avatar_url
        FROM packages p
        JOIN users u ON u.id = p.owner_id
        WHERE p.name = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch package detail")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let package_id: Uuid = row.get("id");
    let versions = fetch_versions(pool, package_id).await?;
    let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");
    let repo_url: Option<String> = row.get("repo_url");
    let homepage: Option<String> = row.get("homepage");
    let owner_login: String = row.get("owner_login");
    let owner_avatar_url: Option<String> = row.get("owner_avatar_url");

    Ok(Some(PackageDetail {
        summary: summary_from_row(row),
        repo_url,
        homepage,
        owner_login,
        owner_avatar_url,
        updated_at: updated_at.to_rfc3339(),
        versions,
    }))
}

async fn fetch_versions(pool: &PgPool, package_id: Uuid) -> Result<Vec<VersionSummary>> {
    let query = r"
        SELECT version, changelog, checksum, created_at
        FROM versions
        WHERE package_id = $1
        ORDER BY created_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(package_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to fetch versions")?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
            VersionSummary {
                version: row.get("version"),
                changelog: row.get("changelog"),
                checksum: row.get("checksum"),
                created_at: created_at.to_rfc3339(),
            }
        })
        .collect())
}

async fn fetch_package_id(pool: &PgPool, name: &str) -> Result<Option<(Uuid, Uuid)>> {
    let query = "SELECT id, owner_id FROM packages WHERE name = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resolve package id")?;
    Ok(row.map(|row| (row.get("id"), row.get("owner_id"))))
}

/// Insert or update a package. Returns `None` when another user owns the name.
async fn upsert_package(
    pool: &PgPool,
    owner_id: Uuid,
    payload: &PublishRequest,
) -> Result<Option<PackageSummary>> {
    if let Some((_, existing_owner)) = fetch_package_id(pool, &payload.name).await? {
        if existing_owner != owner_id {
            return Ok(None);
        }
    }

    let query = r"
        INSERT INTO packages (name, description, repo_url, homepage, license, owner_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (name) DO UPDATE SET
            description = EXCLUDED.description,
            repo_url = EXCLUDED.repo_url,
            homepage = EXCLUDED.homepage,
            license = EXCLUDED.license,
            updated_at = NOW()
        WHERE packages.owner_id = EXCLUDED.owner_id
        RETURNING id, name, description, license, downloads, stars, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&payload.name)
        .bind(payload.description.as_deref())
        .bind(payload.repo_url.as_deref())
        .bind(payload.homepage.as_deref())
        .bind(payload.license.as_deref())
        .bind(owner_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to upsert package")?;

    Ok(row.map(summary_from_row))
}

/// Insert a version. Returns `None` when the version already exists.
async fn insert_version(
    pool: &PgPool,
    package_id: Uuid,
    payload: &PublishVersionRequest,
) -> Result<Option<VersionSummary>> {
    let content_checksum = payload
        .readme_content
        .as_deref()
        .map(|content| checksum(content.as_bytes()));

    let query = r"
        INSERT INTO versions (package_id, version, changelog, readme_content, checksum)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (package_id, version) DO NOTHING
        RETURNING version, changelog, checksum, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(package_id)
        .bind(&payload.version)
        .bind(payload.changelog.as_deref())
        .bind(payload.readme_content.as_deref())
        .bind(content_checksum.as_deref())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to insert version")?;

    let Some(row) = row else {
        return Ok(None);
    };

    // Version publishes also refresh the package's updated_at for sorting.
    let touch = "UPDATE packages SET updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = touch
    );
    sqlx::query(touch)
        .bind(package_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch package timestamp")?;

    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    Ok(Some(VersionSummary {
        version: row.get("version"),
        changelog: row.get("changelog"),
        checksum: row.get("checksum"),
        created_at: created_at.to_rfc3339(),
    }))
}

fn spawn_download_bump(pool: PgPool, package_id: Uuid) {
    tokio::spawn(async move {
        let total = "UPDATE packages SET downloads = downloads + 1 WHERE id = $1";
        if let Err(err) = sqlx::query(total).bind(package_id).execute(&pool).await {
            debug!("Failed to bump download total: {err}");
            return;
        }

        let daily = r"
            INSERT INTO package_stats (package_id, day, downloads)
            VALUES ($1, $2, 1)
            ON CONFLICT (package_id, day) DO UPDATE
            SET downloads = package_stats.downloads + 1
        ";
        let today = chrono::Utc::now().date_naive();
        if let Err(err) = sqlx::query(daily)
            .bind(package_id)
            .bind(today)
            .execute(&pool)
            .await
        {
            debug!("Failed to bump daily download counter: {err}");
        }
    });
}

fn summary_from_row(row: sqlx::postgres::PgRow) -> PackageSummary {
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    PackageSummary {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        license: row.get("license"),
        downloads: row.get("downloads"),
        stars: row.get("stars"),
        created_at: created_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::{valid_package_name, valid_semver};

    #[test]
    fn package_names_follow_the_grammar() {
        assert!(valid_package_name("http"));
        assert!(valid_package_name("json-parser"));
        assert!(valid_package_name("a2"));

        assert!(!valid_package_name(""));
        assert!(!valid_package_name("2fast"));
        assert!(!valid_package_name("-leading"));
        assert!(!valid_package_name("Upper"));
        assert!(!valid_package_name("under_score"));
        assert!(!valid_package_name("dot.name"));
    }

    #[test]
    fn semver_accepts_releases_and_prereleases() {
        assert!(valid_semver("1.0.0"));
        assert!(valid_semver("0.1.2"));
        assert!(valid_semver("10.20.30"));
        assert!(valid_semver("1.0.0-beta.1"));
        assert!(valid_semver("1.0.0-rc_2"));
    }

    #[test]
    fn semver_rejects_malformed_versions() {
        assert!(!valid_semver(""));
        assert!(!valid_semver("1.0"));
        assert!(!valid_semver("1.0.0.0"));
        assert!(!valid_semver("v1.0.0"));
        assert!(!valid_semver("1..0"));
        assert!(!valid_semver("1.0.0-"));
        assert!(!valid_semver("1.0.0-beta!"));
    }
}
