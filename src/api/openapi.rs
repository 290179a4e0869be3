use crate::api::handlers::{auth, health, me, packages, users};
use utoipa::openapi::{InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec.
/// Routes added outside (like `OPTIONS /health`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut base = cargo_openapi();
    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("OAuth exchange, sessions and CLI tokens".to_string());
    let mut packages_tag = Tag::new("packages");
    packages_tag.description = Some("Package catalog and version publishing".to_string());
    base.tags = Some(vec![auth_tag, packages_tag]);

    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let router = OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(auth::github::login))
        .routes(routes!(auth::github::callback))
        .routes(routes!(auth::session::status))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::cli_token::create_code))
        .routes(routes!(auth::cli_token::exchange))
        .routes(routes!(packages::stats))
        .routes(routes!(packages::list, packages::publish))
        .routes(routes!(packages::detail, packages::remove))
        .routes(routes!(packages::list_versions, packages::publish_version))
        .routes(routes!(me::dashboard))
        .routes(routes!(me::update_settings))
        .routes(routes!(me::create_api_key))
        .routes(routes!(me::revoke_api_key))
        .routes(routes!(users::profile));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.license = Some(License::new(env!("CARGO_PKG_LICENSE")));

    OpenApiBuilder::new().info(info).build()
}

#[cfg(test)]
mod tests {
    use super::openapi;

    #[test]
    fn openapi_document_lists_core_paths() {
        let doc = openapi();
        let paths = &doc.paths.paths;

        for path in [
            "/health",
            "/auth/github",
            "/auth/github/callback",
            "/auth/status",
            "/auth/logout",
            "/auth/cli/code",
            "/auth/cli/exchange",
            "/stats",
            "/packages",
            "/packages/{name}",
            "/packages/{name}/versions",
            "/me",
            "/me/settings",
            "/me/api-key",
            "/me/api-key/{id}",
            "/users/{login}",
        ] {
            assert!(paths.contains_key(path), "missing path: {path}");
        }
    }

    #[test]
    fn openapi_info_comes_from_cargo_metadata() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
    }
}
