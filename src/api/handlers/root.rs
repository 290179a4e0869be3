use axum::{response::IntoResponse, Json};

/// Service banner for `/`.
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
