use axum::response::{IntoResponse, Response};
use axum::Json;

/// GET /
///
/// Service banner for health checks and client version pinning.
pub async fn index() -> Response {
    Json(serde_json::json!({
        "name": "pioneers",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
    .into_response()
}
