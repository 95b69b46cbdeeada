use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::VerifiedUser;
use crate::presence::PresenceStore;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/forums/{id}/presence", get(online).post(heartbeat))
}

#[derive(Deserialize)]
struct HeartbeatRequest {
    #[serde(default)]
    typing: bool,
}

/// POST /forums/{id}/presence
async fn heartbeat(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> AppResult<Response> {
    PresenceStore::new(state.db.clone(), state.config.presence.clone()).heartbeat(
        &forum_id,
        &user.0.id,
        req.typing,
    )?;
    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}

/// GET /forums/{id}/presence
async fn online(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let online =
        PresenceStore::new(state.db.clone(), state.config.presence.clone()).online(&forum_id, &user.0.id)?;
    Ok(Json(online).into_response())
}
