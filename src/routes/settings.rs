use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings/features", get(feature_flags))
        .route("/settings", put(update_setting))
}

/// GET /settings/features
///
/// Public so clients can decide what to render before anyone logs in.
async fn feature_flags(State(state): State<AppState>) -> Response {
    let features = state.settings.features().await;
    Json(features).into_response()
}

#[derive(Deserialize)]
struct SettingRequest {
    key: String,
    value: String,
}

/// PUT /settings
async fn update_setting(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<SettingRequest>,
) -> AppResult<Response> {
    if !user.is_admin {
        return Err(AppError::Forbidden(
            "Only administrators can change settings".to_string(),
        ));
    }
    state.settings.set(&req.key, &req.value).await?;
    Ok(Json(serde_json::json!({ "key": req.key, "value": req.value })).into_response())
}
