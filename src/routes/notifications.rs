use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::VerifiedUser;
use crate::notify::{NotificationPreferences, NotificationStore};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/{id}/read", post(mark_read))
        .route("/notifications/read-all", post(mark_all_read))
        .route(
            "/notifications/preferences",
            get(get_preferences).put(update_preferences),
        )
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    unread_only: bool,
}

/// GET /notifications?unread_only
async fn list_notifications(
    State(state): State<AppState>,
    user: VerifiedUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let store = NotificationStore::new(state.db.clone());
    let notifications = store.list(&user.0.id, query.unread_only)?;
    let unread_count = store.unread_count(&user.0.id)?;
    Ok(Json(serde_json::json!({
        "notifications": notifications,
        "unread_count": unread_count,
    }))
    .into_response())
}

/// POST /notifications/{id}/read
async fn mark_read(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(notification_id): Path<i64>,
) -> AppResult<Response> {
    NotificationStore::new(state.db.clone()).mark_read(&user.0.id, notification_id)?;
    Ok(Json(serde_json::json!({ "read": true })).into_response())
}

/// POST /notifications/read-all
async fn mark_all_read(State(state): State<AppState>, user: VerifiedUser) -> AppResult<Response> {
    let marked = NotificationStore::new(state.db.clone()).mark_all_read(&user.0.id)?;
    Ok(Json(serde_json::json!({ "marked": marked })).into_response())
}

/// GET /notifications/preferences
async fn get_preferences(State(state): State<AppState>, user: VerifiedUser) -> AppResult<Response> {
    let prefs = NotificationStore::new(state.db.clone()).preferences(&user.0.id)?;
    Ok(Json(prefs).into_response())
}

/// PUT /notifications/preferences
async fn update_preferences(
    State(state): State<AppState>,
    user: VerifiedUser,
    Json(req): Json<NotificationPreferences>,
) -> AppResult<Response> {
    let prefs = NotificationStore::new(state.db.clone()).set_preferences(&user.0.id, req)?;
    Ok(Json(prefs).into_response())
}
