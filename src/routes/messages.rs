use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::VerifiedUser;
use crate::forum::ChatStore;
use crate::forum::chat::NewMessage;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/forums/{id}/messages", get(list_messages).post(post_message))
        .route(
            "/forums/{id}/messages/{msg}/pin",
            post(pin_message).delete(unpin_message),
        )
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
    before: Option<String>,
}

/// GET /forums/{id}/messages?limit&before
async fn list_messages(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let messages = ChatStore::new(state.db.clone()).list(
        &forum_id,
        &user.0.id,
        query.limit,
        query.before.as_deref(),
    )?;
    Ok(Json(messages).into_response())
}

/// POST /forums/{id}/messages
async fn post_message(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
    Json(req): Json<NewMessage>,
) -> AppResult<Response> {
    let message = ChatStore::new(state.db.clone()).post(&forum_id, &user.0.id, req)?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

/// POST /forums/{id}/messages/{msg}/pin
async fn pin_message(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, message_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let message = ChatStore::new(state.db.clone()).pin(&forum_id, &message_id, &user.0.id)?;
    Ok(Json(message).into_response())
}

/// DELETE /forums/{id}/messages/{msg}/pin
async fn unpin_message(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, message_id)): Path<(String, String)>,
) -> AppResult<Response> {
    ChatStore::new(state.db.clone()).unpin(&forum_id, &message_id, &user.0.id)?;
    Ok(Json(serde_json::json!({ "unpinned": true })).into_response())
}
