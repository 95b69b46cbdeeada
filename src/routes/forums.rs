use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::Membership;
use crate::error::AppResult;
use crate::extractors::VerifiedUser;
use crate::forum::lifecycle::{ForumDetail, ForumUpdate, NewForum};
use crate::forum::{ForumStore, MembershipStore, Role};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/forums", get(list_forums).post(create_forum))
        .route(
            "/forums/{id}",
            get(get_forum).put(update_forum).delete(delete_forum),
        )
        .route("/forums/{id}/join", post(join_forum))
        .route("/forums/{id}/leave", delete(leave_forum))
        .route("/forums/{id}/members", get(list_members))
        .route("/forums/{id}/members/{user_id}", delete(kick_member))
        .route("/forums/{id}/members/{user_id}/ban", post(ban_member))
        .route("/forums/{id}/members/{user_id}/unban", post(unban_member))
        .route("/forums/{id}/members/{user_id}/role", put(assign_role))
}

/// A forum as the caller sees it: the listing fields plus their own
/// membership, if any.
#[derive(Serialize)]
struct ForumResponse {
    #[serde(flatten)]
    detail: ForumDetail,
    membership: Option<Membership>,
}

#[derive(Deserialize)]
struct RoleRequest {
    role: Role,
}

/// GET /forums
async fn list_forums(State(state): State<AppState>, user: VerifiedUser) -> AppResult<Response> {
    let forums = ForumStore::new(state.db.clone()).list_for(&user.0.id)?;
    Ok(Json(forums).into_response())
}

/// POST /forums
async fn create_forum(
    State(state): State<AppState>,
    user: VerifiedUser,
    Json(req): Json<NewForum>,
) -> AppResult<Response> {
    let detail = ForumStore::new(state.db.clone()).create(&user.0.id, req)?;
    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

/// GET /forums/{id}
async fn get_forum(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let detail = ForumStore::new(state.db.clone()).detail(&forum_id, &user.0.id)?;
    let membership = MembershipStore::new(state.db.clone()).membership(&forum_id, &user.0.id)?;
    Ok(Json(ForumResponse { detail, membership }).into_response())
}

/// PUT /forums/{id}
async fn update_forum(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
    Json(req): Json<ForumUpdate>,
) -> AppResult<Response> {
    let detail = ForumStore::new(state.db.clone()).update(&forum_id, &user.0.id, req)?;
    Ok(Json(detail).into_response())
}

/// DELETE /forums/{id}
/// Cascade delete, then tell every other member the forum is gone.
async fn delete_forum(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let deleted = ForumStore::new(state.db.clone()).delete(&forum_id, &user.0.id)?;
    for member_id in &deleted.member_ids {
        if member_id != &user.0.id {
            state
                .notifier
                .forum_deleted(member_id, &deleted.title, &user.0.username)
                .await;
        }
    }
    Ok(Json(serde_json::json!({
        "deleted": true,
        "drafts_created": deleted.drafts_created,
    }))
    .into_response())
}

/// POST /forums/{id}/join
async fn join_forum(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let membership = MembershipStore::new(state.db.clone()).join(&forum_id, &user.0.id)?;
    Ok((StatusCode::CREATED, Json(membership)).into_response())
}

/// DELETE /forums/{id}/leave
async fn leave_forum(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    MembershipStore::new(state.db.clone()).leave(&forum_id, &user.0.id)?;
    Ok(Json(serde_json::json!({ "left": true })).into_response())
}

/// GET /forums/{id}/members
async fn list_members(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let members = MembershipStore::new(state.db.clone()).members(&forum_id, &user.0.id)?;
    Ok(Json(members).into_response())
}

/// DELETE /forums/{id}/members/{user_id}
async fn kick_member(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, target_id)): Path<(String, String)>,
) -> AppResult<Response> {
    MembershipStore::new(state.db.clone()).kick(&forum_id, &user.0.id, &target_id)?;
    Ok(Json(serde_json::json!({ "kicked": true })).into_response())
}

/// POST /forums/{id}/members/{user_id}/ban
async fn ban_member(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, target_id)): Path<(String, String)>,
) -> AppResult<Response> {
    MembershipStore::new(state.db.clone()).ban(&forum_id, &user.0.id, &target_id)?;
    Ok(Json(serde_json::json!({ "banned": true })).into_response())
}

/// POST /forums/{id}/members/{user_id}/unban
async fn unban_member(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, target_id)): Path<(String, String)>,
) -> AppResult<Response> {
    MembershipStore::new(state.db.clone()).unban(&forum_id, &user.0.id, &target_id)?;
    Ok(Json(serde_json::json!({ "unbanned": true })).into_response())
}

/// PUT /forums/{id}/members/{user_id}/role
async fn assign_role(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, target_id)): Path<(String, String)>,
    Json(req): Json<RoleRequest>,
) -> AppResult<Response> {
    let membership =
        MembershipStore::new(state.db.clone()).assign_role(&forum_id, &user.0.id, &target_id, req.role)?;
    Ok(Json(membership).into_response())
}
