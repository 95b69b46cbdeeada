use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::VerifiedUser;
use crate::forum::InviteStore;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/forums/{id}/invitations",
            get(list_invitations).post(create_invitation),
        )
        .route("/forums/{id}/invitations/{inv}/accept", post(accept_invitation))
        .route(
            "/forums/{id}/invitations/{inv}/decline",
            post(decline_invitation),
        )
        .route("/forums/{id}/invitations/{inv}", delete(cancel_invitation))
        .route(
            "/forums/{id}/join-requests",
            get(list_join_requests)
                .post(create_join_request)
                .delete(retract_join_request),
        )
        .route(
            "/forums/{id}/join-requests/{req}/accept",
            post(accept_join_request),
        )
        .route(
            "/forums/{id}/join-requests/{req}/decline",
            post(decline_join_request),
        )
}

/// The caller-scoped listing lives outside the /forums gate.
pub fn user_router() -> Router<AppState> {
    Router::new().route("/invitations", get(my_invitations))
}

#[derive(Deserialize)]
struct InviteRequest {
    username: String,
}

/// POST /forums/{id}/invitations
async fn create_invitation(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
    Json(req): Json<InviteRequest>,
) -> AppResult<Response> {
    let sent = InviteStore::new(state.db.clone()).invite(&forum_id, &user.0.id, &req.username)?;
    state
        .notifier
        .forum_invitation(
            &sent.invitation.invitee_id,
            &forum_id,
            &sent.forum_title,
            &sent.invitation.id,
            &user.0.username,
        )
        .await;
    Ok((StatusCode::CREATED, Json(sent.invitation)).into_response())
}

/// GET /forums/{id}/invitations
async fn list_invitations(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let pending = InviteStore::new(state.db.clone()).pending_invitations(&forum_id, &user.0.id)?;
    Ok(Json(pending).into_response())
}

/// POST /forums/{id}/invitations/{inv}/accept
async fn accept_invitation(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, invitation_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let accepted =
        InviteStore::new(state.db.clone()).accept_invitation(&forum_id, &invitation_id, &user.0.id)?;
    state
        .notifier
        .invitation_accepted(
            &accepted.inviter_id,
            &accepted.forum_id,
            &accepted.forum_title,
            &user.0.username,
        )
        .await;
    Ok(Json(accepted.membership).into_response())
}

/// POST /forums/{id}/invitations/{inv}/decline
async fn decline_invitation(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, invitation_id)): Path<(String, String)>,
) -> AppResult<Response> {
    InviteStore::new(state.db.clone()).decline_invitation(&forum_id, &invitation_id, &user.0.id)?;
    Ok(Json(serde_json::json!({ "declined": true })).into_response())
}

/// DELETE /forums/{id}/invitations/{inv}
/// Withdraw a pending invitation and pull back its notification.
async fn cancel_invitation(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, invitation_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let canceled =
        InviteStore::new(state.db.clone()).cancel_invitation(&forum_id, &invitation_id, &user.0.id)?;
    state
        .notifier
        .purge_invitation(&canceled.invitee_id, &canceled.invitation_id)
        .await;
    Ok(Json(serde_json::json!({ "canceled": true })).into_response())
}

/// GET /invitations
async fn my_invitations(State(state): State<AppState>, user: VerifiedUser) -> AppResult<Response> {
    let mine = InviteStore::new(state.db.clone()).my_invitations(&user.0.id)?;
    Ok(Json(mine).into_response())
}

/// POST /forums/{id}/join-requests
async fn create_join_request(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let sent = InviteStore::new(state.db.clone()).request_join(&forum_id, &user.0.id)?;
    state
        .notifier
        .join_request(
            &sent.creator_id,
            &forum_id,
            &sent.forum_title,
            &sent.request.id,
            &user.0.username,
        )
        .await;
    Ok((StatusCode::CREATED, Json(sent.request)).into_response())
}

/// GET /forums/{id}/join-requests
async fn list_join_requests(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let pending = InviteStore::new(state.db.clone()).pending_requests(&forum_id, &user.0.id)?;
    Ok(Json(pending).into_response())
}

/// POST /forums/{id}/join-requests/{req}/accept
async fn accept_join_request(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, request_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let accepted =
        InviteStore::new(state.db.clone()).accept_request(&forum_id, &request_id, &user.0.id)?;
    state
        .notifier
        .join_request_accepted(&accepted.requester_id, &accepted.forum_id, &accepted.forum_title)
        .await;
    Ok(Json(accepted.membership).into_response())
}

/// POST /forums/{id}/join-requests/{req}/decline
async fn decline_join_request(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path((forum_id, request_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let declined =
        InviteStore::new(state.db.clone()).decline_request(&forum_id, &request_id, &user.0.id)?;
    state
        .notifier
        .join_request_declined(&declined.requester_id, &declined.forum_id, &declined.forum_title)
        .await;
    Ok(Json(serde_json::json!({ "declined": true })).into_response())
}

/// DELETE /forums/{id}/join-requests
/// Withdraw the caller's own pending request and pull back the creator's
/// notification.
async fn retract_join_request(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let retracted = InviteStore::new(state.db.clone()).retract_request(&forum_id, &user.0.id)?;
    state
        .notifier
        .purge_join_request(&retracted.creator_id, &retracted.request_id)
        .await;
    Ok(Json(serde_json::json!({ "retracted": true })).into_response())
}
