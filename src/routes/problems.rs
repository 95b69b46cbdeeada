use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::extractors::VerifiedUser;
use crate::forum::problems::NewProblem;
use crate::forum::ProblemStore;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/forums/{id}/problems",
        get(list_problems).post(create_problem),
    )
}

/// Drafts are personal, not forum-scoped, so they sit outside the
/// /forums gate.
pub fn drafts_router() -> Router<AppState> {
    Router::new().route("/drafts", get(my_drafts))
}

/// GET /forums/{id}/problems
async fn list_problems(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
) -> AppResult<Response> {
    let problems = ProblemStore::new(state.db.clone()).list(&forum_id, &user.0.id)?;
    Ok(Json(problems).into_response())
}

/// POST /forums/{id}/problems
async fn create_problem(
    State(state): State<AppState>,
    user: VerifiedUser,
    Path(forum_id): Path<String>,
    Json(req): Json<NewProblem>,
) -> AppResult<Response> {
    let problem = ProblemStore::new(state.db.clone()).create(&forum_id, &user.0.id, req)?;
    Ok((StatusCode::CREATED, Json(problem)).into_response())
}

/// GET /drafts
async fn my_drafts(State(state): State<AppState>, user: VerifiedUser) -> AppResult<Response> {
    let drafts = ProblemStore::new(state.db.clone()).drafts(&user.0.id)?;
    Ok(Json(drafts).into_response())
}
