use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;

pub mod auth;
pub mod forums;
pub mod home;
pub mod invites;
pub mod messages;
pub mod notifications;
pub mod presence;
pub mod problems;
pub mod settings;

/// Gate for everything under /forums. Flipping `forums_enabled` off turns
/// the whole area into 403s without a restart.
pub async fn require_forums_enabled(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.settings.forums_enabled().await {
        return AppError::Forbidden("Forums are currently disabled".into()).into_response();
    }
    next.run(request).await
}
