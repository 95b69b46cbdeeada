use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::session;
use crate::error::{AppError, AppResult};
use crate::extractors::{bearer_token, CurrentUser};
use crate::forum::is_unique_violation;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub verification_required: bool,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Serialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub is_admin: bool,
    pub is_verified: bool,
    pub created_at: String,
}

/// POST /auth/register
/// Creates an unverified account and logs the verification code. The code
/// would go out by email in a full deployment; here the log line is the
/// delivery channel.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Response> {
    if !state.settings.registration_enabled().await {
        return Err(AppError::Forbidden("Registration is currently disabled".into()));
    }

    let username = req.username.trim();
    if username.len() < 3 {
        return Err(AppError::BadRequest(
            "Username must be at least 3 characters".into(),
        ));
    }
    if !req.email.contains('@') {
        return Err(AppError::BadRequest("A valid email address is required".into()));
    }
    if req.password.len() < 8 {
        return Err(AppError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;
    let id = uuid::Uuid::now_v7().to_string();
    let code = generate_verification_code();

    let conn = state.db.get()?;
    let inserted = conn.execute(
        "INSERT INTO users (id, username, email, password_hash, verification_code, verification_expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, datetime('now', ?6))",
        params![
            id,
            username,
            req.email,
            password_hash,
            code,
            format!("+{} minutes", state.config.auth.verification_minutes)
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(ref e) if is_unique_violation(e) => {
            return Err(AppError::Conflict("Username or email already in use".into()));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Verification code for {}: {}", req.email, code);

    let response = RegisterResponse {
        id,
        username: username.to_string(),
        email: req.email,
        verification_required: true,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// POST /auth/verify
/// Confirms the emailed code and unlocks the account.
pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let row: Option<(String, bool, Option<String>)> = conn
        .query_row(
            "SELECT id, is_verified, verification_code FROM users
             WHERE email = ?1 AND (verification_expires_at IS NULL
                                   OR verification_expires_at > datetime('now'))",
            params![req.email],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (user_id, is_verified, stored_code) = row.ok_or_else(|| {
        AppError::BadRequest("Invalid or expired verification code".into())
    })?;
    if is_verified {
        return Err(AppError::Conflict("This account is already verified".into()));
    }
    if stored_code.as_deref() != Some(req.code.as_str()) {
        return Err(AppError::BadRequest(
            "Invalid or expired verification code".into(),
        ));
    }

    conn.execute(
        "UPDATE users SET is_verified = 1, verification_code = NULL,
                          verification_expires_at = NULL
         WHERE id = ?1",
        params![user_id],
    )?;
    tracing::info!("User {} verified", user_id);
    Ok(Json(serde_json::json!({ "verified": true })).into_response())
}

/// POST /auth/login
/// Password check plus a fresh session token. Wrong email and wrong
/// password are indistinguishable to the caller.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?1",
            params![req.email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    drop(conn);

    let (user_id, password_hash) = row.ok_or(AppError::Unauthorized)?;
    if !bcrypt::verify(&req.password, &password_hash).unwrap_or(false) {
        return Err(AppError::Unauthorized);
    }

    let token = session::create_session(&state.db, &user_id, state.config.auth.session_hours)?;
    let user = load_profile(&state, &user_id)?;
    tracing::info!("User {} logged in", user_id);
    Ok(Json(LoginResponse { token, user }).into_response())
}

/// POST /auth/logout
/// Deletes the presented session. Idempotent.
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
) -> AppResult<Response> {
    if let Some(token) = bearer_token(&headers) {
        session::delete_session(&state.db, token)?;
    }
    tracing::info!("User {} logged out", user.id);
    Ok(Json(serde_json::json!({ "logged_out": true })).into_response())
}

/// GET /auth/me
/// The caller's own profile; works before verification so clients can
/// show the pending state.
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let profile = load_profile(&state, &user.id)?;
    Ok(Json(profile).into_response())
}

fn load_profile(state: &AppState, user_id: &str) -> AppResult<UserProfile> {
    let conn = state.db.get()?;
    conn.query_row(
        "SELECT id, username, email, bio, is_admin, is_verified, created_at
         FROM users WHERE id = ?1",
        params![user_id],
        |row| {
            Ok(UserProfile {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                bio: row.get(3)?,
                is_admin: row.get(4)?,
                is_verified: row.get(5)?,
                created_at: row.get(6)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("User not found".into()))
}

fn generate_verification_code() -> String {
    rand::thread_rng().gen_range(100000..=999999).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_codes_are_six_digits() {
        for _ in 0..20 {
            let code = generate_verification_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
