mod auth;
mod config;
mod db;
mod error;
mod extractors;
mod forum;
mod notify;
mod presence;
mod routes;
mod settings;
mod state;
mod sweeper;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use rusqlite::params;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Config};
use crate::notify::SqliteNotifier;
use crate::settings::SettingsStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    let settings = SettingsStore::new(pool.clone()).await?;
    let notifier = Arc::new(SqliteNotifier::new(pool.clone(), settings.clone()));

    // Build app state
    let state = AppState {
        db: pool.clone(),
        config: config.clone(),
        settings,
        notifier,
    };

    // Everything under /forums sits behind the runtime feature flag
    let forum_routes = Router::new()
        .merge(routes::forums::router())
        .merge(routes::invites::router())
        .merge(routes::messages::router())
        .merge(routes::problems::router())
        .merge(routes::presence::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::require_forums_enabled,
        ));

    // Build router
    let mut app = Router::new()
        .route("/", get(routes::home::index))
        .merge(routes::auth::router())
        .merge(forum_routes)
        .merge(routes::invites::user_router())
        .merge(routes::problems::drafts_router())
        .merge(routes::notifications::router())
        .merge(routes::settings::router());

    // Test-only seed endpoint: creates a verified admin + session, returns a bearer token
    if std::env::var("PIONEERS_TEST_SEED").is_ok() {
        app = app.route("/test/seed", get(test_seed));
    }

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Periodic cleanup runs for the life of the process
    tokio::spawn(sweeper::run_sweep_loop(pool, config.sweeper.clone()));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Test-only: seed a verified admin user + session and return a bearer token.
/// Only mounted when PIONEERS_TEST_SEED env var is set.
async fn test_seed(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.get().unwrap();
    let user_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT OR IGNORE INTO users (id, username, email, password_hash, is_admin, is_verified)
         VALUES (?1, 'testuser', 'testuser@example.com', '', 1, 1)",
        params![user_id],
    )
    .unwrap();

    // Get the actual user id (may already exist from previous seed call)
    let uid: String = conn
        .query_row(
            "SELECT id FROM users WHERE username = 'testuser'",
            [],
            |r| r.get(0),
        )
        .unwrap();

    let token =
        auth::session::create_session(&state.db, &uid, state.config.auth.session_hours).unwrap();

    (
        StatusCode::OK,
        format!(
            "{{\"user_id\":\"{}\",\"username\":\"testuser\",\"token\":\"{}\"}}",
            uid, token
        ),
    )
}
