use std::time::Duration;

use tracing::{info, warn};

use crate::config::SweeperConfig;
use crate::error::AppResult;
use crate::state::DbPool;

/// Background task that prunes abandoned registrations and dead sessions,
/// and expires invitations nobody answered.
///
/// The first tick fires immediately, which doubles as a startup sweep.
pub async fn run_sweep_loop(db: DbPool, config: SweeperConfig) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_minutes * 60));

    loop {
        interval.tick().await;
        run_sweep(&db, &config);
    }
}

/// One full sweep. Each pass fails independently; a bad pass logs and the
/// others still run.
pub fn run_sweep(db: &DbPool, config: &SweeperConfig) {
    match remove_unverified_users(db, config.unverified_ttl_minutes) {
        Ok(count) if count > 0 => info!("Sweeper: removed {} unverified users", count),
        Ok(_) => {}
        Err(e) => warn!("Sweeper: unverified-user pass failed: {}", e),
    }
    match remove_expired_sessions(db) {
        Ok(count) if count > 0 => info!("Sweeper: removed {} expired sessions", count),
        Ok(_) => {}
        Err(e) => warn!("Sweeper: session pass failed: {}", e),
    }
    match expire_stale_invitations(db, config.invitation_ttl_days) {
        Ok(count) if count > 0 => info!("Sweeper: expired {} stale invitations", count),
        Ok(_) => {}
        Err(e) => warn!("Sweeper: invitation pass failed: {}", e),
    }
}

/// Registrations that never verified within the TTL. Their invitations go
/// too; nothing else can reference an unverified account.
fn remove_unverified_users(db: &DbPool, ttl_minutes: u64) -> AppResult<usize> {
    let conn = db.get()?;
    let cutoff = format!("-{} minutes", ttl_minutes);
    let doomed: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM users
             WHERE is_verified = 0 AND created_at < datetime('now', ?1)",
        )?;
        let rows = stmt.query_map([&cutoff], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    for user_id in &doomed {
        conn.execute(
            "DELETE FROM forum_invitations WHERE invitee_id = ?1",
            [user_id],
        )?;
        conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
    }
    Ok(doomed.len())
}

fn remove_expired_sessions(db: &DbPool) -> AppResult<usize> {
    let conn = db.get()?;
    let deleted = conn.execute("DELETE FROM sessions WHERE expires_at < datetime('now')", [])?;
    Ok(deleted)
}

/// Pending invitations older than the TTL flip to expired. That also
/// releases the pending-uniqueness slot, so the user can be re-invited.
fn expire_stale_invitations(db: &DbPool, ttl_days: u64) -> AppResult<usize> {
    let conn = db.get()?;
    let cutoff = format!("-{} days", ttl_days);
    let expired = conn.execute(
        "UPDATE forum_invitations
         SET status = 'expired', responded_at = datetime('now')
         WHERE status = 'pending' AND created_at < datetime('now', ?1)",
        [&cutoff],
    )?;
    Ok(expired)
}
