// Presence heartbeats. Clients poll; a member is online while their last
// heartbeat is within the cutoff, typing within the shorter one.
use rusqlite::params;
use serde::Serialize;

use crate::config::PresenceConfig;
use crate::error::AppResult;
use crate::forum::{lifecycle, membership};
use crate::state::DbPool;

#[derive(Debug, Clone, Serialize)]
pub struct PresenceView {
    pub user_id: String,
    pub username: String,
    pub is_typing: bool,
    pub last_seen_at: String,
}

pub struct PresenceStore {
    db: DbPool,
    config: PresenceConfig,
}

impl PresenceStore {
    pub fn new(db: DbPool, config: PresenceConfig) -> Self {
        Self { db, config }
    }

    pub fn heartbeat(&self, forum_id: &str, user_id: &str, typing: bool) -> AppResult<()> {
        let conn = self.db.get()?;
        lifecycle::get_forum(&conn, forum_id)?;
        membership::require_active(&conn, forum_id, user_id)?;

        conn.execute(
            "INSERT INTO forum_presence (forum_id, user_id, last_seen_at, is_typing)
             VALUES (?1, ?2, datetime('now'), ?3)
             ON CONFLICT(forum_id, user_id) DO UPDATE SET
               last_seen_at = excluded.last_seen_at,
               is_typing = excluded.is_typing",
            params![forum_id, user_id, typing],
        )?;
        Ok(())
    }

    /// Members seen within the online cutoff. The typing flag only holds
    /// within the (shorter) typing cutoff, so an abandoned "typing"
    /// heartbeat goes quiet on its own.
    pub fn online(&self, forum_id: &str, caller_id: &str) -> AppResult<Vec<PresenceView>> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        membership::require_viewer(&conn, &forum, caller_id)?;

        let online_cutoff = format!("-{} seconds", self.config.online_cutoff_secs);
        let typing_cutoff = format!("-{} seconds", self.config.typing_cutoff_secs);
        let mut stmt = conn.prepare(
            "SELECT p.user_id, u.username, p.last_seen_at,
                    p.is_typing AND p.last_seen_at >= datetime('now', ?2)
             FROM forum_presence p
             JOIN users u ON u.id = p.user_id
             WHERE p.forum_id = ?1 AND p.last_seen_at >= datetime('now', ?3)
             ORDER BY u.username",
        )?;
        let rows = stmt.query_map(params![forum_id, typing_cutoff, online_cutoff], |row| {
            Ok(PresenceView {
                user_id: row.get(0)?,
                username: row.get(1)?,
                last_seen_at: row.get(2)?,
                is_typing: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::AppError;
    use crate::forum::lifecycle::{ForumStore, NewForum};
    use tempfile::TempDir;

    fn create_test_store() -> (PresenceStore, DbPool, TempDir) {
        let tmp = TempDir::new().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        let store = PresenceStore::new(pool.clone(), PresenceConfig::default());
        (store, pool, tmp)
    }

    fn seed_user(pool: &DbPool, username: &str) -> String {
        let id = uuid::Uuid::now_v7().to_string();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, is_verified)
             VALUES (?1, ?2, ?3, 'hash', 1)",
            params![id, username, format!("{}@example.com", username)],
        )
        .unwrap();
        id
    }

    fn seed_forum(pool: &DbPool, creator: &str) -> String {
        ForumStore::new(pool.clone())
            .create(
                creator,
                NewForum {
                    title: "Hangout".into(),
                    description: String::new(),
                    is_private: false,
                    max_members: 10,
                    subject: "math".into(),
                    level: None,
                    tags: None,
                },
            )
            .unwrap()
            .forum
            .id
    }

    #[test]
    fn heartbeat_upserts_a_single_row() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let forum = seed_forum(&pool, &creator);

        store.heartbeat(&forum, &creator, false).unwrap();
        store.heartbeat(&forum, &creator, true).unwrap();

        let conn = pool.get().unwrap();
        let (count, typing): (i64, bool) = conn
            .query_row(
                "SELECT COUNT(*), MAX(is_typing) FROM forum_presence WHERE forum_id = ?1",
                params![forum],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!(typing);

        let online = store.online(&forum, &creator).unwrap();
        assert_eq!(online.len(), 1);
        assert!(online[0].is_typing);
    }

    #[test]
    fn heartbeat_requires_an_active_membership() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let outsider = seed_user(&pool, "outsider");
        let forum = seed_forum(&pool, &creator);

        let err = store.heartbeat(&forum, &outsider, false).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn stale_heartbeats_drop_out_of_the_online_list() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let member = seed_user(&pool, "member");
        let forum = seed_forum(&pool, &creator);

        let conn = pool.get().unwrap();
        crate::forum::membership::activate_membership(&conn, &forum, &member, 10).unwrap();
        // Seen two minutes ago, past the one-minute cutoff
        conn.execute(
            "INSERT INTO forum_presence (forum_id, user_id, last_seen_at, is_typing)
             VALUES (?1, ?2, datetime('now', '-120 seconds'), 0)",
            params![forum, member],
        )
        .unwrap();
        drop(conn);

        store.heartbeat(&forum, &creator, false).unwrap();
        let online = store.online(&forum, &creator).unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].username, "creator");
    }

    #[test]
    fn typing_expires_before_online_does() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let forum = seed_forum(&pool, &creator);

        // Typing heartbeat from 30s ago: still online, no longer typing
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO forum_presence (forum_id, user_id, last_seen_at, is_typing)
             VALUES (?1, ?2, datetime('now', '-30 seconds'), 1)",
            params![forum, creator],
        )
        .unwrap();
        drop(conn);

        let online = store.online(&forum, &creator).unwrap();
        assert_eq!(online.len(), 1);
        assert!(!online[0].is_typing);
    }
}
