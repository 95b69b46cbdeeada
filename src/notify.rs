// In-app notifications. Delivery is fire-and-forget: failures are logged
// and swallowed so a missed notification never aborts the transition that
// produced it.
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::settings::SettingsStore;
use crate::state::DbPool;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Returns the stored row id, or None when
    /// delivery was skipped or failed.
    async fn notify(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Option<i64>;

    /// Remove the invitee's pending-invitation notification once the
    /// invitation itself is gone.
    async fn purge_invitation(&self, user_id: &str, invitation_id: &str);

    /// Remove the creator's pending-request notification once the request
    /// itself is gone.
    async fn purge_join_request(&self, user_id: &str, request_id: &str);

    async fn forum_invitation(
        &self,
        invitee_id: &str,
        forum_id: &str,
        forum_title: &str,
        invitation_id: &str,
        inviter_name: &str,
    ) {
        self.notify(
            invitee_id,
            "forum_invitation",
            "Forum Invitation",
            &format!("{} invited you to join '{}'", inviter_name, forum_title),
            Some(json!({
                "forum_id": forum_id,
                "invitation_id": invitation_id,
                "inviter_name": inviter_name,
                "forum_title": forum_title,
            })),
        )
        .await;
    }

    async fn invitation_accepted(
        &self,
        inviter_id: &str,
        forum_id: &str,
        forum_title: &str,
        invitee_name: &str,
    ) {
        self.notify(
            inviter_id,
            "forum_invitation_accepted",
            "Invitation Accepted",
            &format!(
                "{} accepted your invitation to '{}'",
                invitee_name, forum_title
            ),
            Some(json!({
                "forum_id": forum_id,
                "forum_title": forum_title,
                "invitee_name": invitee_name,
            })),
        )
        .await;
    }

    async fn join_request(
        &self,
        creator_id: &str,
        forum_id: &str,
        forum_title: &str,
        request_id: &str,
        requester_name: &str,
    ) {
        self.notify(
            creator_id,
            "forum_join_request",
            "Join Request",
            &format!("{} wants to join '{}'", requester_name, forum_title),
            Some(json!({
                "forum_id": forum_id,
                "request_id": request_id,
                "requester_name": requester_name,
                "forum_title": forum_title,
            })),
        )
        .await;
    }

    async fn join_request_accepted(&self, requester_id: &str, forum_id: &str, forum_title: &str) {
        self.notify(
            requester_id,
            "forum_join_request_accepted",
            "Request Accepted",
            &format!("Your request to join '{}' has been accepted", forum_title),
            Some(json!({ "forum_id": forum_id, "forum_title": forum_title })),
        )
        .await;
    }

    async fn join_request_declined(&self, requester_id: &str, forum_id: &str, forum_title: &str) {
        self.notify(
            requester_id,
            "forum_join_request_declined",
            "Request Declined",
            &format!("Your request to join '{}' has been declined", forum_title),
            Some(json!({ "forum_id": forum_id, "forum_title": forum_title })),
        )
        .await;
    }

    async fn forum_deleted(&self, member_id: &str, forum_title: &str, creator_name: &str) {
        self.notify(
            member_id,
            "forum_deleted",
            "Forum Deleted",
            &format!(
                "The forum '{}' created by {} has been deleted",
                forum_title, creator_name
            ),
            Some(json!({ "forum_title": forum_title })),
        )
        .await;
    }
}

pub type DynNotifier = Arc<dyn Notifier>;

/// Stores notifications as rows, honoring the global toggle and the
/// per-user `forum_deleted` preference. Invitation and join-request kinds
/// are always delivered; the accept/decline flows depend on them.
pub struct SqliteNotifier {
    db: DbPool,
    settings: SettingsStore,
}

impl SqliteNotifier {
    pub fn new(db: DbPool, settings: SettingsStore) -> Self {
        Self { db, settings }
    }

    fn insert(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        data: Option<&serde_json::Value>,
    ) -> AppResult<Option<i64>> {
        let conn = self.db.get()?;
        if kind == "forum_deleted" && !wants_forum_deleted(&conn, user_id)? {
            return Ok(None);
        }
        let data_json = match data {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        conn.execute(
            "INSERT INTO notifications (user_id, kind, title, message, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, kind, title, message, data_json],
        )?;
        Ok(Some(conn.last_insert_rowid()))
    }

    fn purge(&self, user_id: &str, kind: &str, data_field: &str, id: &str) -> AppResult<usize> {
        let conn = self.db.get()?;
        let deleted = conn.execute(
            &format!(
                "DELETE FROM notifications
                 WHERE user_id = ?1 AND kind = ?2 AND json_extract(data, '$.{}') = ?3",
                data_field
            ),
            params![user_id, kind, id],
        )?;
        Ok(deleted)
    }
}

#[async_trait]
impl Notifier for SqliteNotifier {
    async fn notify(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Option<i64> {
        if !self.settings.in_app_notifications_enabled().await {
            return None;
        }
        match self.insert(user_id, kind, title, message, data.as_ref()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to deliver {} notification to {}: {}", kind, user_id, e);
                None
            }
        }
    }

    async fn purge_invitation(&self, user_id: &str, invitation_id: &str) {
        if let Err(e) = self.purge(user_id, "forum_invitation", "invitation_id", invitation_id) {
            tracing::warn!("Failed to purge invitation notification: {}", e);
        }
    }

    async fn purge_join_request(&self, user_id: &str, request_id: &str) {
        if let Err(e) = self.purge(user_id, "forum_join_request", "request_id", request_id) {
            tracing::warn!("Failed to purge join-request notification: {}", e);
        }
    }
}

fn wants_forum_deleted(conn: &rusqlite::Connection, user_id: &str) -> AppResult<bool> {
    let enabled: Option<bool> = conn
        .query_row(
            "SELECT forum_deleted FROM notification_preferences WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    // No row means the user never touched their preferences
    Ok(enabled.unwrap_or(true))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub forum_deleted: bool,
}

/// Read side: listing, read marks and preferences.
pub struct NotificationStore {
    db: DbPool,
}

impl NotificationStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Newest first. `unread_only` narrows to unread rows.
    pub fn list(&self, user_id: &str, unread_only: bool) -> AppResult<Vec<Notification>> {
        let conn = self.db.get()?;
        let sql = if unread_only {
            "SELECT id, user_id, kind, title, message, data, is_read, created_at
             FROM notifications WHERE user_id = ?1 AND is_read = 0
             ORDER BY created_at DESC, id DESC"
        } else {
            "SELECT id, user_id, kind, title, message, data, is_read, created_at
             FROM notifications WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![user_id], map_notification_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn unread_count(&self, user_id: &str) -> AppResult<i64> {
        let conn = self.db.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn mark_read(&self, user_id: &str, notification_id: i64) -> AppResult<()> {
        let conn = self.db.get()?;
        let updated = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![notification_id, user_id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound("Notification not found".into()));
        }
        Ok(())
    }

    pub fn mark_all_read(&self, user_id: &str) -> AppResult<usize> {
        let conn = self.db.get()?;
        let updated = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
        )?;
        Ok(updated)
    }

    pub fn preferences(&self, user_id: &str) -> AppResult<NotificationPreferences> {
        let conn = self.db.get()?;
        let forum_deleted = wants_forum_deleted(&conn, user_id)?;
        Ok(NotificationPreferences { forum_deleted })
    }

    pub fn set_preferences(
        &self,
        user_id: &str,
        prefs: NotificationPreferences,
    ) -> AppResult<NotificationPreferences> {
        let conn = self.db.get()?;
        conn.execute(
            "INSERT INTO notification_preferences (user_id, forum_deleted)
             VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET forum_deleted = excluded.forum_deleted",
            params![user_id, prefs.forum_deleted],
        )?;
        Ok(prefs)
    }
}

fn map_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let raw: Option<String> = row.get(5)?;
    let data = match raw {
        Some(s) => Some(serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        data,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    async fn create_test_notifier() -> (SqliteNotifier, NotificationStore, DbPool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        let settings = SettingsStore::new(pool.clone()).await.unwrap();
        let notifier = SqliteNotifier::new(pool.clone(), settings);
        let store = NotificationStore::new(pool.clone());
        (notifier, store, pool, temp_dir)
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

    #[tokio::test]
    async fn notify_stores_a_row_with_its_payload() {
        let (notifier, store, pool, _tmp) = create_test_notifier().await;
        let user = seed_user(&pool, "alice");

        let id = notifier
            .notify(&user, "forum_invitation", "Forum Invitation", "hi", Some(json!({"k": 1})))
            .await;
        assert!(id.is_some());

        let listed = store.list(&user, false).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, "forum_invitation");
        assert_eq!(listed[0].data, Some(json!({"k": 1})));
        assert!(!listed[0].is_read);
    }

    #[tokio::test]
    async fn global_toggle_suppresses_delivery() {
        let (notifier, store, pool, _tmp) = create_test_notifier().await;
        let user = seed_user(&pool, "alice");
        notifier
            .settings
            .set("in_app_notifications_enabled", "false")
            .await
            .unwrap();

        let id = notifier
            .notify(&user, "forum_invitation", "t", "m", None)
            .await;
        assert!(id.is_none());
        assert!(store.list(&user, false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn forum_deleted_honors_the_user_preference() {
        let (notifier, store, pool, _tmp) = create_test_notifier().await;
        let user = seed_user(&pool, "alice");
        store
            .set_preferences(&user, NotificationPreferences { forum_deleted: false })
            .unwrap();

        notifier.forum_deleted(&user, "Old forum", "bob").await;
        assert!(store.list(&user, false).unwrap().is_empty());

        // Invitation kinds are not gated by that preference
        notifier
            .forum_invitation(&user, "f1", "Old forum", "inv1", "bob")
            .await;
        assert_eq!(store.list(&user, false).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invitation_emitter_builds_the_expected_copy() {
        let (notifier, store, pool, _tmp) = create_test_notifier().await;
        let user = seed_user(&pool, "alice");

        notifier
            .forum_invitation(&user, "f1", "Mechanics", "inv1", "bob")
            .await;

        let listed = store.list(&user, false).unwrap();
        assert_eq!(listed[0].title, "Forum Invitation");
        assert_eq!(listed[0].message, "bob invited you to join 'Mechanics'");
        let data = listed[0].data.as_ref().unwrap();
        assert_eq!(data["invitation_id"], "inv1");
        assert_eq!(data["forum_id"], "f1");
    }

    #[tokio::test]
    async fn purge_removes_only_the_matching_notification() {
        let (notifier, store, pool, _tmp) = create_test_notifier().await;
        let user = seed_user(&pool, "alice");

        notifier
            .forum_invitation(&user, "f1", "Mechanics", "inv1", "bob")
            .await;
        notifier
            .forum_invitation(&user, "f2", "Optics", "inv2", "bob")
            .await;

        notifier.purge_invitation(&user, "inv1").await;

        let listed = store.list(&user, false).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].data.as_ref().unwrap()["invitation_id"], "inv2");
    }

    #[tokio::test]
    async fn read_marks_and_unread_filter() {
        let (notifier, store, pool, _tmp) = create_test_notifier().await;
        let user = seed_user(&pool, "alice");
        let other = seed_user(&pool, "bob");

        let first = notifier.notify(&user, "k", "t", "one", None).await.unwrap();
        notifier.notify(&user, "k", "t", "two", None).await;
        notifier.notify(&other, "k", "t", "theirs", None).await;

        assert_eq!(store.unread_count(&user).unwrap(), 2);
        store.mark_read(&user, first).unwrap();
        assert_eq!(store.unread_count(&user).unwrap(), 1);
        assert_eq!(store.list(&user, true).unwrap().len(), 1);

        // Cannot mark someone else's notification
        let err = store.mark_read(&other, first).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert_eq!(store.mark_all_read(&user).unwrap(), 1);
        assert_eq!(store.unread_count(&user).unwrap(), 0);
    }

    #[tokio::test]
    async fn preferences_default_to_enabled_and_round_trip() {
        let (_notifier, store, pool, _tmp) = create_test_notifier().await;
        let user = seed_user(&pool, "alice");

        assert!(store.preferences(&user).unwrap().forum_deleted);
        store
            .set_preferences(&user, NotificationPreferences { forum_deleted: false })
            .unwrap();
        assert!(!store.preferences(&user).unwrap().forum_deleted);
    }
}
