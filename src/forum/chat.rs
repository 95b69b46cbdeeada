// Forum chat - posting, cursor-paged listing and the single pinned message
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::models::Message;
use crate::error::{AppError, AppResult};
use crate::forum::domain::{Capability, ForumError};
use crate::forum::{lifecycle, membership};
use crate::state::DbPool;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub body: String,
    #[serde(default)]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub author_username: String,
}

pub struct ChatStore {
    db: DbPool,
}

impl ChatStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Post a message. Optional anchors (a problem, a message being replied
    /// to) must live in the same forum.
    pub fn post(&self, forum_id: &str, author_id: &str, new: NewMessage) -> AppResult<MessageView> {
        if new.body.trim().is_empty() {
            return Err(AppError::BadRequest("Message body is required".into()));
        }

        let conn = self.db.get()?;
        lifecycle::get_forum(&conn, forum_id)?;
        membership::require_active(&conn, forum_id, author_id)?;

        if let Some(problem_id) = &new.problem_id {
            let known: Option<String> = conn
                .query_row(
                    "SELECT id FROM problems WHERE id = ?1 AND forum_id = ?2",
                    params![problem_id, forum_id],
                    |row| row.get(0),
                )
                .optional()?;
            if known.is_none() {
                return Err(AppError::BadRequest(
                    "problem_id does not reference a problem in this forum".into(),
                ));
            }
        }
        if let Some(reply_to_id) = &new.reply_to_id {
            let known: Option<String> = conn
                .query_row(
                    "SELECT id FROM forum_messages WHERE id = ?1 AND forum_id = ?2",
                    params![reply_to_id, forum_id],
                    |row| row.get(0),
                )
                .optional()?;
            if known.is_none() {
                return Err(AppError::BadRequest(
                    "reply_to_id does not reference a message in this forum".into(),
                ));
            }
        }

        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO forum_messages (id, forum_id, author_id, body, problem_id, reply_to_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, forum_id, author_id, new.body, new.problem_id, new.reply_to_id],
        )?;
        lifecycle::touch_activity(&conn, forum_id)?;
        self.load_view(&conn, forum_id, &id)
    }

    /// Newest first. `before` is a message id cursor: only messages older
    /// than it are returned, so clients page backwards through history.
    pub fn list(
        &self,
        forum_id: &str,
        caller_id: &str,
        limit: Option<i64>,
        before: Option<&str>,
    ) -> AppResult<Vec<MessageView>> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        membership::require_viewer(&conn, &forum, caller_id)?;

        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let cursor = match before {
            Some(id) => {
                let anchor: Option<(String, String)> = conn
                    .query_row(
                        "SELECT created_at, id FROM forum_messages
                         WHERE id = ?1 AND forum_id = ?2",
                        params![id, forum_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                Some(anchor.ok_or_else(|| AppError::BadRequest("Unknown cursor".into()))?)
            }
            None => None,
        };

        let mut views = Vec::new();
        match cursor {
            Some((created_at, id)) => {
                let mut stmt = conn.prepare(
                    "SELECT m.id, m.forum_id, m.author_id, m.body, m.problem_id, m.reply_to_id,
                            m.is_pinned, m.created_at, u.username
                     FROM forum_messages m
                     JOIN users u ON u.id = m.author_id
                     WHERE m.forum_id = ?1
                       AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(params![forum_id, created_at, id, limit], map_view)?;
                for row in rows {
                    views.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT m.id, m.forum_id, m.author_id, m.body, m.problem_id, m.reply_to_id,
                            m.is_pinned, m.created_at, u.username
                     FROM forum_messages m
                     JOIN users u ON u.id = m.author_id
                     WHERE m.forum_id = ?1
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![forum_id, limit], map_view)?;
                for row in rows {
                    views.push(row?);
                }
            }
        }
        Ok(views)
    }

    /// Pin a message, unpinning whatever held the slot. One transaction so
    /// the one-pin index never fires.
    pub fn pin(&self, forum_id: &str, message_id: &str, caller_id: &str) -> AppResult<MessageView> {
        let conn = self.db.get()?;
        lifecycle::get_forum(&conn, forum_id)?;
        membership::require_capability(&conn, forum_id, caller_id, Capability::Pin)?;

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result: AppResult<()> = (|| {
            conn.execute(
                "UPDATE forum_messages SET is_pinned = 0 WHERE forum_id = ?1 AND is_pinned = 1",
                params![forum_id],
            )?;
            let updated = conn.execute(
                "UPDATE forum_messages SET is_pinned = 1 WHERE id = ?1 AND forum_id = ?2",
                params![message_id, forum_id],
            )?;
            if updated == 0 {
                return Err(AppError::NotFound("Message not found".into()));
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                self.load_view(&conn, forum_id, message_id)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    pub fn unpin(&self, forum_id: &str, message_id: &str, caller_id: &str) -> AppResult<()> {
        let conn = self.db.get()?;
        lifecycle::get_forum(&conn, forum_id)?;
        membership::require_capability(&conn, forum_id, caller_id, Capability::Pin)?;

        let updated = conn.execute(
            "UPDATE forum_messages SET is_pinned = 0
             WHERE id = ?1 AND forum_id = ?2 AND is_pinned = 1",
            params![message_id, forum_id],
        )?;
        if updated == 0 {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM forum_messages WHERE id = ?1 AND forum_id = ?2",
                    params![message_id, forum_id],
                    |row| row.get(0),
                )
                .optional()?;
            return match exists {
                Some(_) => Err(ForumError::NotPinned.into()),
                None => Err(AppError::NotFound("Message not found".into())),
            };
        }
        Ok(())
    }

    fn load_view(&self, conn: &Connection, forum_id: &str, message_id: &str) -> AppResult<MessageView> {
        conn.query_row(
            "SELECT m.id, m.forum_id, m.author_id, m.body, m.problem_id, m.reply_to_id,
                    m.is_pinned, m.created_at, u.username
             FROM forum_messages m
             JOIN users u ON u.id = m.author_id
             WHERE m.id = ?1 AND m.forum_id = ?2",
            params![message_id, forum_id],
            map_view,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("Message not found".into()))
    }
}

fn map_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        message: Message {
            id: row.get(0)?,
            forum_id: row.get(1)?,
            author_id: row.get(2)?,
            body: row.get(3)?,
            problem_id: row.get(4)?,
            reply_to_id: row.get(5)?,
            is_pinned: row.get(6)?,
            created_at: row.get(7)?,
        },
        author_username: row.get(8)?,
    })
}
