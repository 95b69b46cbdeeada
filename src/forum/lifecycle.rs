// Forum lifecycle - create/update/list and the cascading delete
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::models::{Forum, Problem};
use crate::error::{AppError, AppResult};
use crate::forum::domain::{ForumError, Role};
use crate::forum::membership;
use crate::state::DbPool;

#[derive(Debug, Clone, Deserialize)]
pub struct NewForum {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default = "default_max_members")]
    pub max_members: i64,
    pub subject: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

fn default_max_members() -> i64 {
    50
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForumUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub level: Option<String>,
    pub tags: Option<String>,
    pub max_members: Option<i64>,
    pub is_private: Option<bool>,
}

/// Forum row plus the join fields every listing needs.
#[derive(Debug, Clone, Serialize)]
pub struct ForumDetail {
    #[serde(flatten)]
    pub forum: Forum,
    pub creator_username: String,
    pub member_count: i64,
}

/// What the delete cascade leaves behind for the notification fan-out.
#[derive(Debug)]
pub struct DeletedForum {
    pub title: String,
    pub member_ids: Vec<String>,
    pub drafts_created: usize,
}

pub struct ForumStore {
    db: DbPool,
}

impl ForumStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Insert the forum and its creator membership in one transaction.
    pub fn create(&self, creator_id: &str, new: NewForum) -> AppResult<ForumDetail> {
        validate_title_subject(Some(&new.title), Some(&new.subject))?;
        if new.max_members < 1 {
            return Err(AppError::BadRequest("max_members must be at least 1".into()));
        }

        let conn = self.db.get()?;
        let id = uuid::Uuid::now_v7().to_string();

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result: AppResult<()> = (|| {
            conn.execute(
                "INSERT INTO forums (id, title, description, creator_id, is_private, max_members, subject, level, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    new.title,
                    new.description,
                    creator_id,
                    new.is_private,
                    new.max_members,
                    new.subject,
                    new.level,
                    new.tags
                ],
            )?;
            membership::insert_membership(&conn, &id, creator_id, Role::Creator)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                tracing::info!("Forum {} created by {}", id, creator_id);
                self.detail_with_conn(&conn, &id)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    pub fn get(&self, forum_id: &str) -> AppResult<Forum> {
        let conn = self.db.get()?;
        get_forum(&conn, forum_id)
    }

    pub fn detail(&self, forum_id: &str, caller_id: &str) -> AppResult<ForumDetail> {
        let conn = self.db.get()?;
        let forum = get_forum(&conn, forum_id)?;
        membership::require_viewer(&conn, &forum, caller_id)?;
        self.detail_with_conn(&conn, forum_id)
    }

    fn detail_with_conn(&self, conn: &Connection, forum_id: &str) -> AppResult<ForumDetail> {
        let forum = get_forum(conn, forum_id)?;
        let creator_username: String = conn.query_row(
            "SELECT username FROM users WHERE id = ?1",
            params![forum.creator_id],
            |row| row.get(0),
        )?;
        let member_count = membership::active_member_count(conn, forum_id)?;
        Ok(ForumDetail {
            forum,
            creator_username,
            member_count,
        })
    }

    /// Public forums plus the private ones the caller actively belongs to,
    /// most recently active first.
    pub fn list_for(&self, user_id: &str) -> AppResult<Vec<ForumDetail>> {
        let conn = self.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.title, f.description, f.creator_id, f.is_private, f.max_members,
                    f.subject, f.level, f.tags, f.created_at, f.last_activity, u.username,
                    (SELECT COUNT(*) FROM forum_memberships m
                     WHERE m.forum_id = f.id AND m.standing = 'active') AS member_count
             FROM forums f
             JOIN users u ON u.id = f.creator_id
             WHERE f.is_private = 0
                OR EXISTS (SELECT 1 FROM forum_memberships m2
                           WHERE m2.forum_id = f.id AND m2.user_id = ?1 AND m2.standing = 'active')
             ORDER BY f.last_activity DESC",
        )?;
        let forums = stmt
            .query_map(params![user_id], |row| {
                Ok(ForumDetail {
                    forum: map_forum_row(row)?,
                    creator_username: row.get(11)?,
                    member_count: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(forums)
    }

    pub fn update(
        &self,
        forum_id: &str,
        requester_id: &str,
        update: ForumUpdate,
    ) -> AppResult<ForumDetail> {
        validate_title_subject(update.title.as_deref(), update.subject.as_deref())?;
        if let Some(max) = update.max_members {
            if max < 1 {
                return Err(AppError::BadRequest("max_members must be at least 1".into()));
            }
        }

        let conn = self.db.get()?;
        let forum = get_forum(&conn, forum_id)?;
        if forum.creator_id != requester_id {
            return Err(ForumError::CreatorOnly.into());
        }

        conn.execute(
            "UPDATE forums SET
                title = COALESCE(?1, title),
                description = COALESCE(?2, description),
                subject = COALESCE(?3, subject),
                level = COALESCE(?4, level),
                tags = COALESCE(?5, tags),
                max_members = COALESCE(?6, max_members),
                is_private = COALESCE(?7, is_private)
             WHERE id = ?8",
            params![
                update.title,
                update.description,
                update.subject,
                update.level,
                update.tags,
                update.max_members,
                update.is_private,
                forum_id
            ],
        )?;
        self.detail_with_conn(&conn, forum_id)
    }

    /// Delete a forum and everything hanging off it, in one transaction.
    ///
    /// Order matters: messages can reference problems, so they go first;
    /// each problem is then copied into a draft for its author before the
    /// problem rows, the remaining forum rows and finally the forum itself
    /// are removed. Any failure rolls the whole cascade back.
    pub fn delete(&self, forum_id: &str, requester_id: &str) -> AppResult<DeletedForum> {
        let conn = self.db.get()?;
        let forum = get_forum(&conn, forum_id)?;
        if forum.creator_id != requester_id {
            return Err(ForumError::CreatorOnly.into());
        }

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result: AppResult<DeletedForum> = (|| {
            // 1. Collect members (for the fan-out) and problems (for drafts)
            let member_ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT user_id FROM forum_memberships WHERE forum_id = ?1",
                )?;
                let rows = stmt.query_map(params![forum_id], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let problems: Vec<Problem> = {
                let mut stmt = conn.prepare(
                    "SELECT id, forum_id, author_id, title, description, subject, tags, created_at
                     FROM problems WHERE forum_id = ?1",
                )?;
                let rows = stmt.query_map(params![forum_id], |row| {
                    Ok(Problem {
                        id: row.get(0)?,
                        forum_id: row.get(1)?,
                        author_id: row.get(2)?,
                        title: row.get(3)?,
                        description: row.get(4)?,
                        subject: row.get(5)?,
                        tags: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            // 2. Messages pointing at those problems go before the problems
            conn.execute(
                "DELETE FROM forum_messages
                 WHERE problem_id IN (SELECT id FROM problems WHERE forum_id = ?1)",
                params![forum_id],
            )?;

            // 3. Convert each problem to a draft for its author
            for problem in &problems {
                conn.execute(
                    "INSERT INTO drafts (id, author_id, title, description, subject, tags)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        uuid::Uuid::now_v7().to_string(),
                        problem.author_id,
                        problem.title,
                        problem.description,
                        problem.subject,
                        problem.tags
                    ],
                )?;
            }
            conn.execute("DELETE FROM problems WHERE forum_id = ?1", params![forum_id])?;

            // 4. Remaining forum rows, then the forum itself
            conn.execute(
                "DELETE FROM forum_messages WHERE forum_id = ?1",
                params![forum_id],
            )?;
            conn.execute(
                "DELETE FROM forum_invitations WHERE forum_id = ?1",
                params![forum_id],
            )?;
            conn.execute(
                "DELETE FROM forum_join_requests WHERE forum_id = ?1",
                params![forum_id],
            )?;
            conn.execute(
                "DELETE FROM forum_presence WHERE forum_id = ?1",
                params![forum_id],
            )?;
            conn.execute(
                "DELETE FROM forum_memberships WHERE forum_id = ?1",
                params![forum_id],
            )?;
            conn.execute("DELETE FROM forums WHERE id = ?1", params![forum_id])?;

            Ok(DeletedForum {
                title: forum.title.clone(),
                member_ids,
                drafts_created: problems.len(),
            })
        })();

        match result {
            Ok(deleted) => {
                conn.execute("COMMIT", [])?;
                tracing::info!(
                    "Forum {} deleted ({} problems converted to drafts)",
                    forum_id,
                    deleted.drafts_created
                );
                Ok(deleted)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

pub(crate) fn get_forum(conn: &Connection, forum_id: &str) -> AppResult<Forum> {
    conn.query_row(
        "SELECT id, title, description, creator_id, is_private, max_members,
                subject, level, tags, created_at, last_activity
         FROM forums WHERE id = ?1",
        params![forum_id],
        map_forum_row,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Forum not found".into()))
}

pub(crate) fn touch_activity(conn: &Connection, forum_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE forums SET last_activity = datetime('now') WHERE id = ?1",
        params![forum_id],
    )?;
    Ok(())
}

fn map_forum_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Forum> {
    Ok(Forum {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        creator_id: row.get(3)?,
        is_private: row.get(4)?,
        max_members: row.get(5)?,
        subject: row.get(6)?,
        level: row.get(7)?,
        tags: row.get(8)?,
        created_at: row.get(9)?,
        last_activity: row.get(10)?,
    })
}

fn validate_title_subject(title: Option<&str>, subject: Option<&str>) -> AppResult<()> {
    if let Some(title) = title {
        if title.trim().is_empty() {
            return Err(AppError::BadRequest("Title is required".into()));
        }
    }
    if let Some(subject) = subject {
        if subject.trim().is_empty() {
            return Err(AppError::BadRequest("Subject is required".into()));
        }
    }
    Ok(())
}
