// Problems posted in a forum, and the private drafts they become when a
// forum is deleted
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::models::{Draft, Problem};
use crate::error::{AppError, AppResult};
use crate::forum::{lifecycle, membership};
use crate::state::DbPool;

#[derive(Debug, Clone, Deserialize)]
pub struct NewProblem {
    pub title: String,
    pub description: String,
    pub subject: String,
    #[serde(default)]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProblemView {
    #[serde(flatten)]
    pub problem: Problem,
    pub author_username: String,
}

pub struct ProblemStore {
    db: DbPool,
}

impl ProblemStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn create(&self, forum_id: &str, author_id: &str, new: NewProblem) -> AppResult<Problem> {
        if new.title.trim().is_empty() {
            return Err(AppError::BadRequest("Title is required".into()));
        }
        if new.subject.trim().is_empty() {
            return Err(AppError::BadRequest("Subject is required".into()));
        }

        let conn = self.db.get()?;
        lifecycle::get_forum(&conn, forum_id)?;
        membership::require_active(&conn, forum_id, author_id)?;

        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO problems (id, forum_id, author_id, title, description, subject, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, forum_id, author_id, new.title, new.description, new.subject, new.tags],
        )?;
        lifecycle::touch_activity(&conn, forum_id)?;

        let problem = conn.query_row(
            "SELECT id, forum_id, author_id, title, description, subject, tags, created_at
             FROM problems WHERE id = ?1",
            params![id],
            map_problem_row,
        )?;
        Ok(problem)
    }

    pub fn list(&self, forum_id: &str, caller_id: &str) -> AppResult<Vec<ProblemView>> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        membership::require_viewer(&conn, &forum, caller_id)?;

        let mut stmt = conn.prepare(
            "SELECT p.id, p.forum_id, p.author_id, p.title, p.description, p.subject, p.tags,
                    p.created_at, u.username
             FROM problems p
             JOIN users u ON u.id = p.author_id
             WHERE p.forum_id = ?1
             ORDER BY p.created_at DESC, p.id DESC",
        )?;
        let rows = stmt.query_map(params![forum_id], |row| {
            Ok(ProblemView {
                problem: map_problem_row(row)?,
                author_username: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The caller's drafts, newest first. Drafts only come from forum
    /// deletion, so there is no create path here.
    pub fn drafts(&self, user_id: &str) -> AppResult<Vec<Draft>> {
        let conn = self.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, author_id, title, description, subject, tags, created_at
             FROM drafts WHERE author_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(Draft {
                id: row.get(0)?,
                author_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                subject: row.get(4)?,
                tags: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn map_problem_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Problem> {
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
}
