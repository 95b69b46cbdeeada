// Invitations and join requests, the two admission workflows. Stores stay
// synchronous; each mutation returns whatever the caller needs for the
// notification fan-out.
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::models::{Invitation, JoinRequest, Membership};
use crate::error::{AppError, AppResult};
use crate::forum::domain::{ForumError, Standing};
use crate::forum::{is_unique_violation, lifecycle, membership};
use crate::state::DbPool;

#[derive(Debug, Clone, Serialize)]
pub struct InvitationView {
    #[serde(flatten)]
    pub invitation: Invitation,
    pub forum_title: String,
    pub inviter_username: String,
    pub invitee_username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinRequestView {
    #[serde(flatten)]
    pub request: JoinRequest,
    pub forum_title: String,
    pub requester_username: String,
}

#[derive(Debug)]
pub struct SentInvitation {
    pub invitation: Invitation,
    pub forum_title: String,
}

#[derive(Debug)]
pub struct AcceptedInvitation {
    pub forum_id: String,
    pub forum_title: String,
    pub inviter_id: String,
    pub membership: Membership,
}

#[derive(Debug)]
pub struct CanceledInvitation {
    pub invitation_id: String,
    pub invitee_id: String,
}

#[derive(Debug)]
pub struct SentRequest {
    pub request: JoinRequest,
    pub forum_title: String,
    pub creator_id: String,
}

#[derive(Debug)]
pub struct AcceptedRequest {
    pub requester_id: String,
    pub forum_id: String,
    pub forum_title: String,
    pub membership: Membership,
}

#[derive(Debug)]
pub struct DeclinedRequest {
    pub requester_id: String,
    pub forum_id: String,
    pub forum_title: String,
}

#[derive(Debug)]
pub struct RetractedRequest {
    pub request_id: String,
    pub creator_id: String,
}

pub struct InviteStore {
    db: DbPool,
}

impl InviteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Creator invites a user by username. A banned invitee can still be
    /// invited; the ban surfaces when they try to accept.
    pub fn invite(
        &self,
        forum_id: &str,
        inviter_id: &str,
        invitee_username: &str,
    ) -> AppResult<SentInvitation> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != inviter_id {
            return Err(ForumError::CreatorOnly.into());
        }

        let invitee_id: String = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![invitee_username],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        if let Some(m) = membership::load_membership(&conn, forum_id, &invitee_id)? {
            if m.standing == Standing::Active {
                return Err(ForumError::AlreadyMember.into());
            }
        }

        let id = uuid::Uuid::now_v7().to_string();
        let inserted = conn.execute(
            "INSERT INTO forum_invitations (id, forum_id, inviter_id, invitee_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, forum_id, inviter_id, invitee_id],
        );
        match inserted {
            Ok(_) => {}
            // The partial unique index on pending invitations fired
            Err(ref e) if is_unique_violation(e) => {
                return Err(AppError::Conflict(
                    "An invitation is already pending for this user".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let invitation = load_invitation(&conn, forum_id, &id)?;
        tracing::info!("User {} invited to forum {}", invitee_id, forum_id);
        Ok(SentInvitation {
            invitation,
            forum_title: forum.title,
        })
    }

    /// Invitee accepts: membership activation and the status flip are one
    /// transaction.
    pub fn accept_invitation(
        &self,
        forum_id: &str,
        invitation_id: &str,
        caller_id: &str,
    ) -> AppResult<AcceptedInvitation> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        let invitation = load_invitation(&conn, forum_id, invitation_id)?;
        if invitation.invitee_id != caller_id {
            return Err(ForumError::NotInvitee.into());
        }

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result: AppResult<Membership> = (|| {
            let m = membership::activate_membership(&conn, forum_id, caller_id, forum.max_members)?;
            let updated = conn.execute(
                "UPDATE forum_invitations
                 SET status = 'accepted', responded_at = datetime('now')
                 WHERE id = ?1 AND status = 'pending'",
                params![invitation_id],
            )?;
            if updated == 0 {
                return Err(ForumError::NotPending.into());
            }
            Ok(m)
        })();

        match result {
            Ok(m) => {
                conn.execute("COMMIT", [])?;
                tracing::info!("User {} accepted invitation to forum {}", caller_id, forum_id);
                Ok(AcceptedInvitation {
                    forum_id: forum_id.to_string(),
                    forum_title: forum.title,
                    inviter_id: invitation.inviter_id,
                    membership: m,
                })
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    pub fn decline_invitation(
        &self,
        forum_id: &str,
        invitation_id: &str,
        caller_id: &str,
    ) -> AppResult<()> {
        let conn = self.db.get()?;
        let invitation = load_invitation(&conn, forum_id, invitation_id)?;
        if invitation.invitee_id != caller_id {
            return Err(ForumError::NotInvitee.into());
        }
        let updated = conn.execute(
            "UPDATE forum_invitations
             SET status = 'declined', responded_at = datetime('now')
             WHERE id = ?1 AND status = 'pending'",
            params![invitation_id],
        )?;
        if updated == 0 {
            return Err(ForumError::NotPending.into());
        }
        Ok(())
    }

    /// Creator withdraws a pending invitation. The row is deleted rather
    /// than resolved so the pair can be re-invited cleanly.
    pub fn cancel_invitation(
        &self,
        forum_id: &str,
        invitation_id: &str,
        caller_id: &str,
    ) -> AppResult<CanceledInvitation> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != caller_id {
            return Err(ForumError::CreatorOnly.into());
        }
        let invitation = load_invitation(&conn, forum_id, invitation_id)?;
        let deleted = conn.execute(
            "DELETE FROM forum_invitations WHERE id = ?1 AND status = 'pending'",
            params![invitation_id],
        )?;
        if deleted == 0 {
            return Err(ForumError::NotPending.into());
        }
        Ok(CanceledInvitation {
            invitation_id: invitation.id,
            invitee_id: invitation.invitee_id,
        })
    }

    /// Creator's view of who has an open invitation.
    pub fn pending_invitations(
        &self,
        forum_id: &str,
        caller_id: &str,
    ) -> AppResult<Vec<InvitationView>> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != caller_id {
            return Err(ForumError::CreatorOnly.into());
        }
        let mut stmt = conn.prepare(
            "SELECT i.id, i.forum_id, i.inviter_id, i.invitee_id, i.status,
                    i.created_at, i.responded_at, f.title, a.username, b.username
             FROM forum_invitations i
             JOIN forums f ON f.id = i.forum_id
             JOIN users a ON a.id = i.inviter_id
             JOIN users b ON b.id = i.invitee_id
             WHERE i.forum_id = ?1 AND i.status = 'pending'
             ORDER BY i.created_at",
        )?;
        let rows = stmt.query_map(params![forum_id], map_invitation_view)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The caller's own open invitations, across forums.
    pub fn my_invitations(&self, user_id: &str) -> AppResult<Vec<InvitationView>> {
        let conn = self.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT i.id, i.forum_id, i.inviter_id, i.invitee_id, i.status,
                    i.created_at, i.responded_at, f.title, a.username, b.username
             FROM forum_invitations i
             JOIN forums f ON f.id = i.forum_id
             JOIN users a ON a.id = i.inviter_id
             JOIN users b ON b.id = i.invitee_id
             WHERE i.invitee_id = ?1 AND i.status = 'pending'
             ORDER BY i.created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], map_invitation_view)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Ask to join a private forum. Capacity is not checked here; the
    /// creator's accept is the enforcement point.
    pub fn request_join(&self, forum_id: &str, user_id: &str) -> AppResult<SentRequest> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if !forum.is_private {
            return Err(ForumError::PublicForum.into());
        }
        if let Some(m) = membership::load_membership(&conn, forum_id, user_id)? {
            match m.standing {
                Standing::Banned => return Err(ForumError::Banned.into()),
                Standing::Active => return Err(ForumError::AlreadyMember.into()),
                Standing::Left => {}
            }
        }

        let id = uuid::Uuid::now_v7().to_string();
        let inserted = conn.execute(
            "INSERT INTO forum_join_requests (id, forum_id, user_id) VALUES (?1, ?2, ?3)",
            params![id, forum_id, user_id],
        );
        match inserted {
            Ok(_) => {}
            Err(ref e) if is_unique_violation(e) => {
                return Err(AppError::Conflict(
                    "A join request is already pending for this forum".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let request = load_request(&conn, forum_id, &id)?;
        tracing::info!("User {} requested to join forum {}", user_id, forum_id);
        Ok(SentRequest {
            request,
            forum_title: forum.title,
            creator_id: forum.creator_id,
        })
    }

    /// Creator accepts: this is where a full forum rejects the requester.
    pub fn accept_request(
        &self,
        forum_id: &str,
        request_id: &str,
        caller_id: &str,
    ) -> AppResult<AcceptedRequest> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != caller_id {
            return Err(ForumError::CreatorOnly.into());
        }
        let request = load_request(&conn, forum_id, request_id)?;

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result: AppResult<Membership> = (|| {
            let m =
                membership::activate_membership(&conn, forum_id, &request.user_id, forum.max_members)?;
            let updated = conn.execute(
                "UPDATE forum_join_requests
                 SET status = 'accepted', responded_at = datetime('now')
                 WHERE id = ?1 AND status = 'pending'",
                params![request_id],
            )?;
            if updated == 0 {
                return Err(ForumError::NotPending.into());
            }
            Ok(m)
        })();

        match result {
            Ok(m) => {
                conn.execute("COMMIT", [])?;
                tracing::info!(
                    "Join request {} accepted for forum {}",
                    request_id,
                    forum_id
                );
                Ok(AcceptedRequest {
                    requester_id: request.user_id,
                    forum_id: forum_id.to_string(),
                    forum_title: forum.title,
                    membership: m,
                })
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    pub fn decline_request(
        &self,
        forum_id: &str,
        request_id: &str,
        caller_id: &str,
    ) -> AppResult<DeclinedRequest> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != caller_id {
            return Err(ForumError::CreatorOnly.into());
        }
        let request = load_request(&conn, forum_id, request_id)?;
        let updated = conn.execute(
            "UPDATE forum_join_requests
             SET status = 'declined', responded_at = datetime('now')
             WHERE id = ?1 AND status = 'pending'",
            params![request_id],
        )?;
        if updated == 0 {
            return Err(ForumError::NotPending.into());
        }
        Ok(DeclinedRequest {
            requester_id: request.user_id,
            forum_id: forum_id.to_string(),
            forum_title: forum.title,
        })
    }

    /// Requester withdraws their own pending request.
    pub fn retract_request(&self, forum_id: &str, user_id: &str) -> AppResult<RetractedRequest> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        let request_id: String = conn
            .query_row(
                "SELECT id FROM forum_join_requests
                 WHERE forum_id = ?1 AND user_id = ?2 AND status = 'pending'",
                params![forum_id, user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound("No pending join request".into()))?;
        conn.execute(
            "DELETE FROM forum_join_requests WHERE id = ?1",
            params![request_id],
        )?;
        Ok(RetractedRequest {
            request_id,
            creator_id: forum.creator_id,
        })
    }

    pub fn pending_requests(
        &self,
        forum_id: &str,
        caller_id: &str,
    ) -> AppResult<Vec<JoinRequestView>> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != caller_id {
            return Err(ForumError::CreatorOnly.into());
        }
        let mut stmt = conn.prepare(
            "SELECT r.id, r.forum_id, r.user_id, r.status, r.created_at, r.responded_at,
                    f.title, u.username
             FROM forum_join_requests r
             JOIN forums f ON f.id = r.forum_id
             JOIN users u ON u.id = r.user_id
             WHERE r.forum_id = ?1 AND r.status = 'pending'
             ORDER BY r.created_at",
        )?;
        let rows = stmt.query_map(params![forum_id], |row| {
            Ok(JoinRequestView {
                request: map_request_row(row)?,
                forum_title: row.get(6)?,
                requester_username: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn load_invitation(conn: &Connection, forum_id: &str, invitation_id: &str) -> AppResult<Invitation> {
    conn.query_row(
        "SELECT id, forum_id, inviter_id, invitee_id, status, created_at, responded_at
         FROM forum_invitations WHERE id = ?1 AND forum_id = ?2",
        params![invitation_id, forum_id],
        map_invitation_row,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Invitation not found".into()))
}

fn load_request(conn: &Connection, forum_id: &str, request_id: &str) -> AppResult<JoinRequest> {
    conn.query_row(
        "SELECT id, forum_id, user_id, status, created_at, responded_at
         FROM forum_join_requests WHERE id = ?1 AND forum_id = ?2",
        params![request_id, forum_id],
        map_request_row,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Join request not found".into()))
}

fn map_invitation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: row.get(0)?,
        forum_id: row.get(1)?,
        inviter_id: row.get(2)?,
        invitee_id: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        responded_at: row.get(6)?,
    })
}

fn map_invitation_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<InvitationView> {
    Ok(InvitationView {
        invitation: map_invitation_row(row)?,
        forum_title: row.get(7)?,
        inviter_username: row.get(8)?,
        invitee_username: row.get(9)?,
    })
}

fn map_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JoinRequest> {
    Ok(JoinRequest {
        id: row.get(0)?,
        forum_id: row.get(1)?,
        user_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        responded_at: row.get(5)?,
    })
}
