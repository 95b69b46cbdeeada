// Membership store - the row-per-(forum,user) state machine
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::models::{Forum, Membership};
use crate::error::{AppError, AppResult};
use crate::forum::domain::{Capability, ForumError, Role, Standing};
use crate::forum::lifecycle;
use crate::state::DbPool;

/// A membership row joined with its user, as shown in member lists.
#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub standing: Standing,
    pub joined_at: String,
}

pub struct MembershipStore {
    db: DbPool,
}

impl MembershipStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn membership(&self, forum_id: &str, user_id: &str) -> AppResult<Option<Membership>> {
        let conn = self.db.get()?;
        load_membership(&conn, forum_id, user_id)
    }

    pub fn is_active_member(&self, forum_id: &str, user_id: &str) -> AppResult<bool> {
        Ok(self
            .membership(forum_id, user_id)?
            .is_some_and(|m| m.standing.is_active()))
    }

    /// Resolve the caller's membership and check a capability against it.
    /// No row, or a row that is not active, denies.
    pub fn require_capability(
        &self,
        forum_id: &str,
        user_id: &str,
        capability: Capability,
    ) -> AppResult<Membership> {
        let conn = self.db.get()?;
        require_capability(&conn, forum_id, user_id, capability)
    }

    /// Join a public forum directly. Private forums go through the
    /// join-request flow.
    pub fn join(&self, forum_id: &str, user_id: &str) -> AppResult<Membership> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.is_private {
            return Err(ForumError::PrivateForum.into());
        }

        conn.execute("BEGIN IMMEDIATE", [])?;
        match activate_membership(&conn, forum_id, user_id, forum.max_members) {
            Ok(membership) => {
                conn.execute("COMMIT", [])?;
                tracing::info!("User {} joined forum {}", user_id, forum_id);
                Ok(membership)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Deactivate the caller's membership. The row (and its role) survives
    /// so a later re-join restores it.
    pub fn leave(&self, forum_id: &str, user_id: &str) -> AppResult<()> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id == user_id {
            return Err(ForumError::CreatorCannotLeave.into());
        }

        let membership =
            load_membership(&conn, forum_id, user_id)?.ok_or(ForumError::NotAMember)?;
        if !membership.standing.is_active() {
            return Err(ForumError::NotAMember.into());
        }

        conn.execute(
            "UPDATE forum_memberships SET standing = 'left' WHERE id = ?1",
            params![membership.id],
        )?;
        Ok(())
    }

    pub fn ban(&self, forum_id: &str, requester_id: &str, target_id: &str) -> AppResult<()> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != requester_id {
            return Err(ForumError::CreatorOnly.into());
        }
        if target_id == forum.creator_id {
            return Err(ForumError::TargetIsCreator.into());
        }

        let membership =
            load_membership(&conn, forum_id, target_id)?.ok_or(ForumError::NotAMember)?;
        if membership.standing == Standing::Banned {
            return Err(ForumError::AlreadyBanned.into());
        }

        conn.execute(
            "UPDATE forum_memberships SET standing = 'banned' WHERE id = ?1",
            params![membership.id],
        )?;
        tracing::info!("User {} banned from forum {}", target_id, forum_id);
        Ok(())
    }

    pub fn unban(&self, forum_id: &str, requester_id: &str, target_id: &str) -> AppResult<()> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != requester_id {
            return Err(ForumError::CreatorOnly.into());
        }

        let membership =
            load_membership(&conn, forum_id, target_id)?.ok_or(ForumError::NotAMember)?;
        if membership.standing != Standing::Banned {
            return Err(ForumError::NotBanned.into());
        }

        conn.execute(
            "UPDATE forum_memberships SET standing = 'active' WHERE id = ?1",
            params![membership.id],
        )?;
        Ok(())
    }

    /// Remove the membership row outright. Unlike a ban, nothing blocks
    /// the kicked user from re-joining a public forum afterwards.
    pub fn kick(&self, forum_id: &str, requester_id: &str, target_id: &str) -> AppResult<()> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if target_id == forum.creator_id {
            return Err(ForumError::TargetIsCreator.into());
        }

        match load_membership(&conn, forum_id, requester_id)? {
            Some(m) if m.can(Capability::Kick) => {}
            _ => return Err(ForumError::MissingCapability(Capability::Kick).into()),
        }

        let membership =
            load_membership(&conn, forum_id, target_id)?.ok_or(ForumError::NotAMember)?;
        conn.execute(
            "DELETE FROM forum_memberships WHERE id = ?1",
            params![membership.id],
        )?;
        tracing::info!("User {} kicked from forum {}", target_id, forum_id);
        Ok(())
    }

    pub fn assign_role(
        &self,
        forum_id: &str,
        requester_id: &str,
        target_id: &str,
        new_role: Role,
    ) -> AppResult<Membership> {
        let conn = self.db.get()?;
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        if forum.creator_id != requester_id {
            return Err(ForumError::CreatorOnly.into());
        }
        if !new_role.is_assignable() {
            return Err(ForumError::RoleNotAssignable(new_role).into());
        }
        if target_id == forum.creator_id {
            return Err(ForumError::TargetIsCreator.into());
        }

        let membership =
            load_membership(&conn, forum_id, target_id)?.ok_or(ForumError::NotAMember)?;
        conn.execute(
            "UPDATE forum_memberships SET role = ?1 WHERE id = ?2",
            params![new_role, membership.id],
        )?;
        Ok(Membership {
            role: new_role,
            ..membership
        })
    }

    pub fn members(&self, forum_id: &str, caller_id: &str) -> AppResult<Vec<MemberView>> {
        let conn = self.db.get()?;
        // 404 for a missing forum rather than an empty list
        let forum = lifecycle::get_forum(&conn, forum_id)?;
        require_viewer(&conn, &forum, caller_id)?;

        let mut stmt = conn.prepare(
            "SELECT m.user_id, u.username, m.role, m.standing, m.joined_at
             FROM forum_memberships m
             JOIN users u ON u.id = m.user_id
             WHERE m.forum_id = ?1
             ORDER BY m.joined_at ASC",
        )?;
        let members = stmt
            .query_map(params![forum_id], |row| {
                Ok(MemberView {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    role: row.get(2)?,
                    standing: row.get(3)?,
                    joined_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }
}

/// The shared create-or-reactivate rule behind join, invitation accept and
/// join-request accept. Capacity is enforced here, at activation time, not
/// when an invitation or request is created. Runs inside the caller's
/// transaction.
pub(crate) fn activate_membership(
    conn: &Connection,
    forum_id: &str,
    user_id: &str,
    max_members: i64,
) -> AppResult<Membership> {
    match load_membership(conn, forum_id, user_id)? {
        Some(m) if m.standing == Standing::Banned => Err(ForumError::Banned.into()),
        Some(m) if m.standing == Standing::Active => Err(ForumError::AlreadyMember.into()),
        Some(m) => {
            ensure_capacity(conn, forum_id, max_members)?;
            conn.execute(
                "UPDATE forum_memberships SET standing = 'active' WHERE id = ?1",
                params![m.id],
            )?;
            Ok(Membership {
                standing: Standing::Active,
                ..m
            })
        }
        None => {
            ensure_capacity(conn, forum_id, max_members)?;
            insert_membership(conn, forum_id, user_id, Role::Member)
        }
    }
}

pub(crate) fn insert_membership(
    conn: &Connection,
    forum_id: &str,
    user_id: &str,
    role: Role,
) -> AppResult<Membership> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO forum_memberships (id, forum_id, user_id, role, standing)
         VALUES (?1, ?2, ?3, ?4, 'active')",
        params![id, forum_id, user_id, role],
    )?;
    let joined_at: String = conn.query_row(
        "SELECT joined_at FROM forum_memberships WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(Membership {
        id,
        forum_id: forum_id.to_string(),
        user_id: user_id.to_string(),
        role,
        standing: Standing::Active,
        joined_at,
    })
}

/// An active membership, or NotAMember. Posting messages and problems
/// needs this much and nothing more.
pub(crate) fn require_active(
    conn: &Connection,
    forum_id: &str,
    user_id: &str,
) -> AppResult<Membership> {
    match load_membership(conn, forum_id, user_id)? {
        Some(m) if m.standing.is_active() => Ok(m),
        _ => Err(ForumError::NotAMember.into()),
    }
}

pub(crate) fn require_capability(
    conn: &Connection,
    forum_id: &str,
    user_id: &str,
    capability: Capability,
) -> AppResult<Membership> {
    match load_membership(conn, forum_id, user_id)? {
        Some(m) if m.can(capability) => Ok(m),
        _ => Err(ForumError::MissingCapability(capability).into()),
    }
}

/// Read access. Public forums are open to any verified user; private
/// forums show their detail, members, messages, problems and presence
/// to active members only.
pub(crate) fn require_viewer(conn: &Connection, forum: &Forum, user_id: &str) -> AppResult<()> {
    if !forum.is_private {
        return Ok(());
    }
    match load_membership(conn, &forum.id, user_id)? {
        Some(m) if m.standing.is_active() => Ok(()),
        _ => Err(AppError::Forbidden("This forum is private".to_string())),
    }
}

pub(crate) fn load_membership(
    conn: &Connection,
    forum_id: &str,
    user_id: &str,
) -> AppResult<Option<Membership>> {
    let membership = conn
        .query_row(
            "SELECT id, forum_id, user_id, role, standing, joined_at
             FROM forum_memberships
             WHERE forum_id = ?1 AND user_id = ?2",
            params![forum_id, user_id],
            |row| {
                Ok(Membership {
                    id: row.get(0)?,
                    forum_id: row.get(1)?,
                    user_id: row.get(2)?,
                    role: row.get(3)?,
                    standing: row.get(4)?,
                    joined_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(membership)
}

pub(crate) fn active_member_count(conn: &Connection, forum_id: &str) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM forum_memberships WHERE forum_id = ?1 AND standing = 'active'",
        params![forum_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn ensure_capacity(conn: &Connection, forum_id: &str, max_members: i64) -> AppResult<()> {
    if active_member_count(conn, forum_id)? >= max_members {
        return Err(ForumError::ForumFull.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::AppError;
    use tempfile::TempDir;

    fn create_test_store() -> (MembershipStore, DbPool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (MembershipStore::new(pool.clone()), pool, temp_dir)
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

    fn seed_forum(pool: &DbPool, creator_id: &str, is_private: bool, max_members: i64) -> String {
        let id = uuid::Uuid::now_v7().to_string();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO forums (id, title, creator_id, is_private, max_members, subject)
             VALUES (?1, 'Astro club', ?2, ?3, ?4, 'astronomy')",
            params![id, creator_id, is_private, max_members],
        )
        .unwrap();
        insert_membership(&conn, &id, creator_id, Role::Creator).unwrap();
        id
    }

    #[test]
    fn join_creates_member_row() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "joiner");
        let forum = seed_forum(&pool, &creator, false, 10);

        let m = store.join(&forum, &user).unwrap();
        assert_eq!(m.role, Role::Member);
        assert_eq!(m.standing, Standing::Active);
        assert!(store.is_active_member(&forum, &user).unwrap());
    }

    #[test]
    fn join_private_forum_is_rejected() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "joiner");
        let forum = seed_forum(&pool, &creator, true, 10);

        let err = store.join(&forum, &user).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn join_twice_is_a_conflict() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "joiner");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &user).unwrap();
        let err = store.join(&forum, &user).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn join_full_forum_is_a_conflict() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let u2 = seed_user(&pool, "second");
        let u3 = seed_user(&pool, "third");
        // Creator occupies one of the two seats
        let forum = seed_forum(&pool, &creator, false, 2);

        store.join(&forum, &u2).unwrap();
        let err = store.join(&forum, &u3).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn rejoin_after_leave_reactivates_and_preserves_role() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "helper");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &user).unwrap();
        store
            .assign_role(&forum, &creator, &user, Role::Helper)
            .unwrap();
        store.leave(&forum, &user).unwrap();
        assert!(!store.is_active_member(&forum, &user).unwrap());

        let m = store.join(&forum, &user).unwrap();
        assert_eq!(m.role, Role::Helper);
        assert_eq!(m.standing, Standing::Active);

        // Still exactly one row for the pair
        let conn = pool.get().unwrap();
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM forum_memberships WHERE forum_id = ?1 AND user_id = ?2",
                params![forum, user],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn creator_cannot_leave() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let forum = seed_forum(&pool, &creator, false, 10);

        let err = store.leave(&forum, &creator).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn leave_without_active_membership_is_not_found() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "stranger");
        let forum = seed_forum(&pool, &creator, false, 10);

        let err = store.leave(&forum, &user).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        store.join(&forum, &user).unwrap();
        store.leave(&forum, &user).unwrap();
        // Leaving again: the row exists but is no longer active
        let err = store.leave(&forum, &user).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn banned_member_cannot_rejoin_until_unbanned() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "troublemaker");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &user).unwrap();
        store.ban(&forum, &creator, &user).unwrap();
        assert!(!store.is_active_member(&forum, &user).unwrap());

        let err = store.join(&forum, &user).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        store.unban(&forum, &creator, &user).unwrap();
        // Unban restores the membership directly
        assert!(store.is_active_member(&forum, &user).unwrap());
    }

    #[test]
    fn kicked_member_can_rejoin_immediately() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "kicked");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &user).unwrap();
        store.kick(&forum, &creator, &user).unwrap();
        assert!(store.membership(&forum, &user).unwrap().is_none());

        store.join(&forum, &user).unwrap();
        assert!(store.is_active_member(&forum, &user).unwrap());
    }

    #[test]
    fn kick_requires_the_kick_capability() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let helper = seed_user(&pool, "helper");
        let moderator = seed_user(&pool, "moderator");
        let target = seed_user(&pool, "target");
        let forum = seed_forum(&pool, &creator, false, 10);

        for u in [&helper, &moderator, &target] {
            store.join(&forum, u).unwrap();
        }
        store
            .assign_role(&forum, &creator, &helper, Role::Helper)
            .unwrap();
        store
            .assign_role(&forum, &creator, &moderator, Role::Moderator)
            .unwrap();

        let err = store.kick(&forum, &helper, &target).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = store.kick(&forum, &target, &helper).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        store.kick(&forum, &moderator, &target).unwrap();
        assert!(store.membership(&forum, &target).unwrap().is_none());
    }

    #[test]
    fn creator_cannot_be_banned_or_kicked() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let moderator = seed_user(&pool, "moderator");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &moderator).unwrap();
        store
            .assign_role(&forum, &creator, &moderator, Role::Moderator)
            .unwrap();

        let err = store.ban(&forum, &creator, &creator).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = store.kick(&forum, &moderator, &creator).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn ban_is_creator_only_and_not_repeatable() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let moderator = seed_user(&pool, "moderator");
        let target = seed_user(&pool, "target");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &moderator).unwrap();
        store.join(&forum, &target).unwrap();
        store
            .assign_role(&forum, &creator, &moderator, Role::Moderator)
            .unwrap();

        // Moderators moderate, but banning stays with the creator
        let err = store.ban(&forum, &moderator, &target).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        store.ban(&forum, &creator, &target).unwrap();
        let err = store.ban(&forum, &creator, &target).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn unban_requires_a_banned_target() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "member");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &user).unwrap();
        let err = store.unban(&forum, &creator, &user).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn assign_role_rules() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let user = seed_user(&pool, "member");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &user).unwrap();

        let m = store
            .assign_role(&forum, &creator, &user, Role::Moderator)
            .unwrap();
        assert_eq!(m.role, Role::Moderator);

        // Not creator-assignable
        let err = store
            .assign_role(&forum, &creator, &user, Role::Creator)
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        // The creator's own role is immutable
        let err = store
            .assign_role(&forum, &creator, &creator, Role::Member)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Non-creators cannot assign at all
        let err = store
            .assign_role(&forum, &user, &user, Role::Helper)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn members_lists_every_standing() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let left = seed_user(&pool, "gone");
        let banned = seed_user(&pool, "banned");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &left).unwrap();
        store.join(&forum, &banned).unwrap();
        store.leave(&forum, &left).unwrap();
        store.ban(&forum, &creator, &banned).unwrap();

        let members = store.members(&forum, &creator).unwrap();
        assert_eq!(members.len(), 3);
        let standing_of = |name: &str| {
            members
                .iter()
                .find(|m| m.username == name)
                .map(|m| m.standing)
                .unwrap()
        };
        assert_eq!(standing_of("creator"), Standing::Active);
        assert_eq!(standing_of("gone"), Standing::Left);
        assert_eq!(standing_of("banned"), Standing::Banned);
    }

    #[test]
    fn private_member_lists_are_hidden_from_outsiders() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let outsider = seed_user(&pool, "outsider");
        let forum = seed_forum(&pool, &creator, true, 10);

        let err = store.members(&forum, &outsider).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // The same request against a public forum is fine
        let open = seed_forum(&pool, &creator, false, 10);
        assert_eq!(store.members(&open, &outsider).unwrap().len(), 1);
    }

    #[test]
    fn capability_checks_deny_outsiders_and_inactive_members() {
        let (store, pool, _tmp) = create_test_store();
        let creator = seed_user(&pool, "creator");
        let outsider = seed_user(&pool, "outsider");
        let leaver = seed_user(&pool, "leaver");
        let forum = seed_forum(&pool, &creator, false, 10);

        store.join(&forum, &leaver).unwrap();
        store
            .assign_role(&forum, &creator, &leaver, Role::Moderator)
            .unwrap();
        store.leave(&forum, &leaver).unwrap();

        assert!(store
            .require_capability(&forum, &outsider, Capability::Pin)
            .is_err());
        // Role alone is not enough once the membership is inactive
        assert!(store
            .require_capability(&forum, &leaver, Capability::Moderate)
            .is_err());
        assert!(store
            .require_capability(&forum, &creator, Capability::Kick)
            .is_ok());
    }
}
