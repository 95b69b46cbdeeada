pub mod chat;
pub mod domain;
pub mod invites;
pub mod lifecycle;
pub mod membership;
pub mod problems;

pub use chat::ChatStore;
pub use domain::{Capability, ForumError, InvitationStatus, JoinRequestStatus, Role, Standing};
pub use invites::InviteStore;
pub use lifecycle::ForumStore;
pub use membership::MembershipStore;
pub use problems::ProblemStore;

use crate::error::AppError;

impl From<ForumError> for AppError {
    fn from(err: ForumError) -> Self {
        use ForumError::*;
        match &err {
            CreatorOnly | NotInvitee | CreatorCannotLeave | MissingCapability(_) => {
                AppError::Forbidden(err.to_string())
            }
            AlreadyMember | Banned | ForumFull | AlreadyBanned | NotBanned | TargetIsCreator
            | NotPending | NotPinned => AppError::Conflict(err.to_string()),
            NotAMember => AppError::NotFound(err.to_string()),
            UnknownRole(_) | UnknownStanding(_) | UnknownStatus(_) | PrivateForum | PublicForum
            | RoleNotAssignable(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

/// True when a SQLite error is a UNIQUE violation, i.e. one of the
/// constraints backing deduplication (membership pair, pending
/// invitations/requests, single pin) fired under a race.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
