// Membership domain rules - pure, no I/O
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Moderation capabilities gated by forum role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Moderate,
    Pin,
    Kick,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moderate => write!(f, "moderate"),
            Self::Pin => write!(f, "pin"),
            Self::Kick => write!(f, "kick"),
        }
    }
}

/// Forum role. Stored as a closed tag, never as a loose string pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Creator,
    Moderator,
    Helper,
    Member,
}

impl Role {
    pub fn parse(s: &str) -> Result<Self, ForumError> {
        match s {
            "creator" => Ok(Self::Creator),
            "moderator" => Ok(Self::Moderator),
            "helper" => Ok(Self::Helper),
            "member" => Ok(Self::Member),
            other => Err(ForumError::UnknownRole(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Moderator => "moderator",
            Self::Helper => "helper",
            Self::Member => "member",
        }
    }

    /// Total permission table: every (role, capability) pair has an answer.
    pub fn allows(self, capability: Capability) -> bool {
        match (self, capability) {
            (Self::Creator | Self::Moderator, _) => true,
            (Self::Helper, Capability::Pin) => true,
            (Self::Helper, Capability::Moderate | Capability::Kick) => false,
            (Self::Member, _) => false,
        }
    }

    /// Roles the creator may hand out. The creator role itself is fixed at
    /// forum creation and never reassigned.
    pub fn is_assignable(self) -> bool {
        !matches!(self, Self::Creator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Standing of a membership row. A row is only ever deleted by a kick;
/// leave and ban flip the standing so history (and the ban) survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    /// Full member.
    Active,
    /// Left voluntarily; may re-join.
    Left,
    /// Banned; may not re-join until unbanned.
    Banned,
}

impl Standing {
    pub fn parse(s: &str) -> Result<Self, ForumError> {
        match s {
            "active" => Ok(Self::Active),
            "left" => Ok(Self::Left),
            "banned" => Ok(Self::Banned),
            other => Err(ForumError::UnknownStanding(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Left => "left",
            Self::Banned => "banned",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for Standing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl InvitationStatus {
    pub fn parse(s: &str) -> Result<Self, ForumError> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            other => Err(ForumError::UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl JoinRequestStatus {
    pub fn parse(s: &str) -> Result<Self, ForumError> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            other => Err(ForumError::UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }
}

/// Semantic failures of the membership and invitation workflows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForumError {
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown standing: {0}")]
    UnknownStanding(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("This forum is private; ask to join instead")]
    PrivateForum,

    #[error("This forum is public; join it directly")]
    PublicForum,

    #[error("Already a member of this forum")]
    AlreadyMember,

    #[error("You are banned from this forum")]
    Banned,

    #[error("This forum is full")]
    ForumFull,

    #[error("This member is already banned")]
    AlreadyBanned,

    #[error("This member is not banned")]
    NotBanned,

    #[error("The forum creator cannot be the target of this action")]
    TargetIsCreator,

    #[error("The creator cannot leave their own forum")]
    CreatorCannotLeave,

    #[error("Only the forum creator can do this")]
    CreatorOnly,

    #[error("Only the invited user can respond to an invitation")]
    NotInvitee,

    #[error("No membership in this forum")]
    NotAMember,

    #[error("Already resolved")]
    NotPending,

    #[error("The {0} role cannot be assigned")]
    RoleNotAssignable(Role),

    #[error("You need the {0} permission in this forum")]
    MissingCapability(Capability),

    #[error("Nothing is pinned")]
    NotPinned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_table_is_exact() {
        use Capability::*;
        use Role::*;

        let table = [
            (Creator, Moderate, true),
            (Creator, Pin, true),
            (Creator, Kick, true),
            (Moderator, Moderate, true),
            (Moderator, Pin, true),
            (Moderator, Kick, true),
            (Helper, Moderate, false),
            (Helper, Pin, true),
            (Helper, Kick, false),
            (Member, Moderate, false),
            (Member, Pin, false),
            (Member, Kick, false),
        ];

        for (role, capability, expected) in table {
            assert_eq!(
                role.allows(capability),
                expected,
                "{} / {}",
                role,
                capability
            );
        }
    }

    #[test]
    fn role_parse_round_trips() {
        for role in [Role::Creator, Role::Moderator, Role::Helper, Role::Member] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = Role::parse("admin").unwrap_err();
        assert!(matches!(err, ForumError::UnknownRole(_)));
        // Case matters: stored tags are lowercase
        assert!(Role::parse("Creator").is_err());
        assert!(Role::parse("").is_err());
    }

    #[test]
    fn only_creator_role_is_unassignable() {
        assert!(!Role::Creator.is_assignable());
        assert!(Role::Moderator.is_assignable());
        assert!(Role::Helper.is_assignable());
        assert!(Role::Member.is_assignable());
    }

    #[test]
    fn standing_parse_round_trips() {
        for standing in [Standing::Active, Standing::Left, Standing::Banned] {
            assert_eq!(Standing::parse(standing.as_str()).unwrap(), standing);
        }
        assert!(Standing::parse("suspended").is_err());
    }

    #[test]
    fn only_active_standing_is_active() {
        assert!(Standing::Active.is_active());
        assert!(!Standing::Left.is_active());
        assert!(!Standing::Banned.is_active());
    }

    #[test]
    fn invitation_status_parse_round_trips() {
        for status in [
            InvitationStatus::Pending,
            InvitationStatus::Accepted,
            InvitationStatus::Declined,
            InvitationStatus::Expired,
        ] {
            assert_eq!(InvitationStatus::parse(status.as_str()).unwrap(), status);
        }
        // Join requests have no expired state
        assert!(JoinRequestStatus::parse("expired").is_err());
    }

    #[test]
    fn status_enums_serialize_as_snake_case() {
        let json = serde_json::to_string(&Role::Moderator).unwrap();
        assert_eq!(json, "\"moderator\"");
        let standing: Standing = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(standing, Standing::Left);
    }
}
