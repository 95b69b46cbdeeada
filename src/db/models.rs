use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::forum::domain::{InvitationStatus, JoinRequestStatus, Role, Standing};

// Role/standing/status tags live in TEXT columns; parse strictly on the
// way out so a corrupt row surfaces as an error instead of a silent default.
macro_rules! sql_tag {
    ($ty:ty) => {
        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }
    };
}

sql_tag!(Role);
sql_tag!(Standing);
sql_tag!(InvitationStatus);
sql_tag!(JoinRequestStatus);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub is_admin: bool,
    pub is_verified: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forum {
    pub id: String,
    pub title: String,
    pub description: String,
    pub creator_id: String,
    pub is_private: bool,
    pub max_members: i64,
    pub subject: String,
    pub level: Option<String>,
    pub tags: Option<String>,
    pub created_at: String,
    pub last_activity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: String,
    pub forum_id: String,
    pub user_id: String,
    pub role: Role,
    pub standing: Standing,
    pub joined_at: String,
}

impl Membership {
    /// Capability check for this row. Absent rows are checked by the
    /// caller; anything but active standing denies everything.
    pub fn can(&self, capability: crate::forum::domain::Capability) -> bool {
        self.standing.is_active() && self.role.allows(capability)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub forum_id: String,
    pub inviter_id: String,
    pub invitee_id: String,
    pub status: InvitationStatus,
    pub created_at: String,
    pub responded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: String,
    pub forum_id: String,
    pub user_id: String,
    pub status: JoinRequestStatus,
    pub created_at: String,
    pub responded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub forum_id: String,
    pub author_id: String,
    pub body: String,
    pub problem_id: Option<String>,
    pub reply_to_id: Option<String>,
    pub is_pinned: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub forum_id: String,
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub subject: String,
    pub tags: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub subject: String,
    pub tags: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: String,
}
