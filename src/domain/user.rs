//! User, group and membership entities.

use serde::{Deserialize, Serialize};

/// A user account. Only active accounts are mirrored to the chat
/// service or allowed to send direct replies.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub is_active: bool,
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A group owning a set of mirrored chat rooms.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

/// Logical names of the rooms mirrored for every group. The mapping
/// between a logical room and its external identifier is kept in the
/// external id store, never on the group itself.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RoomKind {
    General,
    News,
}

impl RoomKind {
    pub const ALL: [RoomKind; 2] = [RoomKind::General, RoomKind::News];

    pub fn key(&self) -> &'static str {
        match self {
            RoomKind::General => "general",
            RoomKind::News => "news",
        }
    }

    /// Concrete room name on the chat service for the given group.
    pub fn room_name(&self, group: &Group) -> String {
        format!("{}-{}", self.key(), group.slug)
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum MembershipStatus {
    /// Requested by the user, not confirmed yet.
    #[default]
    Pending,
    /// Invited by a moderator, not confirmed yet.
    InvitedPending,
    Member,
}

impl MembershipStatus {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            MembershipStatus::Pending | MembershipStatus::InvitedPending
        )
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            MembershipStatus::Pending => "pending",
            MembershipStatus::InvitedPending => "invited-pending",
            MembershipStatus::Member => "member",
        }
    }

    pub fn from_key(key: &str) -> Self {
        match key {
            "member" => MembershipStatus::Member,
            "invited-pending" => MembershipStatus::InvitedPending,
            _ => MembershipStatus::Pending,
        }
    }
}

/// A user's membership in a group.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: i64,
    pub user_id: i64,
    pub status: MembershipStatus,
    pub is_moderator: bool,
}
