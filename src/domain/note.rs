//! Note entity, mirrored as a chat message into a group's news room.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub group_id: i64,
    pub creator_id: i64,
    pub text: String,
}
