//! Outbox module.
//!
//! Domain mutations do not call the chat service directly: they
//! enqueue a [`ChangeEvent`] and a worker drains the queue, keeping
//! transactional writes decoupled from slow or failing network calls.

pub mod worker;
pub use worker::*;

use serde::{Deserialize, Serialize};

use crate::Membership;

/// A reconciliation intent recorded by a domain mutation.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeEvent {
    UserCreated { user_id: i64 },
    UserUpdated { user_id: i64 },
    UserDeleted { user_id: i64 },

    GroupCreated { group_id: i64 },
    GroupRenamed { group_id: i64 },
    GroupDeleted { group_id: i64 },

    /// Carries both sides of the mutation so the worker can derive the
    /// invite/kick/promote/demote transitions without re-reading state
    /// that may already have changed again.
    MembershipChanged {
        before: Option<Membership>,
        after: Option<Membership>,
    },

    NoteSaved { note_id: i64 },
    NoteDeleted { note_id: i64, group_id: i64 },
}
