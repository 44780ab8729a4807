//! Store module.
//!
//! This module exposes the trait seams between the bridge and its
//! relational store, plus a SQLite reference implementation.

use std::result;
use thiserror::Error;

use crate::{Attachment, ChangeEvent, Group, InboxItem, Membership, Message, Note, User};

#[cfg(feature = "sqlite-store")]
pub mod sqlite;
#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum Error {
    #[error("the reply token {0} matches more than one message")]
    DuplicateReplyTokenError(String),
    #[error("cannot serialize outbox event")]
    SerializeEventError(#[source] serde_json::Error),
    #[error("cannot deserialize outbox event {1}")]
    DeserializeEventError(#[source] serde_json::Error, i64),

    #[cfg(feature = "sqlite-store")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Read access to users, groups, memberships, notes and multi-party
/// conversation participants.
pub trait Directory {
    fn active_users(&self, restrict: Option<&[i64]>) -> Result<Vec<User>>;
    fn user_by_id(&self, id: i64) -> Result<Option<User>>;
    /// Case-insensitive lookup among active accounts only.
    fn active_user_by_email(&self, email: &str) -> Result<Option<User>>;

    fn groups(&self) -> Result<Vec<Group>>;
    fn group_by_id(&self, id: i64) -> Result<Option<Group>>;
    fn group_memberships(&self, group_id: i64) -> Result<Vec<Membership>>;

    fn note_by_id(&self, id: i64) -> Result<Option<Note>>;

    fn conversation_participants(&self, conversation_id: i64) -> Result<Vec<i64>>;
}

/// Access to the message threads.
pub trait MessageStore {
    /// Persists a message and returns it with its assigned id.
    fn add_message(&self, message: &Message) -> Result<Message>;
    fn message_by_id(&self, id: i64) -> Result<Option<Message>>;

    /// Looks up the pending message carrying the given correlation
    /// token. More than one match is an internal fault and surfaces as
    /// [`Error::DuplicateReplyTokenError`], never as a silent pick.
    fn message_by_reply_token(&self, token: &str) -> Result<Option<Message>>;

    /// All visible two-party messages, sent time ascending. Feeds the
    /// direct-message sync sweep.
    fn direct_messages(&self) -> Result<Vec<Message>>;

    /// Channel roots among the given users, see the export pipeline.
    fn channel_roots(&self, user_ids: &[i64]) -> Result<Vec<Message>>;
    /// All visible messages belonging to the given channel, sent time
    /// ascending.
    fn channel_messages(&self, channel_id: i64, user_ids: &[i64]) -> Result<Vec<Message>>;
    fn attachments(&self, message_id: i64) -> Result<Vec<Attachment>>;
}

/// Access to the transient inbound email records.
pub trait InboxStore {
    fn add_inbox_item(&self, item: &InboxItem) -> Result<InboxItem>;
    /// All pending items, oldest first by arrival timestamp.
    fn inbox_items(&self) -> Result<Vec<InboxItem>>;
    fn delete_inbox_items(&self, ids: &[i64]) -> Result<()>;
}

/// The external id mapping repository.
///
/// Maps `(kind, key)` pairs to opaque identifiers assigned by the chat
/// service. Writes through this trait are plain data updates: they MUST
/// NOT enqueue change events or otherwise re-trigger reconciliation,
/// which would loop back into the caller.
pub trait ExternalIdStore {
    fn external_id(&self, kind: &str, key: &str) -> Result<Option<String>>;
    fn set_external_id(&self, kind: &str, key: &str, external_id: &str) -> Result<()>;
    fn remove_external_id(&self, kind: &str, key: &str) -> Result<()>;
}

/// Mapping kinds used by the reconciler.
pub const EXTERNAL_KIND_USER: &str = "user";
pub const EXTERNAL_KIND_ROOM: &str = "room";
pub const EXTERNAL_KIND_NOTE_MESSAGE: &str = "note-message";

/// The reconciliation outbox.
///
/// Domain mutations enqueue change events; the worker drains them in
/// insertion order. Draining removes the events: a failed event is not
/// retried individually, the next full sweep repairs instead.
pub trait OutboxQueue {
    fn enqueue(&self, event: &ChangeEvent) -> Result<i64>;
    fn drain(&self, limit: usize) -> Result<Vec<ChangeEvent>>;
    fn pending_events(&self) -> Result<usize>;
}
