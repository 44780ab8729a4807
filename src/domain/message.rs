//! Message entity.
//!
//! A message belongs to exactly one thread: a message whose `thread_id`
//! is unset or equal to its own id is a thread root. Replies derived
//! from inbound email carry a `parent_id`. Only accepted messages are
//! visible externally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::result;
use thiserror::Error;
use uuid::Uuid;

use crate::User;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot build reply with an empty body")]
    EmptyReplyBodyError,
    #[error("cannot build reply to message {0}: missing sender")]
    MissingReplyRecipientError(i64),
    #[error("cannot build reply as inactive user {0}")]
    InactiveReplierError(i64),
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ModerationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl ModerationStatus {
    pub fn as_key(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Accepted => "accepted",
            ModerationStatus::Rejected => "rejected",
        }
    }

    pub fn from_key(key: &str) -> Self {
        match key {
            "accepted" => ModerationStatus::Accepted,
            "rejected" => ModerationStatus::Rejected,
            _ => ModerationStatus::Pending,
        }
    }
}

/// An uploaded file attached to a message, exported by download URL.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Attachment {
    pub message_id: i64,
    pub download_url: String,
}

/// A unit of communication between two users or within a multi-party
/// conversation.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    /// Unset for multi-party and broadcast messages.
    pub recipient_id: Option<i64>,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// Self-referencing thread pointer, see module docs.
    pub thread_id: Option<i64>,
    /// Set on replies derived from inbound email.
    pub parent_id: Option<i64>,
    pub moderation_status: ModerationStatus,
    pub sender_deleted_at: Option<DateTime<Utc>>,
    pub recipient_deleted_at: Option<DateTime<Utc>>,
    /// Multi-party conversation reference; participants are kept in a
    /// separate table.
    pub multi_conversation_id: Option<i64>,
    /// Whether this copy is the thread's master copy for its sender.
    pub master_for_sender: bool,
    /// Correlation token embedded into the outbound reply-to address.
    /// Generated when the message is sent by email, consumed when an
    /// inbound reply arrives, never reused.
    pub reply_token: Option<String>,
}

impl Message {
    pub fn is_thread_root(&self) -> bool {
        match self.thread_id {
            None => true,
            Some(thread_id) => thread_id == self.id,
        }
    }

    /// Whether both parties soft-deleted their copy, which hides the
    /// message from any external surface.
    pub fn is_deleted_on_both_sides(&self) -> bool {
        self.sender_deleted_at.is_some() && self.recipient_deleted_at.is_some()
    }

    /// Generates a fresh correlation token: lowercase alphanumeric,
    /// opaque, unique per message.
    pub fn generate_reply_token() -> String {
        Uuid::new_v4().to_simple().to_string()
    }

    /// Builds a reply to this message sent by `replier`, addressed back
    /// to the original sender. The reply joins this message's thread
    /// and records this message as its parent.
    pub fn build_reply(&self, replier: &User, body: &str, sent_at: DateTime<Utc>) -> Result<Self> {
        if body.trim().is_empty() {
            return Err(Error::EmptyReplyBodyError);
        }
        if !replier.is_active {
            return Err(Error::InactiveReplierError(replier.id));
        }
        if self.sender_id <= 0 {
            return Err(Error::MissingReplyRecipientError(self.id));
        }

        let subject = if self.subject.starts_with("Re:") {
            self.subject.clone()
        } else {
            format!("Re: {}", self.subject)
        };

        Ok(Message {
            id: 0,
            sender_id: replier.id,
            recipient_id: Some(self.sender_id),
            subject,
            body: body.to_owned(),
            sent_at,
            thread_id: Some(self.thread_id.unwrap_or(self.id)),
            parent_id: Some(self.id),
            moderation_status: ModerationStatus::Accepted,
            sender_deleted_at: None,
            recipient_deleted_at: None,
            multi_conversation_id: self.multi_conversation_id,
            master_for_sender: false,
            reply_token: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Error, Message, User};

    fn replier() -> User {
        User {
            id: 7,
            username: "bob".into(),
            email: "bob@localhost".into(),
            full_name: "Bob".into(),
            avatar_url: None,
            is_active: true,
        }
    }

    #[test]
    fn thread_root() {
        let mut msg = Message {
            id: 3,
            ..Message::default()
        };
        assert!(msg.is_thread_root());

        msg.thread_id = Some(3);
        assert!(msg.is_thread_root());

        msg.thread_id = Some(2);
        assert!(!msg.is_thread_root());
    }

    #[test]
    fn build_reply_joins_thread() {
        let original = Message {
            id: 3,
            sender_id: 1,
            recipient_id: Some(7),
            subject: "Hello".into(),
            thread_id: None,
            ..Message::default()
        };

        let reply = original
            .build_reply(&replier(), "Hi back", Utc::now())
            .unwrap();
        assert_eq!(reply.sender_id, 7);
        assert_eq!(reply.recipient_id, Some(1));
        assert_eq!(reply.parent_id, Some(3));
        assert_eq!(reply.thread_id, Some(3));
        assert_eq!(reply.subject, "Re: Hello");

        let nested = reply.build_reply(&replier(), "again", Utc::now()).unwrap();
        assert_eq!(nested.thread_id, Some(3));
        assert_eq!(nested.subject, "Re: Hello");
    }

    #[test]
    fn build_reply_rejects_empty_body() {
        let original = Message {
            id: 3,
            sender_id: 1,
            ..Message::default()
        };
        assert!(matches!(
            original.build_reply(&replier(), "  \n ", Utc::now()),
            Err(Error::EmptyReplyBodyError)
        ));
    }

    #[test]
    fn reply_tokens_are_opaque_and_unique() {
        let a = Message::generate_reply_token();
        let b = Message::generate_reply_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
