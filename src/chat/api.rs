//! Chat API module.
//!
//! This module exposes the chat API trait, the thin seam between the
//! reconciler and the remote chat service. Every call yields a success
//! flag plus either a payload or an error-type string; the reconciler
//! only branches on the documented error types below and treats all
//! others generically.

use std::result;
use thiserror::Error;

/// Room creation hit an active room with the same name.
pub const ERR_DUPLICATE_CHANNEL_NAME: &str = "error-duplicate-channel-name";
/// The target room is archived.
pub const ERR_ROOM_ARCHIVED: &str = "error-room-archived";
/// Room creation collides with an archived room of the same name.
pub const ERR_ARCHIVED_DUPLICATE_NAME: &str = "error-archived-duplicate-name";
/// Moderator grant on a user who already is one.
pub const ERR_USER_ALREADY_MODERATOR: &str = "error-user-already-moderator";
/// Moderator revocation on a user who is not one.
pub const ERR_USER_NOT_MODERATOR: &str = "error-user-not-moderator";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot reach chat service: {0}")]
    TransportError(String),
    #[error("cannot parse chat service response")]
    ParseResponseError(#[source] serde_json::Error),
    #[error("cannot login to chat service as {0}")]
    LoginError(String),
}

pub type Result<T> = result::Result<T, Error>;

/// Application-level outcome of a chat API call. Transport failures are
/// reported through [`Error`] instead.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ApiOutcome<T> {
    Success(T),
    Failure {
        error_type: Option<String>,
        message: Option<String>,
    },
}

impl<T> ApiOutcome<T> {
    pub fn failure<E: ToString, M: ToString>(error_type: Option<E>, message: Option<M>) -> Self {
        ApiOutcome::Failure {
            error_type: error_type.map(|e| e.to_string()),
            message: message.map(|m| m.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiOutcome::Success(_))
    }

    pub fn error_type(&self) -> Option<&str> {
        match self {
            ApiOutcome::Success(_) => None,
            ApiOutcome::Failure { error_type, .. } => error_type.as_deref(),
        }
    }

    /// Maps the success payload, passing failures through unchanged.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ApiOutcome<U> {
        match self {
            ApiOutcome::Success(payload) => ApiOutcome::Success(f(payload)),
            ApiOutcome::Failure {
                error_type,
                message,
            } => ApiOutcome::Failure {
                error_type,
                message,
            },
        }
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            ApiOutcome::Success(payload) => Some(payload),
            ApiOutcome::Failure { .. } => None,
        }
    }

    /// Context string for failure logging.
    pub fn describe(&self) -> String {
        match self {
            ApiOutcome::Success(_) => "success".into(),
            ApiOutcome::Failure {
                error_type,
                message,
            } => format!(
                "errorType={}, message={}",
                error_type.as_deref().unwrap_or("<none>"),
                message.as_deref().unwrap_or("<none>"),
            ),
        }
    }
}

pub type ApiResult<T> = Result<ApiOutcome<T>>;

/// A user record as seen by the chat service.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChatUser {
    pub id: String,
    pub username: String,
    pub name: String,
    pub emails: Vec<String>,
}

/// A room record as seen by the chat service.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChatRoom {
    pub id: String,
    pub name: String,
    pub archived: bool,
}

/// The operations the bridge consumes from the remote chat service.
///
/// Implementations are expected to be stateless apart from their
/// authenticated connection; idempotency and drift repair live in the
/// reconciler, not here.
pub trait ChatApi {
    fn list_users(&self) -> ApiResult<Vec<ChatUser>>;
    fn find_user(&self, username: &str) -> ApiResult<Option<ChatUser>>;
    fn create_user(&self, username: &str, email: &str, name: &str) -> ApiResult<ChatUser>;
    fn update_user(&self, user_id: &str, email: &str, name: &str) -> ApiResult<()>;
    fn delete_user(&self, user_id: &str) -> ApiResult<()>;
    fn avatar_url(&self, username: &str) -> ApiResult<Option<String>>;
    fn set_avatar(&self, username: &str, avatar_url: &str) -> ApiResult<()>;
    fn set_user_preferences(&self, user_id: &str, preferences: &serde_json::Value)
        -> ApiResult<()>;

    fn create_room(&self, name: &str, members: &[String]) -> ApiResult<ChatRoom>;
    /// Opens (or reuses) the direct-message room with the given user
    /// and returns its room id.
    fn create_direct_room(&self, username: &str) -> ApiResult<String>;
    /// Looks a room up by exact name, archived rooms included.
    fn find_room(&self, name: &str) -> ApiResult<Option<ChatRoom>>;
    fn rename_room(&self, room_id: &str, new_name: &str) -> ApiResult<()>;
    fn set_topic(&self, room_id: &str, topic: &str) -> ApiResult<()>;
    fn archive_room(&self, room_id: &str) -> ApiResult<()>;
    fn unarchive_room(&self, room_id: &str) -> ApiResult<()>;
    fn delete_room(&self, room_id: &str) -> ApiResult<()>;

    fn invite(&self, room_id: &str, user_id: &str) -> ApiResult<()>;
    fn kick(&self, room_id: &str, user_id: &str) -> ApiResult<()>;
    fn add_moderator(&self, room_id: &str, user_id: &str) -> ApiResult<()>;
    fn remove_moderator(&self, room_id: &str, user_id: &str) -> ApiResult<()>;

    /// Posts a message and returns its external id.
    fn post_message(&self, room_id: &str, text: &str) -> ApiResult<String>;
    fn update_message(&self, room_id: &str, message_id: &str, text: &str) -> ApiResult<()>;
    fn delete_message(&self, room_id: &str, message_id: &str) -> ApiResult<()>;

    fn update_setting(&self, setting_id: &str, value: &serde_json::Value) -> ApiResult<()>;

    /// Opens an impersonated session for the given username, used for
    /// per-user reads such as unread counts.
    fn open_session(&self, username: &str) -> Result<Box<dyn ChatSession + Send>>;
}

/// An impersonated per-user connection.
pub trait ChatSession {
    /// Liveness probe. A failed probe means the session must be
    /// discarded and recreated.
    fn probe(&self) -> bool;
    /// Total unread message count across the user's subscriptions.
    fn unread_total(&self) -> ApiResult<u64>;
}
