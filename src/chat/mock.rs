//! In-memory chat API used by the unit tests.

use std::{
    cell::{Cell, RefCell},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::api::{
    ApiOutcome, ApiResult, ChatApi, ChatRoom, ChatSession, ChatUser, Result,
    ERR_ARCHIVED_DUPLICATE_NAME, ERR_DUPLICATE_CHANNEL_NAME,
};

#[derive(Default)]
pub(crate) struct MockChatApi {
    pub calls: RefCell<Vec<String>>,
    pub users: RefCell<Vec<ChatUser>>,
    pub rooms: RefCell<Vec<ChatRoom>>,
    /// Forces the next room creation to fail with the given error type.
    pub fail_next_create: RefCell<Option<String>>,
    /// Shared liveness flag of all opened sessions.
    session_health: Arc<AtomicBool>,
    next_id: Cell<u32>,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self {
            session_health: Arc::new(AtomicBool::new(true)),
            ..Self::default()
        }
    }

    /// Makes every already-opened session fail its next probe.
    pub fn kill_sessions(&self) {
        self.session_health.store(false, Ordering::SeqCst);
    }

    pub fn with_room(self, name: &str, archived: bool) -> Self {
        let id = self.fresh_id("room");
        self.rooms.borrow_mut().push(ChatRoom {
            id,
            name: name.into(),
            archived,
        });
        self
    }

    pub fn with_user(self, username: &str) -> Self {
        let id = self.fresh_id("chatuser");
        self.users.borrow_mut().push(ChatUser {
            id,
            username: username.into(),
            name: username.into(),
            emails: vec![format!("{}@remote.tld", username)],
        });
        self
    }

    pub fn room_names(&self) -> Vec<String> {
        self.rooms.borrow().iter().map(|r| r.name.clone()).collect()
    }

    pub fn recorded(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let next = self.next_id.get() + 1;
        self.next_id.set(next);
        format!("{}-{}", prefix, next)
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl ChatApi for MockChatApi {
    fn list_users(&self) -> ApiResult<Vec<ChatUser>> {
        self.record("users.list".into());
        Ok(ApiOutcome::Success(self.users.borrow().clone()))
    }

    fn find_user(&self, username: &str) -> ApiResult<Option<ChatUser>> {
        self.record(format!("users.info:{}", username));
        Ok(ApiOutcome::Success(
            self.users
                .borrow()
                .iter()
                .find(|u| u.username == username)
                .cloned(),
        ))
    }

    fn create_user(&self, username: &str, email: &str, name: &str) -> ApiResult<ChatUser> {
        self.record(format!("users.create:{}", username));
        let user = ChatUser {
            id: self.fresh_id("chatuser"),
            username: username.into(),
            name: name.into(),
            emails: vec![email.into()],
        };
        self.users.borrow_mut().push(user.clone());
        Ok(ApiOutcome::Success(user))
    }

    fn update_user(&self, user_id: &str, _email: &str, _name: &str) -> ApiResult<()> {
        self.record(format!("users.update:{}", user_id));
        Ok(ApiOutcome::Success(()))
    }

    fn delete_user(&self, user_id: &str) -> ApiResult<()> {
        self.record(format!("users.delete:{}", user_id));
        self.users.borrow_mut().retain(|u| u.id != user_id);
        Ok(ApiOutcome::Success(()))
    }

    fn avatar_url(&self, _username: &str) -> ApiResult<Option<String>> {
        Ok(ApiOutcome::Success(None))
    }

    fn set_avatar(&self, username: &str, _avatar_url: &str) -> ApiResult<()> {
        self.record(format!("users.setAvatar:{}", username));
        Ok(ApiOutcome::Success(()))
    }

    fn set_user_preferences(
        &self,
        user_id: &str,
        _preferences: &serde_json::Value,
    ) -> ApiResult<()> {
        self.record(format!("users.setPreferences:{}", user_id));
        Ok(ApiOutcome::Success(()))
    }

    fn create_room(&self, name: &str, _members: &[String]) -> ApiResult<ChatRoom> {
        self.record(format!("groups.create:{}", name));

        if let Some(error_type) = self.fail_next_create.borrow_mut().take() {
            return Ok(ApiOutcome::failure(Some(error_type), Some("forced")));
        }

        if let Some(existing) = self.rooms.borrow().iter().find(|r| r.name == name) {
            let error_type = if existing.archived {
                ERR_ARCHIVED_DUPLICATE_NAME
            } else {
                ERR_DUPLICATE_CHANNEL_NAME
            };
            return Ok(ApiOutcome::failure(
                Some(error_type),
                Some("name already taken"),
            ));
        }

        let room = ChatRoom {
            id: self.fresh_id("room"),
            name: name.into(),
            archived: false,
        };
        self.rooms.borrow_mut().push(room.clone());
        Ok(ApiOutcome::Success(room))
    }

    fn create_direct_room(&self, username: &str) -> ApiResult<String> {
        self.record(format!("im.create:{}", username));
        Ok(ApiOutcome::Success(format!("im-{}", username)))
    }

    fn find_room(&self, name: &str) -> ApiResult<Option<ChatRoom>> {
        self.record(format!("rooms.adminRooms:{}", name));
        Ok(ApiOutcome::Success(
            self.rooms.borrow().iter().find(|r| r.name == name).cloned(),
        ))
    }

    fn rename_room(&self, room_id: &str, new_name: &str) -> ApiResult<()> {
        self.record(format!("groups.rename:{}:{}", room_id, new_name));
        if let Some(room) = self.rooms.borrow_mut().iter_mut().find(|r| r.id == room_id) {
            room.name = new_name.into();
        }
        Ok(ApiOutcome::Success(()))
    }

    fn set_topic(&self, room_id: &str, topic: &str) -> ApiResult<()> {
        self.record(format!("groups.setTopic:{}:{}", room_id, topic));
        Ok(ApiOutcome::Success(()))
    }

    fn archive_room(&self, room_id: &str) -> ApiResult<()> {
        self.record(format!("groups.archive:{}", room_id));
        if let Some(room) = self.rooms.borrow_mut().iter_mut().find(|r| r.id == room_id) {
            room.archived = true;
        }
        Ok(ApiOutcome::Success(()))
    }

    fn unarchive_room(&self, room_id: &str) -> ApiResult<()> {
        self.record(format!("groups.unarchive:{}", room_id));
        Ok(ApiOutcome::Success(()))
    }

    fn delete_room(&self, room_id: &str) -> ApiResult<()> {
        self.record(format!("groups.delete:{}", room_id));
        self.rooms.borrow_mut().retain(|r| r.id != room_id);
        Ok(ApiOutcome::Success(()))
    }

    fn invite(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        self.record(format!("groups.invite:{}:{}", room_id, user_id));
        Ok(ApiOutcome::Success(()))
    }

    fn kick(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        self.record(format!("groups.kick:{}:{}", room_id, user_id));
        Ok(ApiOutcome::Success(()))
    }

    fn add_moderator(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        self.record(format!("groups.addModerator:{}:{}", room_id, user_id));
        Ok(ApiOutcome::Success(()))
    }

    fn remove_moderator(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        self.record(format!("groups.removeModerator:{}:{}", room_id, user_id));
        Ok(ApiOutcome::Success(()))
    }

    fn post_message(&self, room_id: &str, _text: &str) -> ApiResult<String> {
        let id = self.fresh_id("msg");
        self.record(format!("chat.postMessage:{}:{}", room_id, id));
        Ok(ApiOutcome::Success(id))
    }

    fn update_message(&self, room_id: &str, message_id: &str, _text: &str) -> ApiResult<()> {
        self.record(format!("chat.update:{}:{}", room_id, message_id));
        Ok(ApiOutcome::Success(()))
    }

    fn delete_message(&self, room_id: &str, message_id: &str) -> ApiResult<()> {
        self.record(format!("chat.delete:{}:{}", room_id, message_id));
        Ok(ApiOutcome::Success(()))
    }

    fn update_setting(&self, setting_id: &str, _value: &serde_json::Value) -> ApiResult<()> {
        self.record(format!("settings:{}", setting_id));
        Ok(ApiOutcome::Success(()))
    }

    fn open_session(&self, username: &str) -> Result<Box<dyn ChatSession + Send>> {
        self.record(format!("users.createToken:{}", username));
        Ok(Box::new(MockChatSession {
            health: self.session_health.clone(),
        }))
    }
}

pub(crate) struct MockChatSession {
    health: Arc<AtomicBool>,
}

impl ChatSession for MockChatSession {
    fn probe(&self) -> bool {
        self.health.load(Ordering::SeqCst)
    }

    fn unread_total(&self) -> ApiResult<u64> {
        Ok(ApiOutcome::Success(0))
    }
}
