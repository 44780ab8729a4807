//! HTTP chat API module.
//!
//! Blocking REST implementation of the [`ChatApi`] trait. Every call
//! carries the admin auth headers and a bounded timeout taken from the
//! configuration; a timed-out call surfaces as an ordinary transport
//! error and is handled by the reconciler's log-and-continue policy.

use log::debug;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    api::{ApiOutcome, ApiResult, ChatApi, ChatRoom, ChatSession, ChatUser, Error, Result},
    ChatConfig,
};

#[derive(Debug, Clone)]
struct AuthHeaders {
    token: String,
    user_id: String,
}

pub struct HttpChatApi {
    base_url: String,
    client: Client,
    auth: AuthHeaders,
}

impl HttpChatApi {
    /// Logs in with the configured admin credentials and returns a
    /// ready-to-use connection.
    pub fn connect(config: &ChatConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| Error::TransportError(err.to_string()))?;

        let response: Value = client
            .post(format!("{}/api/v1/login", config.base_url))
            .json(&json!({ "user": config.user, "password": config.password }))
            .send()
            .map_err(|err| Error::TransportError(err.to_string()))?
            .json()
            .map_err(|err| Error::TransportError(err.to_string()))?;

        let data = &response["data"];
        match (data["authToken"].as_str(), data["userId"].as_str()) {
            (Some(token), Some(user_id)) => Ok(Self {
                base_url: config.base_url.clone(),
                client,
                auth: AuthHeaders {
                    token: token.to_owned(),
                    user_id: user_id.to_owned(),
                },
            }),
            _ => Err(Error::LoginError(config.user.clone())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        debug!("GET {}", path);
        self.client
            .get(self.url(path))
            .query(query)
            .header("X-Auth-Token", &self.auth.token)
            .header("X-User-Id", &self.auth.user_id)
            .send()
            .map_err(|err| Error::TransportError(err.to_string()))?
            .json()
            .map_err(|err| Error::TransportError(err.to_string()))
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        debug!("POST {}", path);
        self.client
            .post(self.url(path))
            .json(body)
            .header("X-Auth-Token", &self.auth.token)
            .header("X-User-Id", &self.auth.user_id)
            .send()
            .map_err(|err| Error::TransportError(err.to_string()))?
            .json()
            .map_err(|err| Error::TransportError(err.to_string()))
    }

    /// Splits a raw response into the documented success/error shape.
    fn outcome(response: Value) -> ApiOutcome<Value> {
        if response["success"].as_bool().unwrap_or(false) {
            ApiOutcome::Success(response)
        } else {
            ApiOutcome::failure(
                response["errorType"].as_str(),
                response["error"].as_str(),
            )
        }
    }

    fn unit_outcome(response: Value) -> ApiOutcome<()> {
        Self::outcome(response).map(|_| ())
    }

    fn parse_user(value: &Value) -> ChatUser {
        ChatUser {
            id: value["_id"].as_str().unwrap_or_default().to_owned(),
            username: value["username"].as_str().unwrap_or_default().to_owned(),
            name: value["name"].as_str().unwrap_or_default().to_owned(),
            emails: value["emails"]
                .as_array()
                .map(|emails| {
                    emails
                        .iter()
                        .filter_map(|e| e["address"].as_str())
                        .map(ToOwned::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn parse_room(value: &Value) -> ChatRoom {
        ChatRoom {
            id: value["_id"].as_str().unwrap_or_default().to_owned(),
            name: value["name"].as_str().unwrap_or_default().to_owned(),
            archived: value["archived"].as_bool().unwrap_or(false),
        }
    }
}

impl ChatApi for HttpChatApi {
    fn list_users(&self) -> ApiResult<Vec<ChatUser>> {
        let response = self.get("users.list", &[("count", "0")])?;
        Ok(Self::outcome(response).map(|value| {
            value["users"]
                .as_array()
                .map(|users| users.iter().map(Self::parse_user).collect())
                .unwrap_or_default()
        }))
    }

    fn find_user(&self, username: &str) -> ApiResult<Option<ChatUser>> {
        let response = self.get("users.info", &[("username", username)])?;
        Ok(match Self::outcome(response) {
            ApiOutcome::Success(value) => {
                ApiOutcome::Success(Some(Self::parse_user(&value["user"])))
            }
            // The service reports a missing user as an ordinary error;
            // for a lookup that simply means "absent".
            ApiOutcome::Failure { .. } => ApiOutcome::Success(None),
        })
    }

    fn create_user(&self, username: &str, email: &str, name: &str) -> ApiResult<ChatUser> {
        let response = self.post(
            "users.create",
            &json!({
                "username": username,
                "email": email,
                "name": name,
                "password": Uuid::new_v4().to_string(),
                "verified": true,
            }),
        )?;
        Ok(Self::outcome(response).map(|value| Self::parse_user(&value["user"])))
    }

    fn update_user(&self, user_id: &str, email: &str, name: &str) -> ApiResult<()> {
        let response = self.post(
            "users.update",
            &json!({
                "userId": user_id,
                "data": { "email": email, "name": name, "verified": true },
            }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn delete_user(&self, user_id: &str) -> ApiResult<()> {
        let response = self.post("users.delete", &json!({ "userId": user_id }))?;
        Ok(Self::unit_outcome(response))
    }

    fn avatar_url(&self, username: &str) -> ApiResult<Option<String>> {
        // The endpoint redirects to the actual image; the final URL is
        // the avatar URL.
        let response = self
            .client
            .get(self.url("users.getAvatar"))
            .query(&[("username", username)])
            .header("X-Auth-Token", &self.auth.token)
            .header("X-User-Id", &self.auth.user_id)
            .send()
            .map_err(|err| Error::TransportError(err.to_string()))?;
        if response.status().is_success() {
            Ok(ApiOutcome::Success(Some(response.url().to_string())))
        } else {
            Ok(ApiOutcome::Success(None))
        }
    }

    fn set_avatar(&self, username: &str, avatar_url: &str) -> ApiResult<()> {
        let response = self.post(
            "users.setAvatar",
            &json!({ "username": username, "avatarUrl": avatar_url }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn set_user_preferences(
        &self,
        user_id: &str,
        preferences: &serde_json::Value,
    ) -> ApiResult<()> {
        let response = self.post(
            "users.setPreferences",
            &json!({ "userId": user_id, "data": preferences }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn create_room(&self, name: &str, members: &[String]) -> ApiResult<ChatRoom> {
        let response = self.post(
            "groups.create",
            &json!({ "name": name, "members": members }),
        )?;
        Ok(Self::outcome(response).map(|value| Self::parse_room(&value["group"])))
    }

    fn create_direct_room(&self, username: &str) -> ApiResult<String> {
        let response = self.post("im.create", &json!({ "username": username }))?;
        Ok(Self::outcome(response).map(|value| {
            value["room"]["_id"]
                .as_str()
                .unwrap_or_default()
                .to_owned()
        }))
    }

    fn find_room(&self, name: &str) -> ApiResult<Option<ChatRoom>> {
        let response = self.get("rooms.adminRooms", &[("filter", name)])?;
        Ok(Self::outcome(response).map(|value| {
            value["rooms"]
                .as_array()
                .and_then(|rooms| {
                    rooms
                        .iter()
                        .find(|room| room["name"].as_str() == Some(name))
                })
                .map(Self::parse_room)
        }))
    }

    fn rename_room(&self, room_id: &str, new_name: &str) -> ApiResult<()> {
        let response = self.post(
            "groups.rename",
            &json!({ "roomId": room_id, "name": new_name }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn set_topic(&self, room_id: &str, topic: &str) -> ApiResult<()> {
        let response = self.post(
            "groups.setTopic",
            &json!({ "roomId": room_id, "topic": topic }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn archive_room(&self, room_id: &str) -> ApiResult<()> {
        let response = self.post("groups.archive", &json!({ "roomId": room_id }))?;
        Ok(Self::unit_outcome(response))
    }

    fn unarchive_room(&self, room_id: &str) -> ApiResult<()> {
        let response = self.post("groups.unarchive", &json!({ "roomId": room_id }))?;
        Ok(Self::unit_outcome(response))
    }

    fn delete_room(&self, room_id: &str) -> ApiResult<()> {
        let response = self.post("groups.delete", &json!({ "roomId": room_id }))?;
        Ok(Self::unit_outcome(response))
    }

    fn invite(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        let response = self.post(
            "groups.invite",
            &json!({ "roomId": room_id, "userId": user_id }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn kick(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        let response = self.post(
            "groups.kick",
            &json!({ "roomId": room_id, "userId": user_id }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn add_moderator(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        let response = self.post(
            "groups.addModerator",
            &json!({ "roomId": room_id, "userId": user_id }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn remove_moderator(&self, room_id: &str, user_id: &str) -> ApiResult<()> {
        let response = self.post(
            "groups.removeModerator",
            &json!({ "roomId": room_id, "userId": user_id }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn post_message(&self, room_id: &str, text: &str) -> ApiResult<String> {
        let response = self.post(
            "chat.postMessage",
            &json!({ "roomId": room_id, "text": text }),
        )?;
        Ok(Self::outcome(response).map(|value| {
            value["message"]["_id"]
                .as_str()
                .unwrap_or_default()
                .to_owned()
        }))
    }

    fn update_message(&self, room_id: &str, message_id: &str, text: &str) -> ApiResult<()> {
        let response = self.post(
            "chat.update",
            &json!({ "roomId": room_id, "msgId": message_id, "text": text }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn delete_message(&self, room_id: &str, message_id: &str) -> ApiResult<()> {
        let response = self.post(
            "chat.delete",
            &json!({ "roomId": room_id, "msgId": message_id }),
        )?;
        Ok(Self::unit_outcome(response))
    }

    fn update_setting(&self, setting_id: &str, value: &serde_json::Value) -> ApiResult<()> {
        let response = self.post(&format!("settings/{}", setting_id), &json!({ "value": value }))?;
        Ok(Self::unit_outcome(response))
    }

    fn open_session(&self, username: &str) -> Result<Box<dyn ChatSession + Send>> {
        let response = self.post("users.createToken", &json!({ "username": username }))?;
        let data = &response["data"];
        match (data["authToken"].as_str(), data["userId"].as_str()) {
            (Some(token), Some(user_id)) => Ok(Box::new(HttpChatSession {
                base_url: self.base_url.clone(),
                client: self.client.clone(),
                auth: AuthHeaders {
                    token: token.to_owned(),
                    user_id: user_id.to_owned(),
                },
            })),
            _ => Err(Error::LoginError(username.to_owned())),
        }
    }
}

/// An impersonated per-user connection backed by a user token.
pub struct HttpChatSession {
    base_url: String,
    client: Client,
    auth: AuthHeaders,
}

impl HttpChatSession {
    fn get(&self, path: &str) -> Result<Value> {
        self.client
            .get(format!("{}/api/v1/{}", self.base_url, path))
            .header("X-Auth-Token", &self.auth.token)
            .header("X-User-Id", &self.auth.user_id)
            .send()
            .map_err(|err| Error::TransportError(err.to_string()))?
            .json()
            .map_err(|err| Error::TransportError(err.to_string()))
    }
}

impl ChatSession for HttpChatSession {
    fn probe(&self) -> bool {
        self.get("me")
            .map(|value| value["success"].as_bool() != Some(false))
            .unwrap_or(false)
    }

    fn unread_total(&self) -> ApiResult<u64> {
        let response = self.get("subscriptions.get")?;
        Ok(HttpChatApi::outcome(response).map(|value| {
            value["update"]
                .as_array()
                .map(|subs| {
                    subs.iter()
                        .filter_map(|sub| sub["unread"].as_u64())
                        .sum()
                })
                .unwrap_or(0)
        }))
    }
}
