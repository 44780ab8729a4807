//! Reconciliation module.
//!
//! The reconciler brings the remote chat service in line with the
//! local domain: one mirrored account per active user, two mirrored
//! rooms per group, room membership following group membership, and
//! one mirrored chat message per note.
//!
//! External identifiers are cached through the narrow
//! [`ExternalIdStore`] seam and re-resolved by natural key on a cache
//! miss. Remote failures are logged with context and never abort the
//! batch; an entity left unmapped is picked up again by the next full
//! sweep.

use log::{debug, info, warn};
use std::{collections::HashMap, result};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    api::{
        ApiOutcome, ApiResult, ChatApi, ChatRoom, ChatUser, ERR_ARCHIVED_DUPLICATE_NAME,
        ERR_DUPLICATE_CHANNEL_NAME, ERR_ROOM_ARCHIVED, ERR_USER_ALREADY_MODERATOR,
        ERR_USER_NOT_MODERATOR,
    },
    store, Directory, ExternalIdStore, Group, Membership, Note, RoomKind, Tenant, User,
    EXTERNAL_KIND_NOTE_MESSAGE, EXTERNAL_KIND_ROOM, EXTERNAL_KIND_USER,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    StoreError(#[from] store::Error),
}

pub type Result<T> = result::Result<T, Error>;

pub struct Reconciler<'a> {
    api: &'a dyn ChatApi,
    directory: &'a dyn Directory,
    ids: &'a dyn ExternalIdStore,
}

fn user_key(user_id: i64) -> String {
    user_id.to_string()
}

fn room_key(group_id: i64, kind: RoomKind) -> String {
    format!("{}:{}", group_id, kind.key())
}

impl<'a> Reconciler<'a> {
    pub fn new(
        api: &'a dyn ChatApi,
        directory: &'a dyn Directory,
        ids: &'a dyn ExternalIdStore,
    ) -> Self {
        Self {
            api,
            directory,
            ids,
        }
    }

    /// Runs a remote call under the log-and-continue policy: any
    /// non-success is logged with context and turned into `None`.
    fn call<T>(&self, context: &str, result: ApiResult<T>) -> Option<T> {
        match result {
            Ok(ApiOutcome::Success(payload)) => Some(payload),
            Ok(failure) => {
                warn!("chat call {} failed: {}", context, failure.describe());
                None
            }
            Err(err) => {
                warn!("chat call {} failed: {}", context, err);
                None
            }
        }
    }

    /// Same as [`Self::call`] but treats the given error type as an
    /// idempotent success.
    fn call_tolerating(
        &self,
        context: &str,
        result: ApiResult<()>,
        tolerated: &str,
    ) -> Option<()> {
        match result {
            Ok(ref outcome) if outcome.error_type() == Some(tolerated) => Some(()),
            other => self.call(context, other),
        }
    }

    /// Resolves the external account id for a user, creating the
    /// remote account if needed. Returns `None` when the user is not
    /// mirrored (inactive) or the remote side failed this cycle.
    pub fn ensure_user(&self, tenant: &Tenant, user: &User) -> Result<Option<String>> {
        if !user.is_active {
            return Ok(None);
        }

        let key = user_key(user.id);
        if let Some(external) = self.ids.external_id(EXTERNAL_KIND_USER, &key)? {
            return Ok(Some(external));
        }

        // Cache miss: resolve by natural key before creating, so an
        // account created out-of-band is adopted instead of duplicated.
        let remote = match self.call("users.info", self.api.find_user(&user.username)) {
            Some(remote) => remote,
            None => return Ok(None),
        };

        let external = match remote {
            Some(remote) => remote.id,
            None => {
                let created = self.call(
                    "users.create",
                    self.api
                        .create_user(&user.username, &user.email, &user.full_name),
                );
                match created {
                    Some(created) => {
                        if let Some(avatar) = user.avatar_url.as_deref() {
                            self.call(
                                "users.setAvatar",
                                self.api.set_avatar(&user.username, avatar),
                            );
                        }
                        created.id
                    }
                    None => return Ok(None),
                }
            }
        };

        self.ids.set_external_id(EXTERNAL_KIND_USER, &key, &external)?;
        info!(
            "tenant {}: mirrored user {} as {}",
            tenant.id, user.username, external
        );
        Ok(Some(external))
    }

    /// Pushes local changes of a user to the remote account, repairing
    /// a stale mapping when the account was deleted out-of-band.
    pub fn update_user(&self, tenant: &Tenant, user: &User) -> Result<()> {
        let external = match self.ensure_user(tenant, user)? {
            Some(external) => external,
            None => return Ok(()),
        };

        let remote = match self.call("users.info", self.api.find_user(&user.username)) {
            Some(remote) => remote,
            None => return Ok(()),
        };

        match remote {
            Some(remote) => self.refresh_user(user, &external, &remote),
            None => {
                warn!(
                    "tenant {}: remote account for {} vanished, recreating",
                    tenant.id, user.username
                );
                self.ids
                    .remove_external_id(EXTERNAL_KIND_USER, &user_key(user.id))?;
                self.ensure_user(tenant, user)?;
                Ok(())
            }
        }
    }

    /// Drift check against a known remote record; issues an update
    /// only when something actually changed.
    fn refresh_user(&self, user: &User, external: &str, remote: &ChatUser) -> Result<()> {
        let mut changed = !remote.emails.iter().any(|email| email == &user.email)
            || remote.name != user.full_name;

        if !changed {
            if let Some(avatar) = user.avatar_url.as_deref() {
                let remote_avatar = self
                    .call("users.getAvatar", self.api.avatar_url(&user.username))
                    .flatten();
                changed = remote_avatar.as_deref() != Some(avatar);
            }
        }

        if changed {
            self.call(
                "users.update",
                self.api.update_user(external, &user.email, &user.full_name),
            );
            if let Some(avatar) = user.avatar_url.as_deref() {
                self.call(
                    "users.setAvatar",
                    self.api.set_avatar(&user.username, avatar),
                );
            }
        }
        Ok(())
    }

    /// Deletes the mirrored account, typically when the local account
    /// is removed for good.
    pub fn delete_user(&self, tenant: &Tenant, user_id: i64) -> Result<()> {
        let key = user_key(user_id);
        if let Some(external) = self.ids.external_id(EXTERNAL_KIND_USER, &key)? {
            if self
                .call("users.delete", self.api.delete_user(&external))
                .is_some()
            {
                self.ids.remove_external_id(EXTERNAL_KIND_USER, &key)?;
                info!("tenant {}: deleted mirrored user {}", tenant.id, external);
            }
        }
        Ok(())
    }

    /// Makes sure both mirrored rooms of a group exist and are mapped.
    pub fn ensure_group_rooms(&self, tenant: &Tenant, group: &Group) -> Result<()> {
        for kind in RoomKind::ALL {
            self.ensure_room(tenant, group, kind)?;
        }
        Ok(())
    }

    fn ensure_room(
        &self,
        tenant: &Tenant,
        group: &Group,
        kind: RoomKind,
    ) -> Result<Option<String>> {
        let key = room_key(group.id, kind);
        if let Some(external) = self.ids.external_id(EXTERNAL_KIND_ROOM, &key)? {
            return Ok(Some(external));
        }

        let name = kind.room_name(group);
        let members = self.room_members(group)?;

        let room = match self.api.create_room(&name, &members) {
            Ok(ApiOutcome::Success(room)) => Some(room),
            Ok(failure) => match failure.error_type() {
                // An active room already carries this name: adopt it.
                Some(ERR_DUPLICATE_CHANNEL_NAME) => self
                    .call("rooms.adminRooms", self.api.find_room(&name))
                    .flatten(),
                // An archived room blocks the name: move it aside,
                // keep it archived, then try again.
                Some(ERR_ARCHIVED_DUPLICATE_NAME) | Some(ERR_ROOM_ARCHIVED) => {
                    self.repair_archived_collision(&name, &members)
                }
                _ => {
                    warn!(
                        "tenant {}: cannot create room {}: {}",
                        tenant.id,
                        name,
                        failure.describe()
                    );
                    None
                }
            },
            Err(err) => {
                warn!("tenant {}: cannot create room {}: {}", tenant.id, name, err);
                None
            }
        };

        match room {
            Some(room) => {
                self.ids.set_external_id(EXTERNAL_KIND_ROOM, &key, &room.id)?;
                info!("tenant {}: mirrored room {} as {}", tenant.id, name, room.id);
                Ok(Some(room.id))
            }
            None => Ok(None),
        }
    }

    fn repair_archived_collision(&self, name: &str, members: &[String]) -> Option<ChatRoom> {
        let stale = self
            .call("rooms.adminRooms", self.api.find_room(name))
            .flatten()?;
        let aside = format!("{}-archived-{}", name, Uuid::new_v4().to_simple());
        self.call(
            "groups.rename",
            self.api.rename_room(&stale.id, &aside),
        )?;
        debug!("moved stale archived room {} aside as {}", name, aside);
        self.call("groups.create", self.api.create_room(name, members))
    }

    fn room_members(&self, group: &Group) -> Result<Vec<String>> {
        let mut usernames = vec![];
        for membership in self.directory.group_memberships(group.id)? {
            if membership.status.is_pending() {
                continue;
            }
            if let Some(user) = self.directory.user_by_id(membership.user_id)? {
                if user.is_active {
                    usernames.push(user.username);
                }
            }
        }
        Ok(usernames)
    }

    /// Renames both mirrored rooms after a group slug change. Rooms
    /// without a mapping are created instead.
    pub fn rename_group_rooms(&self, tenant: &Tenant, group: &Group) -> Result<()> {
        for kind in RoomKind::ALL {
            let key = room_key(group.id, kind);
            match self.ids.external_id(EXTERNAL_KIND_ROOM, &key)? {
                Some(room_id) => {
                    self.call(
                        "groups.rename",
                        self.api.rename_room(&room_id, &kind.room_name(group)),
                    );
                }
                None => {
                    self.ensure_room(tenant, group, kind)?;
                }
            }
        }
        Ok(())
    }

    /// Archives both mirrored rooms, typically after group deletion.
    pub fn archive_group_rooms(&self, tenant: &Tenant, group_id: i64) -> Result<()> {
        for kind in RoomKind::ALL {
            let key = room_key(group_id, kind);
            if let Some(room_id) = self.ids.external_id(EXTERNAL_KIND_ROOM, &key)? {
                if self
                    .call("groups.archive", self.api.archive_room(&room_id))
                    .is_some()
                {
                    self.ids.remove_external_id(EXTERNAL_KIND_ROOM, &key)?;
                    info!("tenant {}: archived mirrored room {}", tenant.id, room_id);
                }
            }
        }
        Ok(())
    }

    /// Derives invite/kick/promote/demote calls from a before/after
    /// comparison of a membership.
    pub fn apply_membership_change(
        &self,
        tenant: &Tenant,
        before: Option<&Membership>,
        after: Option<&Membership>,
    ) -> Result<()> {
        match (before, after) {
            (None, Some(after)) => {
                if !after.status.is_pending() {
                    self.invite(tenant, after)?;
                    if after.is_moderator {
                        self.set_moderator(tenant, after, true)?;
                    }
                }
            }
            (Some(before), None) => {
                self.kick(tenant, before)?;
            }
            (Some(before), Some(after)) => {
                let rebound =
                    before.user_id != after.user_id || before.group_id != after.group_id;
                let entered_pending = after.status.is_pending() && !before.status.is_pending();
                let left_pending = before.status.is_pending() && !after.status.is_pending();

                if entered_pending || rebound {
                    self.kick(tenant, before)?;
                }
                if left_pending || rebound {
                    self.invite(tenant, after)?;
                }
                if !after.status.is_pending() && before.is_moderator != after.is_moderator {
                    self.set_moderator(tenant, after, after.is_moderator)?;
                }
            }
            (None, None) => (),
        }
        Ok(())
    }

    /// Applies the moderator flag of a membership.
    pub fn promote_or_demote(&self, tenant: &Tenant, membership: &Membership) -> Result<()> {
        self.set_moderator(tenant, membership, membership.is_moderator)
    }

    fn invite(&self, tenant: &Tenant, membership: &Membership) -> Result<()> {
        let group = match self.directory.group_by_id(membership.group_id)? {
            Some(group) => group,
            None => return Ok(()),
        };
        let user = match self.directory.user_by_id(membership.user_id)? {
            Some(user) => user,
            None => return Ok(()),
        };
        let external_user = match self.ensure_user(tenant, &user)? {
            Some(external) => external,
            None => return Ok(()),
        };

        for kind in RoomKind::ALL {
            if let Some(room_id) = self.ensure_room(tenant, &group, kind)? {
                self.call(
                    "groups.invite",
                    self.api.invite(&room_id, &external_user),
                );
            }
        }
        Ok(())
    }

    /// Kicks through existing mappings only: a kick must not create
    /// rooms or accounts as a side effect.
    fn kick(&self, _tenant: &Tenant, membership: &Membership) -> Result<()> {
        let external_user = match self
            .ids
            .external_id(EXTERNAL_KIND_USER, &user_key(membership.user_id))?
        {
            Some(external) => external,
            None => return Ok(()),
        };

        for kind in RoomKind::ALL {
            let key = room_key(membership.group_id, kind);
            if let Some(room_id) = self.ids.external_id(EXTERNAL_KIND_ROOM, &key)? {
                self.call("groups.kick", self.api.kick(&room_id, &external_user));
            }
        }
        Ok(())
    }

    fn set_moderator(
        &self,
        _tenant: &Tenant,
        membership: &Membership,
        moderator: bool,
    ) -> Result<()> {
        let external_user = match self
            .ids
            .external_id(EXTERNAL_KIND_USER, &user_key(membership.user_id))?
        {
            Some(external) => external,
            None => return Ok(()),
        };

        for kind in RoomKind::ALL {
            let key = room_key(membership.group_id, kind);
            if let Some(room_id) = self.ids.external_id(EXTERNAL_KIND_ROOM, &key)? {
                if moderator {
                    self.call_tolerating(
                        "groups.addModerator",
                        self.api.add_moderator(&room_id, &external_user),
                        ERR_USER_ALREADY_MODERATOR,
                    );
                } else {
                    self.call_tolerating(
                        "groups.removeModerator",
                        self.api.remove_moderator(&room_id, &external_user),
                        ERR_USER_NOT_MODERATOR,
                    );
                }
            }
        }
        Ok(())
    }

    /// Mirrors a note as a chat message into the group's news room,
    /// updating the mirrored message on subsequent saves.
    pub fn post_or_update_note(&self, tenant: &Tenant, note: &Note) -> Result<()> {
        let group = match self.directory.group_by_id(note.group_id)? {
            Some(group) => group,
            None => return Ok(()),
        };
        let room_id = match self.ensure_room(tenant, &group, RoomKind::News)? {
            Some(room_id) => room_id,
            None => return Ok(()),
        };

        let key = note.id.to_string();
        match self.ids.external_id(EXTERNAL_KIND_NOTE_MESSAGE, &key)? {
            Some(message_id) => {
                self.call(
                    "chat.update",
                    self.api.update_message(&room_id, &message_id, &note.text),
                );
            }
            None => {
                if let Some(message_id) =
                    self.call("chat.postMessage", self.api.post_message(&room_id, &note.text))
                {
                    self.ids
                        .set_external_id(EXTERNAL_KIND_NOTE_MESSAGE, &key, &message_id)?;
                }
            }
        }
        Ok(())
    }

    pub fn delete_note(&self, _tenant: &Tenant, note_id: i64, group_id: i64) -> Result<()> {
        let key = note_id.to_string();
        if let Some(message_id) = self.ids.external_id(EXTERNAL_KIND_NOTE_MESSAGE, &key)? {
            let room_key = room_key(group_id, RoomKind::News);
            if let Some(room_id) = self.ids.external_id(EXTERNAL_KIND_ROOM, &room_key)? {
                self.call(
                    "chat.delete",
                    self.api.delete_message(&room_id, &message_id),
                );
            }
            self.ids.remove_external_id(EXTERNAL_KIND_NOTE_MESSAGE, &key)?;
        }
        Ok(())
    }

    /// Full user sweep: adopts or creates every active user's remote
    /// account and repairs drifted names, emails and avatars.
    pub fn sync_users(&self, tenant: &Tenant) -> Result<()> {
        let remote_users: HashMap<String, ChatUser> =
            match self.call("users.list", self.api.list_users()) {
                Some(users) => users
                    .into_iter()
                    .map(|user| (user.username.clone(), user))
                    .collect(),
                None => return Ok(()),
            };

        let users = self.directory.active_users(None)?;
        let count = users.len();
        for (i, user) in users.iter().enumerate() {
            debug!("syncing user {}/{}", i + 1, count);
            match remote_users.get(&user.username) {
                Some(remote) => {
                    self.ids.set_external_id(
                        EXTERNAL_KIND_USER,
                        &user_key(user.id),
                        &remote.id,
                    )?;
                    self.refresh_user(user, &remote.id, remote)?;
                }
                None => {
                    self.ensure_user(tenant, user)?;
                }
            }
        }
        Ok(())
    }

    /// Full group sweep: makes sure every group has both mirrored
    /// rooms.
    pub fn sync_groups(&self, tenant: &Tenant) -> Result<()> {
        let groups = self.directory.groups()?;
        let count = groups.len();
        for (i, group) in groups.iter().enumerate() {
            debug!("syncing group {}/{}", i + 1, count);
            self.ensure_group_rooms(tenant, group)?;
        }
        Ok(())
    }

    /// Backfills the default notification preferences on every
    /// mirrored account.
    pub fn sync_notification_defaults(&self, tenant: &Tenant) -> Result<()> {
        let preferences = serde_json::json!({
            "desktopNotifications": "all",
            "emailNotificationMode": "mentions",
        });
        for user in self.directory.active_users(None)? {
            if let Some(external) = self.ensure_user(tenant, &user)? {
                self.call(
                    "users.setPreferences",
                    self.api.set_user_preferences(&external, &preferences),
                );
            }
        }
        Ok(())
    }

    /// Replays all visible two-party messages into their senders'
    /// direct-message rooms, used once when seeding a fresh chat
    /// server.
    pub fn sync_direct_messages(
        &self,
        _tenant: &Tenant,
        messages: &dyn crate::MessageStore,
    ) -> Result<()> {
        for message in messages.direct_messages()? {
            let sender = match self.directory.user_by_id(message.sender_id)? {
                Some(sender) => sender,
                None => continue,
            };
            let room_id = match self.call(
                "im.create",
                self.api.create_direct_room(&sender.username),
            ) {
                Some(room_id) => room_id,
                None => continue,
            };

            let text = if message.subject.is_empty() {
                message.body.clone()
            } else {
                format!("{}: {}", message.subject, message.body)
            };
            self.call("chat.postMessage", self.api.post_message(&room_id, &text));
        }
        Ok(())
    }

    /// Pushes server-wide settings, e.g. during initial provisioning.
    pub fn apply_server_settings(
        &self,
        _tenant: &Tenant,
        settings: &[(&str, serde_json::Value)],
    ) -> Result<()> {
        for (setting_id, value) in settings {
            self.call(
                "settings",
                self.api.update_setting(setting_id, value),
            );
        }
        Ok(())
    }

    /// Refreshes the topic of every mapped room to the group name.
    pub fn refresh_group_topics(&self, _tenant: &Tenant) -> Result<()> {
        for group in self.directory.groups()? {
            for kind in RoomKind::ALL {
                let key = room_key(group.id, kind);
                if let Some(room_id) = self.ids.external_id(EXTERNAL_KIND_ROOM, &key)? {
                    self.call("groups.setTopic", self.api.set_topic(&room_id, &group.name));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        chat::mock::MockChatApi, ExternalIdStore, Group, Membership, MembershipStatus,
        MessageStore, Note, RoomKind, SqliteStore, Tenant, User, EXTERNAL_KIND_NOTE_MESSAGE,
        EXTERNAL_KIND_ROOM, EXTERNAL_KIND_USER,
    };

    use super::Reconciler;

    fn tenant() -> Tenant {
        Tenant::new(1, "Test Site", "mail.test.tld")
    }

    fn store_with_group() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add_user(&User {
                id: 7,
                username: "alice".into(),
                email: "alice@test.tld".into(),
                full_name: "Alice A".into(),
                avatar_url: None,
                is_active: true,
            })
            .unwrap();
        store
            .add_group(&Group {
                id: 3,
                slug: "team".into(),
                name: "The Team".into(),
            })
            .unwrap();
        store
            .upsert_membership(&Membership {
                group_id: 3,
                user_id: 7,
                status: MembershipStatus::Member,
                is_moderator: false,
            })
            .unwrap();
        store
    }

    #[test]
    fn ensure_user_adopts_existing_remote_account() {
        let api = MockChatApi::new().with_user("alice");
        let store = store_with_group();
        let reconciler = Reconciler::new(&api, &store, &store);

        let user = crate::Directory::user_by_id(&store, 7).unwrap().unwrap();
        let external = reconciler.ensure_user(&tenant(), &user).unwrap().unwrap();
        assert_eq!(external, "chatuser-1");
        assert!(!api.recorded().iter().any(|c| c.starts_with("users.create")));

        // second call is served from the mapping, no remote lookup
        let calls_before = api.recorded().len();
        reconciler.ensure_user(&tenant(), &user).unwrap();
        assert_eq!(api.recorded().len(), calls_before);
    }

    #[test]
    fn ensure_room_adopts_duplicate_name() {
        let api = MockChatApi::new().with_room("general-team", false);
        let store = store_with_group();
        let reconciler = Reconciler::new(&api, &store, &store);
        let group = crate::Directory::group_by_id(&store, 3).unwrap().unwrap();

        let room_id = reconciler
            .ensure_room(&tenant(), &group, RoomKind::General)
            .unwrap()
            .unwrap();
        assert_eq!(room_id, "room-1");
        // exactly one room with that name, no duplicate created
        assert_eq!(
            api.room_names()
                .iter()
                .filter(|name| *name == "general-team")
                .count(),
            1
        );
    }

    #[test]
    fn ensure_room_renames_archived_collision_and_retries() {
        let api = MockChatApi::new().with_room("general-team", true);
        let store = store_with_group();
        let reconciler = Reconciler::new(&api, &store, &store);
        let group = crate::Directory::group_by_id(&store, 3).unwrap().unwrap();

        let room_id = reconciler
            .ensure_room(&tenant(), &group, RoomKind::General)
            .unwrap()
            .unwrap();

        // the new room got a fresh id, the stale one was moved aside
        // and stays archived
        assert_eq!(room_id, "room-2");
        let rooms = api.rooms.borrow();
        let stale = rooms.iter().find(|room| room.id == "room-1").unwrap();
        assert!(stale.archived);
        assert!(stale.name.starts_with("general-team-archived-"));
        let fresh = rooms.iter().find(|room| room.id == "room-2").unwrap();
        assert_eq!(fresh.name, "general-team");
        assert!(!fresh.archived);
    }

    #[test]
    fn ensure_room_leaves_group_unmapped_on_generic_error() {
        let api = MockChatApi::new();
        *api.fail_next_create.borrow_mut() = Some("error-not-allowed".into());
        let store = store_with_group();
        let reconciler = Reconciler::new(&api, &store, &store);
        let group = crate::Directory::group_by_id(&store, 3).unwrap().unwrap();

        let room_id = reconciler
            .ensure_room(&tenant(), &group, RoomKind::General)
            .unwrap();
        assert!(room_id.is_none());
        assert!(store
            .external_id(EXTERNAL_KIND_ROOM, "3:general")
            .unwrap()
            .is_none());

        // the next sweep retries and succeeds
        let room_id = reconciler
            .ensure_room(&tenant(), &group, RoomKind::General)
            .unwrap();
        assert!(room_id.is_some());
    }

    #[test]
    fn membership_transitions() {
        let api = MockChatApi::new();
        let store = store_with_group();
        let reconciler = Reconciler::new(&api, &store, &store);
        let t = tenant();

        let member = Membership {
            group_id: 3,
            user_id: 7,
            status: MembershipStatus::Member,
            is_moderator: false,
        };
        let pending = Membership {
            status: MembershipStatus::Pending,
            ..member.clone()
        };
        let moderator = Membership {
            is_moderator: true,
            ..member.clone()
        };

        // brand-new non-pending membership invites into both rooms
        reconciler
            .apply_membership_change(&t, None, Some(&member))
            .unwrap();
        let invites = api
            .recorded()
            .iter()
            .filter(|c| c.starts_with("groups.invite"))
            .count();
        assert_eq!(invites, 2);

        // entering a pending state kicks
        reconciler
            .apply_membership_change(&t, Some(&member), Some(&pending))
            .unwrap();
        assert!(api.recorded().iter().any(|c| c.starts_with("groups.kick")));

        // leaving the pending state invites again
        api.calls.borrow_mut().clear();
        reconciler
            .apply_membership_change(&t, Some(&pending), Some(&member))
            .unwrap();
        assert!(api.recorded().iter().any(|c| c.starts_with("groups.invite")));
        assert!(!api.recorded().iter().any(|c| c.starts_with("groups.kick")));

        // moderator flag delta promotes, then demotes
        api.calls.borrow_mut().clear();
        reconciler
            .apply_membership_change(&t, Some(&member), Some(&moderator))
            .unwrap();
        assert!(api
            .recorded()
            .iter()
            .any(|c| c.starts_with("groups.addModerator")));

        api.calls.borrow_mut().clear();
        reconciler
            .apply_membership_change(&t, Some(&moderator), Some(&member))
            .unwrap();
        assert!(api
            .recorded()
            .iter()
            .any(|c| c.starts_with("groups.removeModerator")));

        // deletion kicks
        api.calls.borrow_mut().clear();
        reconciler
            .apply_membership_change(&t, Some(&member), None)
            .unwrap();
        assert!(api.recorded().iter().any(|c| c.starts_with("groups.kick")));
    }

    #[test]
    fn notes_are_posted_then_updated_then_deleted() {
        let api = MockChatApi::new();
        let store = store_with_group();
        let reconciler = Reconciler::new(&api, &store, &store);
        let t = tenant();

        let note = Note {
            id: 11,
            group_id: 3,
            creator_id: 7,
            text: "hello".into(),
        };

        reconciler.post_or_update_note(&t, &note).unwrap();
        let message_id = store
            .external_id(EXTERNAL_KIND_NOTE_MESSAGE, "11")
            .unwrap()
            .unwrap();

        reconciler.post_or_update_note(&t, &note).unwrap();
        assert!(api
            .recorded()
            .iter()
            .any(|c| c.starts_with(&format!("chat.update:room-1:{}", message_id))));

        reconciler.delete_note(&t, 11, 3).unwrap();
        assert!(store
            .external_id(EXTERNAL_KIND_NOTE_MESSAGE, "11")
            .unwrap()
            .is_none());
    }

    #[test]
    fn sync_direct_messages_replays_into_im_rooms() {
        let api = MockChatApi::new();
        let store = store_with_group();
        store
            .add_message(&crate::Message {
                sender_id: 7,
                recipient_id: Some(8),
                subject: "Hello".into(),
                body: "first".into(),
                sent_at: chrono::Utc::now(),
                moderation_status: crate::ModerationStatus::Accepted,
                ..crate::Message::default()
            })
            .unwrap();
        let reconciler = Reconciler::new(&api, &store, &store);

        reconciler
            .sync_direct_messages(&tenant(), &store)
            .unwrap();
        assert!(api.recorded().iter().any(|c| c == "im.create:alice"));
        assert!(api
            .recorded()
            .iter()
            .any(|c| c.starts_with("chat.postMessage:im-alice")));
    }

    #[test]
    fn sync_users_maps_known_remote_accounts() {
        let api = MockChatApi::new().with_user("alice");
        let store = store_with_group();
        let reconciler = Reconciler::new(&api, &store, &store);

        reconciler.sync_users(&tenant()).unwrap();
        assert_eq!(
            store.external_id(EXTERNAL_KIND_USER, "7").unwrap().as_deref(),
            Some("chatuser-1")
        );
        // drift: remote record carries a different name, so an update
        // was issued
        assert!(api.recorded().iter().any(|c| c.starts_with("users.update")));
    }
}
