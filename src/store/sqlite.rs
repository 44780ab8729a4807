//! SQLite store module.
//!
//! Reference implementation of every store seam on top of a single
//! SQLite database. The schema is created on open. Seeding helpers for
//! users, groups, memberships, notes, participants and attachments are
//! plain inherent methods; the trait implementations below are what the
//! bridge itself consumes.

use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::{
    Attachment, ChangeEvent, Directory, ExternalIdStore, Group, InboxItem, InboxStore, Membership,
    MembershipStatus, Message, MessageStore, ModerationStatus, Note, OutboxQueue, User,
};

use super::{Error, Result};

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id         INTEGER PRIMARY KEY,
        username   TEXT NOT NULL UNIQUE,
        email      TEXT NOT NULL,
        full_name  TEXT NOT NULL,
        avatar_url TEXT,
        is_active  INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE IF NOT EXISTS groups (
        id   INTEGER PRIMARY KEY,
        slug TEXT NOT NULL,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS memberships (
        group_id     INTEGER NOT NULL,
        user_id      INTEGER NOT NULL,
        status       TEXT NOT NULL,
        is_moderator INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (group_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS notes (
        id         INTEGER PRIMARY KEY,
        group_id   INTEGER NOT NULL,
        creator_id INTEGER NOT NULL,
        text       TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id             INTEGER NOT NULL,
        recipient_id          INTEGER,
        subject               TEXT NOT NULL,
        body                  TEXT NOT NULL,
        sent_at               DATETIME NOT NULL,
        thread_id             INTEGER,
        parent_id             INTEGER,
        moderation_status     TEXT NOT NULL,
        sender_deleted_at     DATETIME,
        recipient_deleted_at  DATETIME,
        multi_conversation_id INTEGER,
        master_for_sender     INTEGER NOT NULL DEFAULT 0,
        reply_token           TEXT
    );
    CREATE TABLE IF NOT EXISTS conversation_participants (
        conversation_id INTEGER NOT NULL,
        user_id         INTEGER NOT NULL,
        PRIMARY KEY (conversation_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS attachments (
        message_id   INTEGER NOT NULL,
        download_url TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS inbox (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        from_header TEXT NOT NULL,
        subject     TEXT NOT NULL,
        text        TEXT NOT NULL,
        received_at DATETIME NOT NULL
    );
    CREATE TABLE IF NOT EXISTS external_ids (
        kind        TEXT NOT NULL,
        key         TEXT NOT NULL,
        external_id TEXT NOT NULL,
        PRIMARY KEY (kind, key)
    );
    CREATE TABLE IF NOT EXISTS outbox (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at DATETIME NOT NULL,
        payload    TEXT NOT NULL
    );
";

const SELECT_MESSAGE: &str = "
    SELECT id, sender_id, recipient_id, subject, body, sent_at, thread_id, parent_id,
           moderation_status, sender_deleted_at, recipient_deleted_at,
           multi_conversation_id, master_for_sender, reply_token
    FROM messages
";

const CHANNEL_ROOT_FILTER: &str = "
    WHERE moderation_status = 'accepted'
    AND parent_id IS NULL
    AND NOT (sender_deleted_at IS NOT NULL AND recipient_deleted_at IS NOT NULL)
    AND (thread_id IS NULL OR thread_id = id)
    AND (multi_conversation_id IS NULL OR master_for_sender = 1)
";

pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref())?;
        db.execute_batch(CREATE_TABLES)?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(CREATE_TABLES)?;
        Ok(Self { db })
    }

    pub fn add_user(&self, user: &User) -> Result<()> {
        self.db.execute(
            "INSERT INTO users (id, username, email, full_name, avatar_url, is_active)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                user.id,
                user.username,
                user.email,
                user.full_name,
                user.avatar_url,
                user.is_active,
            ],
        )?;
        Ok(())
    }

    pub fn add_group(&self, group: &Group) -> Result<()> {
        self.db.execute(
            "INSERT INTO groups (id, slug, name) VALUES (?, ?, ?)",
            params![group.id, group.slug, group.name],
        )?;
        Ok(())
    }

    pub fn upsert_membership(&self, membership: &Membership) -> Result<()> {
        self.db.execute(
            "INSERT INTO memberships (group_id, user_id, status, is_moderator)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (group_id, user_id)
             DO UPDATE SET status = excluded.status, is_moderator = excluded.is_moderator",
            params![
                membership.group_id,
                membership.user_id,
                membership.status.as_key(),
                membership.is_moderator,
            ],
        )?;
        Ok(())
    }

    pub fn add_note(&self, note: &Note) -> Result<()> {
        self.db.execute(
            "INSERT INTO notes (id, group_id, creator_id, text) VALUES (?, ?, ?, ?)",
            params![note.id, note.group_id, note.creator_id, note.text],
        )?;
        Ok(())
    }

    pub fn add_conversation_participant(&self, conversation_id: i64, user_id: i64) -> Result<()> {
        self.db.execute(
            "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id)
             VALUES (?, ?)",
            params![conversation_id, user_id],
        )?;
        Ok(())
    }

    pub fn add_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.db.execute(
            "INSERT INTO attachments (message_id, download_url) VALUES (?, ?)",
            params![attachment.message_id, attachment.download_url],
        )?;
        Ok(())
    }

    fn map_message(row: &Row) -> rusqlite::Result<Message> {
        Ok(Message {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            recipient_id: row.get(2)?,
            subject: row.get(3)?,
            body: row.get(4)?,
            sent_at: parse_datetime(&row.get::<usize, String>(5)?),
            thread_id: row.get(6)?,
            parent_id: row.get(7)?,
            moderation_status: ModerationStatus::from_key(&row.get::<usize, String>(8)?),
            sender_deleted_at: row
                .get::<usize, Option<String>>(9)?
                .map(|date| parse_datetime(&date)),
            recipient_deleted_at: row
                .get::<usize, Option<String>>(10)?
                .map(|date| parse_datetime(&date)),
            multi_conversation_id: row.get(11)?,
            master_for_sender: row.get(12)?,
            reply_token: row.get(13)?,
        })
    }

    fn map_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            full_name: row.get(3)?,
            avatar_url: row.get(4)?,
            is_active: row.get(5)?,
        })
    }
}

fn parse_datetime(date: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(date) {
        Ok(date) => date.with_timezone(&Utc),
        Err(err) => {
            warn!("invalid date {}, falling back to epoch: {}", date, err);
            DateTime::<Utc>::default()
        }
    }
}

fn id_placeholders(ids: &[i64]) -> String {
    vec!["?"; ids.len()].join(", ")
}

impl Directory for SqliteStore {
    fn active_users(&self, restrict: Option<&[i64]>) -> Result<Vec<User>> {
        let users = match restrict {
            None => {
                let mut stmt = self.db.prepare(
                    "SELECT id, username, email, full_name, avatar_url, is_active
                     FROM users WHERE is_active = 1 ORDER BY id",
                )?;
                let users = stmt
                    .query_map([], Self::map_user)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                users
            }
            Some(ids) => {
                let sql = format!(
                    "SELECT id, username, email, full_name, avatar_url, is_active
                     FROM users WHERE is_active = 1 AND id IN ({}) ORDER BY id",
                    id_placeholders(ids)
                );
                let mut stmt = self.db.prepare(&sql)?;
                let users = stmt
                    .query_map(params_from_iter(ids.iter()), Self::map_user)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                users
            }
        };
        Ok(users)
    }

    fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self
            .db
            .query_row(
                "SELECT id, username, email, full_name, avatar_url, is_active
                 FROM users WHERE id = ?",
                [id],
                Self::map_user,
            )
            .optional()?)
    }

    fn active_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .db
            .query_row(
                "SELECT id, username, email, full_name, avatar_url, is_active
                 FROM users WHERE is_active = 1 AND email = ? COLLATE NOCASE",
                [email],
                Self::map_user,
            )
            .optional()?)
    }

    fn groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, slug, name FROM groups ORDER BY id")?;
        let groups = stmt
            .query_map([], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    fn group_by_id(&self, id: i64) -> Result<Option<Group>> {
        Ok(self
            .db
            .query_row("SELECT id, slug, name FROM groups WHERE id = ?", [id], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    name: row.get(2)?,
                })
            })
            .optional()?)
    }

    fn group_memberships(&self, group_id: i64) -> Result<Vec<Membership>> {
        let mut stmt = self.db.prepare(
            "SELECT group_id, user_id, status, is_moderator
             FROM memberships WHERE group_id = ? ORDER BY user_id",
        )?;
        let memberships = stmt
            .query_map([group_id], |row| {
                Ok(Membership {
                    group_id: row.get(0)?,
                    user_id: row.get(1)?,
                    status: MembershipStatus::from_key(&row.get::<usize, String>(2)?),
                    is_moderator: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(memberships)
    }

    fn note_by_id(&self, id: i64) -> Result<Option<Note>> {
        Ok(self
            .db
            .query_row(
                "SELECT id, group_id, creator_id, text FROM notes WHERE id = ?",
                [id],
                |row| {
                    Ok(Note {
                        id: row.get(0)?,
                        group_id: row.get(1)?,
                        creator_id: row.get(2)?,
                        text: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn conversation_participants(&self, conversation_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.db.prepare(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ? ORDER BY user_id",
        )?;
        let participants = stmt
            .query_map([conversation_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(participants)
    }
}

impl MessageStore for SqliteStore {
    fn add_message(&self, message: &Message) -> Result<Message> {
        self.db.execute(
            "INSERT INTO messages (sender_id, recipient_id, subject, body, sent_at, thread_id,
                                   parent_id, moderation_status, sender_deleted_at,
                                   recipient_deleted_at, multi_conversation_id,
                                   master_for_sender, reply_token)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                message.sender_id,
                message.recipient_id,
                message.subject,
                message.body,
                message.sent_at.to_rfc3339(),
                message.thread_id,
                message.parent_id,
                message.moderation_status.as_key(),
                message.sender_deleted_at.map(|date| date.to_rfc3339()),
                message.recipient_deleted_at.map(|date| date.to_rfc3339()),
                message.multi_conversation_id,
                message.master_for_sender,
                message.reply_token,
            ],
        )?;

        let mut message = message.clone();
        message.id = self.db.last_insert_rowid();
        Ok(message)
    }

    fn message_by_id(&self, id: i64) -> Result<Option<Message>> {
        let sql = format!("{} WHERE id = ?", SELECT_MESSAGE);
        Ok(self
            .db
            .query_row(&sql, [id], Self::map_message)
            .optional()?)
    }

    fn message_by_reply_token(&self, token: &str) -> Result<Option<Message>> {
        let sql = format!("{} WHERE reply_token = ?", SELECT_MESSAGE);
        let mut stmt = self.db.prepare(&sql)?;
        let mut messages = stmt
            .query_map([token], Self::map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match messages.len() {
            0 => Ok(None),
            1 => Ok(Some(messages.remove(0))),
            _ => Err(Error::DuplicateReplyTokenError(token.to_owned())),
        }
    }

    fn direct_messages(&self) -> Result<Vec<Message>> {
        let sql = format!(
            "{} WHERE moderation_status = 'accepted'
             AND NOT (sender_deleted_at IS NOT NULL AND recipient_deleted_at IS NOT NULL)
             AND multi_conversation_id IS NULL
             AND recipient_id IS NOT NULL
             ORDER BY sent_at",
            SELECT_MESSAGE
        );
        let mut stmt = self.db.prepare(&sql)?;
        let messages = stmt
            .query_map([], Self::map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn channel_roots(&self, user_ids: &[i64]) -> Result<Vec<Message>> {
        let sql = format!(
            "{} {} AND sender_id IN ({}) ORDER BY id",
            SELECT_MESSAGE,
            CHANNEL_ROOT_FILTER,
            id_placeholders(user_ids)
        );
        let mut stmt = self.db.prepare(&sql)?;
        let messages = stmt
            .query_map(params_from_iter(user_ids.iter()), Self::map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn channel_messages(&self, channel_id: i64, user_ids: &[i64]) -> Result<Vec<Message>> {
        let sql = format!(
            "{} WHERE moderation_status = 'accepted'
             AND NOT (sender_deleted_at IS NOT NULL AND recipient_deleted_at IS NOT NULL)
             AND sender_id IN ({})
             AND (id = ? OR thread_id = ?)
             ORDER BY sent_at",
            SELECT_MESSAGE,
            id_placeholders(user_ids)
        );
        let mut stmt = self.db.prepare(&sql)?;
        let params = user_ids
            .iter()
            .copied()
            .chain([channel_id, channel_id])
            .collect::<Vec<_>>();
        let messages = stmt
            .query_map(params_from_iter(params.iter()), Self::map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn attachments(&self, message_id: i64) -> Result<Vec<Attachment>> {
        let mut stmt = self.db.prepare(
            "SELECT message_id, download_url FROM attachments WHERE message_id = ? ORDER BY rowid",
        )?;
        let attachments = stmt
            .query_map([message_id], |row| {
                Ok(Attachment {
                    message_id: row.get(0)?,
                    download_url: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attachments)
    }
}

impl InboxStore for SqliteStore {
    fn add_inbox_item(&self, item: &InboxItem) -> Result<InboxItem> {
        self.db.execute(
            "INSERT INTO inbox (from_header, subject, text, received_at) VALUES (?, ?, ?, ?)",
            params![
                item.from_header,
                item.subject,
                item.text,
                item.received_at.to_rfc3339(),
            ],
        )?;

        let mut item = item.clone();
        item.id = self.db.last_insert_rowid();
        Ok(item)
    }

    fn inbox_items(&self) -> Result<Vec<InboxItem>> {
        let mut stmt = self.db.prepare(
            "SELECT id, from_header, subject, text, received_at
             FROM inbox ORDER BY received_at, id",
        )?;
        let items = stmt
            .query_map([], |row| {
                Ok(InboxItem {
                    id: row.get(0)?,
                    from_header: row.get(1)?,
                    subject: row.get(2)?,
                    text: row.get(3)?,
                    received_at: parse_datetime(&row.get::<usize, String>(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn delete_inbox_items(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!("DELETE FROM inbox WHERE id IN ({})", id_placeholders(ids));
        self.db.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }
}

impl ExternalIdStore for SqliteStore {
    fn external_id(&self, kind: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .query_row(
                "SELECT external_id FROM external_ids WHERE kind = ? AND key = ?",
                [kind, key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_external_id(&self, kind: &str, key: &str, external_id: &str) -> Result<()> {
        self.db.execute(
            "INSERT INTO external_ids (kind, key, external_id) VALUES (?, ?, ?)
             ON CONFLICT (kind, key) DO UPDATE SET external_id = excluded.external_id",
            [kind, key, external_id],
        )?;
        Ok(())
    }

    fn remove_external_id(&self, kind: &str, key: &str) -> Result<()> {
        self.db.execute(
            "DELETE FROM external_ids WHERE kind = ? AND key = ?",
            [kind, key],
        )?;
        Ok(())
    }
}

impl OutboxQueue for SqliteStore {
    fn enqueue(&self, event: &ChangeEvent) -> Result<i64> {
        let payload = serde_json::to_string(event).map_err(Error::SerializeEventError)?;
        self.db.execute(
            "INSERT INTO outbox (created_at, payload) VALUES (?, ?)",
            params![Utc::now().to_rfc3339(), payload],
        )?;
        Ok(self.db.last_insert_rowid())
    }

    fn drain(&self, limit: usize) -> Result<Vec<ChangeEvent>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, payload FROM outbox ORDER BY id LIMIT ?")?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get::<usize, i64>(0)?, row.get::<usize, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            events.push(
                serde_json::from_str(&payload)
                    .map_err(|err| Error::DeserializeEventError(err, id))?,
            );
            self.db.execute("DELETE FROM outbox WHERE id = ?", [id])?;
        }
        Ok(events)
    }

    fn pending_events(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
