//! Outbox worker module.
//!
//! Drains the change-event queue in insertion order and dispatches
//! each event to the reconciler. A failing event is logged and
//! consumed; the next full sweep repairs whatever it left behind.

use log::{debug, warn};
use std::result;
use thiserror::Error;

use crate::{reconcile, store, ChangeEvent, Directory, OutboxQueue, Reconciler, Tenant};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    StoreError(#[from] store::Error),
    #[error(transparent)]
    ReconcileError(#[from] reconcile::Error),
}

pub type Result<T> = result::Result<T, Error>;

pub struct OutboxWorker<'a> {
    queue: &'a dyn OutboxQueue,
    directory: &'a dyn Directory,
    reconciler: &'a Reconciler<'a>,
}

impl<'a> OutboxWorker<'a> {
    pub fn new(
        queue: &'a dyn OutboxQueue,
        directory: &'a dyn Directory,
        reconciler: &'a Reconciler<'a>,
    ) -> Self {
        Self {
            queue,
            directory,
            reconciler,
        }
    }

    /// Drains up to `limit` events and returns how many were
    /// processed.
    pub fn drain(&self, tenant: &Tenant, limit: usize) -> Result<usize> {
        let events = self.queue.drain(limit)?;
        let count = events.len();

        for event in events {
            debug!("processing change event {:?}", event);
            if let Err(err) = self.dispatch(tenant, &event) {
                warn!(
                    "error while processing change event {:?}, skipping it: {}",
                    event, err
                );
            }
        }

        Ok(count)
    }

    fn dispatch(&self, tenant: &Tenant, event: &ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::UserCreated { user_id } => {
                if let Some(user) = self.directory.user_by_id(*user_id)? {
                    self.reconciler.ensure_user(tenant, &user)?;
                }
            }
            ChangeEvent::UserUpdated { user_id } => {
                if let Some(user) = self.directory.user_by_id(*user_id)? {
                    self.reconciler.update_user(tenant, &user)?;
                }
            }
            ChangeEvent::UserDeleted { user_id } => {
                self.reconciler.delete_user(tenant, *user_id)?;
            }
            ChangeEvent::GroupCreated { group_id } => {
                if let Some(group) = self.directory.group_by_id(*group_id)? {
                    self.reconciler.ensure_group_rooms(tenant, &group)?;
                }
            }
            ChangeEvent::GroupRenamed { group_id } => {
                if let Some(group) = self.directory.group_by_id(*group_id)? {
                    self.reconciler.rename_group_rooms(tenant, &group)?;
                }
            }
            ChangeEvent::GroupDeleted { group_id } => {
                self.reconciler.archive_group_rooms(tenant, *group_id)?;
            }
            ChangeEvent::MembershipChanged { before, after } => {
                self.reconciler
                    .apply_membership_change(tenant, before.as_ref(), after.as_ref())?;
            }
            ChangeEvent::NoteSaved { note_id } => {
                if let Some(note) = self.directory.note_by_id(*note_id)? {
                    self.reconciler.post_or_update_note(tenant, &note)?;
                }
            }
            ChangeEvent::NoteDeleted { note_id, group_id } => {
                self.reconciler.delete_note(tenant, *note_id, *group_id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        chat::mock::MockChatApi, ChangeEvent, Group, Membership, MembershipStatus, OutboxQueue,
        Reconciler, SqliteStore, Tenant, User,
    };

    use super::OutboxWorker;

    #[test]
    fn drains_in_insertion_order_and_consumes_events() {
        let api = MockChatApi::new();
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add_user(&User {
                id: 7,
                username: "alice".into(),
                email: "alice@test.tld".into(),
                full_name: "Alice".into(),
                avatar_url: None,
                is_active: true,
            })
            .unwrap();
        store
            .add_group(&Group {
                id: 3,
                slug: "team".into(),
                name: "Team".into(),
            })
            .unwrap();

        store.enqueue(&ChangeEvent::UserCreated { user_id: 7 }).unwrap();
        store.enqueue(&ChangeEvent::GroupCreated { group_id: 3 }).unwrap();
        store
            .enqueue(&ChangeEvent::MembershipChanged {
                before: None,
                after: Some(Membership {
                    group_id: 3,
                    user_id: 7,
                    status: MembershipStatus::Member,
                    is_moderator: false,
                }),
            })
            .unwrap();
        assert_eq!(store.pending_events().unwrap(), 3);

        let reconciler = Reconciler::new(&api, &store, &store);
        let worker = OutboxWorker::new(&store, &store, &reconciler);
        let processed = worker
            .drain(&Tenant::new(1, "Test", "mail.test.tld"), 100)
            .unwrap();

        assert_eq!(processed, 3);
        assert_eq!(store.pending_events().unwrap(), 0);

        // user mirrored before rooms, rooms before the invite
        let calls = api.recorded();
        let create_user = calls
            .iter()
            .position(|c| c.starts_with("users.create"))
            .unwrap();
        let create_room = calls
            .iter()
            .position(|c| c.starts_with("groups.create"))
            .unwrap();
        let invite = calls
            .iter()
            .position(|c| c.starts_with("groups.invite"))
            .unwrap();
        assert!(create_user < create_room);
        assert!(create_room < invite);
    }
}
