//! Direct-reply ingestion.
//!
//! One pass over the pending inbox items: every item is either turned
//! into an in-app reply, discarded (with a best-effort notice to its
//! sender), or retained for another tenant. Items are processed oldest
//! first by arrival timestamp.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::result;
use thiserror::Error;

use crate::{
    store, strip_quoted_reply, token, BridgeConfig, Directory, FailureNotifier, InboxItem,
    InboxStore, MessageStore, ReplyPatterns, Tenant,
};

/// Reason strings surfaced to end users, one per failure cause.
pub const REASON_NO_MATCH: &str = "Your reply could not be matched to an existing message.";
pub const REASON_INTERNAL_ERROR: &str = "An internal error occurred.";
pub const REASON_WRONG_ADDRESS: &str = "The email address you sent the reply from is not the one \
    associated with your user account. Please send direct replies only from the email address \
    you are registered with on the site!";
pub const REASON_INVALID_TEXT: &str = "There was an error when processing your message text!";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    TokenError(#[from] token::Error),
    #[error(transparent)]
    StoreError(#[from] store::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// What a single ingestion pass did.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct IngestSummary {
    /// Items successfully replayed as in-app replies.
    pub replied: usize,
    /// Items discarded, with or without a notice.
    pub discarded: usize,
    /// Items left untouched for another tenant.
    pub retained: usize,
}

enum ItemOutcome {
    Replied,
    Discarded,
    Retained,
}

pub struct DirectReplyProcessor<'a> {
    messages: &'a dyn MessageStore,
    inbox: &'a dyn InboxStore,
    directory: &'a dyn Directory,
    notifier: &'a dyn FailureNotifier,
    patterns: ReplyPatterns,
    keep_inbox: bool,
}

impl<'a> DirectReplyProcessor<'a> {
    pub fn new(
        messages: &'a dyn MessageStore,
        inbox: &'a dyn InboxStore,
        directory: &'a dyn Directory,
        notifier: &'a dyn FailureNotifier,
        config: &BridgeConfig,
    ) -> Result<Self> {
        Ok(Self {
            messages,
            inbox,
            directory,
            notifier,
            patterns: ReplyPatterns::new()?,
            keep_inbox: config.keep_inbox,
        })
    }

    /// Processes all pending inbox items for the given tenant.
    ///
    /// Every item is consumed exactly once: either it becomes a reply,
    /// or it is discarded with a cause-specific notice to its sender.
    /// Only items addressed to a different tenant survive the pass.
    pub fn process(&self, tenant: &Tenant) -> Result<IngestSummary> {
        let items = self.inbox.inbox_items()?;
        let mut summary = IngestSummary::default();
        let mut to_delete = vec![];

        for item in items {
            match self.process_item(tenant, &item)? {
                ItemOutcome::Replied => {
                    summary.replied += 1;
                    to_delete.push(item.id);
                }
                ItemOutcome::Discarded => {
                    summary.discarded += 1;
                    to_delete.push(item.id);
                }
                ItemOutcome::Retained => summary.retained += 1,
            }
        }

        if self.keep_inbox {
            debug!(
                "keep-inbox is set, retaining {} processed items",
                to_delete.len()
            );
        } else {
            self.inbox.delete_inbox_items(&to_delete)?;
        }

        Ok(summary)
    }

    fn process_item(&self, tenant: &Tenant, item: &InboxItem) -> Result<ItemOutcome> {
        // Without a parsable sender there is nobody to notify: the
        // item is malformed and silently dropped.
        let sender_email = match self.patterns.find_sender_email(&item.from_header) {
            Some(email) => email,
            None => {
                info!(
                    "inbound item {} has no parsable sender address, discarding",
                    item.id
                );
                return Ok(ItemOutcome::Discarded);
            }
        };

        let text = strip_quoted_reply(&item.text);

        // The correlation address is searched in the raw body: clients
        // tend to move it into the quoted part.
        let address = match self.patterns.find_reply_address(&item.text) {
            Some(address) => address,
            None => {
                info!(
                    "inbound item {} carries no correlation address, discarding",
                    item.id
                );
                self.notifier
                    .direct_reply_failed(tenant, &sender_email, &text, REASON_NO_MATCH);
                return Ok(ItemOutcome::Discarded);
            }
        };

        if address.tenant_id != tenant.id {
            debug!(
                "inbound item {} addresses tenant {}, retaining",
                item.id, address.tenant_id
            );
            return Ok(ItemOutcome::Retained);
        }

        let original = match self.messages.message_by_reply_token(&address.token) {
            Ok(Some(original)) => original,
            Ok(None) => {
                info!(
                    "no message matches the correlation token of inbound item {}, discarding",
                    item.id
                );
                self.notifier
                    .direct_reply_failed(tenant, &sender_email, &text, REASON_NO_MATCH);
                return Ok(ItemOutcome::Discarded);
            }
            Err(store::Error::DuplicateReplyTokenError(matched_token)) => {
                error!(
                    "more than one message shares the correlation token {}",
                    matched_token
                );
                self.notifier.direct_reply_failed(
                    tenant,
                    &sender_email,
                    &text,
                    REASON_INTERNAL_ERROR,
                );
                return Ok(ItemOutcome::Discarded);
            }
            Err(err) => return Err(err.into()),
        };

        // The reply must come from the account the original message
        // was addressed to; anything else is most likely a user
        // replying from the wrong mailbox.
        let replier = self.directory.active_user_by_email(&sender_email)?;
        let replier = match (replier, original.recipient_id) {
            (Some(replier), Some(recipient_id)) if replier.id == recipient_id => replier,
            _ => {
                self.notifier.direct_reply_failed(
                    tenant,
                    &sender_email,
                    &text,
                    REASON_WRONG_ADDRESS,
                );
                return Ok(ItemOutcome::Discarded);
            }
        };

        if text.trim().is_empty() {
            self.notifier
                .direct_reply_failed(tenant, &sender_email, &text, REASON_INVALID_TEXT);
            return Ok(ItemOutcome::Discarded);
        }

        match original.build_reply(&replier, &text, Utc::now()) {
            Ok(reply) => {
                self.messages.add_message(&reply)?;
                info!("direct reply of inbound item {} processed", item.id);
                Ok(ItemOutcome::Replied)
            }
            Err(err) => {
                warn!(
                    "cannot build direct reply from inbound item {}: {}",
                    item.id, err
                );
                self.notifier
                    .direct_reply_failed(tenant, &sender_email, &text, REASON_INVALID_TEXT);
                Ok(ItemOutcome::Discarded)
            }
        }
    }
}

/// Collaborator downloading new mail from one mailbox account.
pub trait MailSource {
    fn name(&self) -> &str;
    fn fetch_new(&mut self) -> result::Result<Vec<InboxItem>, Box<dyn std::error::Error>>;
}

/// Pulls new mail from every mailbox into the inbox store, logging
/// each received item. Runs before the ingestion pass.
pub fn fetch_mailboxes(
    sources: &mut [Box<dyn MailSource>],
    inbox: &dyn InboxStore,
) -> Result<usize> {
    let mut fetched = 0;

    for source in sources {
        info!("gathering messages for {}", source.name());
        match source.fetch_new() {
            Ok(items) => {
                for item in items {
                    info!("received {} (from {})", item.subject, item.from_header);
                    inbox.add_inbox_item(&item)?;
                    fetched += 1;
                }
            }
            Err(err) => {
                warn!("cannot fetch mail from {}: {}", source.name(), err);
            }
        }
    }

    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::{InboxItem, InboxStore, SqliteStore};

    use super::{fetch_mailboxes, MailSource};

    struct StaticSource {
        items: Vec<InboxItem>,
    }

    impl MailSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        fn fetch_new(&mut self) -> Result<Vec<InboxItem>, Box<dyn std::error::Error>> {
            Ok(std::mem::take(&mut self.items))
        }
    }

    struct BrokenSource;

    impl MailSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn fetch_new(&mut self) -> Result<Vec<InboxItem>, Box<dyn std::error::Error>> {
            Err("connection refused".into())
        }
    }

    #[test]
    fn fetches_into_the_inbox_and_skips_broken_sources() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sources: Vec<Box<dyn MailSource>> = vec![
            Box::new(BrokenSource),
            Box::new(StaticSource {
                items: vec![InboxItem {
                    id: 0,
                    from_header: "alice@example.org".into(),
                    subject: "Re: Hello".into(),
                    text: "hi".into(),
                    received_at: Utc::now(),
                }],
            }),
        ];

        let fetched = fetch_mailboxes(&mut sources, &store).unwrap();
        assert_eq!(fetched, 1);
        assert_eq!(store.inbox_items().unwrap().len(), 1);
    }
}
