//! Notify module.
//!
//! Outbound failure notices are the only end-user-facing error channel
//! of the ingestion pass. Sending is fire-and-forget: a notice that
//! cannot be delivered is logged and dropped, never retried.

#[cfg(feature = "smtp-notifier")]
use log::warn;
use std::result;
use thiserror::Error;

use crate::Tenant;

#[cfg(feature = "smtp-notifier")]
use lettre::{
    message::Mailbox,
    transport::smtp::{authentication::Credentials, SmtpTransport},
    Transport,
};

#[cfg(feature = "smtp-notifier")]
use crate::SmtpConfig;

pub const NOTICE_SUBJECT: &str = "Your direct reply failed!";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse notice address {1}")]
    ParseAddressError(#[source] lettre::address::AddressError, String),
    #[error("cannot build notice message")]
    BuildNoticeError(#[source] lettre::error::Error),
    #[cfg(feature = "smtp-notifier")]
    #[error("cannot build smtp transport relay")]
    BuildTransportRelayError(#[source] lettre::transport::smtp::Error),
    #[cfg(feature = "smtp-notifier")]
    #[error("cannot send notice")]
    SendNoticeError(#[source] lettre::transport::smtp::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Outbound channel for "your direct reply failed" notices.
pub trait FailureNotifier {
    /// Best effort: implementations log delivery problems and return.
    fn direct_reply_failed(
        &self,
        tenant: &Tenant,
        recipient_email: &str,
        original_text: &str,
        reason: &str,
    );
}

/// SMTP-backed notifier.
#[cfg(feature = "smtp-notifier")]
pub struct SmtpNotifier {
    config: SmtpConfig,
}

#[cfg(feature = "smtp-notifier")]
impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let builder = match (&self.config.login, &self.config.password) {
            (Some(login), Some(password)) => SmtpTransport::relay(&self.config.host)
                .map_err(Error::BuildTransportRelayError)?
                .credentials(Credentials::new(login.clone(), password.clone())),
            _ => SmtpTransport::builder_dangerous(&self.config.host),
        };
        Ok(builder.port(self.config.port()).build())
    }

    fn send(
        &self,
        tenant: &Tenant,
        recipient_email: &str,
        original_text: &str,
        reason: &str,
    ) -> Result<()> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|err| Error::ParseAddressError(err, self.config.from.clone()))?;
        let to: Mailbox = recipient_email
            .parse()
            .map_err(|err| Error::ParseAddressError(err, recipient_email.to_owned()))?;

        let body = format!(
            "Hello,\n\nyour direct reply on {} could not be processed.\n\n{}\n\nYour message was:\n\n{}\n",
            tenant.site_name, reason, original_text
        );
        let notice = lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(NOTICE_SUBJECT)
            .body(body)
            .map_err(Error::BuildNoticeError)?;

        self.transport()?
            .send(&notice)
            .map_err(Error::SendNoticeError)?;
        Ok(())
    }
}

#[cfg(feature = "smtp-notifier")]
impl FailureNotifier for SmtpNotifier {
    fn direct_reply_failed(
        &self,
        tenant: &Tenant,
        recipient_email: &str,
        original_text: &str,
        reason: &str,
    ) {
        warn!(
            "sending direct-reply failure notice to {}: {}",
            recipient_email, reason
        );
        if let Err(err) = self.send(tenant, recipient_email, original_text, reason) {
            warn!(
                "cannot deliver failure notice to {}, dropping it: {}",
                recipient_email, err
            );
        }
    }
}
