//! Inbound mailbox items.
//!
//! An inbox item is a transient record of a downloaded email. Items are
//! consumed and deleted once processed; items addressed to a foreign
//! tenant are retained untouched for that tenant's own ingestion pass.

use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use std::result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse raw inbound email")]
    ParseRawEmailError(#[source] mailparse::MailParseError),
    #[error("cannot read inbound email body")]
    ParseBodyError(#[source] mailparse::MailParseError),
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InboxItem {
    pub id: i64,
    /// Raw From header, as received.
    pub from_header: String,
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboxItem {
    /// Builds an inbox item from a raw RFC 822 email, keeping only the
    /// headers and the plain-text body the ingestion pass needs.
    pub fn from_raw_email(raw: &[u8], received_at: DateTime<Utc>) -> Result<Self> {
        let parsed = mailparse::parse_mail(raw).map_err(Error::ParseRawEmailError)?;
        let from_header = parsed.headers.get_first_value("From").unwrap_or_default();
        let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
        let text = plain_text_body(&parsed).map_err(Error::ParseBodyError)?;

        Ok(Self {
            id: 0,
            from_header,
            subject,
            text,
            received_at,
        })
    }
}

fn plain_text_body(mail: &ParsedMail) -> result::Result<String, mailparse::MailParseError> {
    if mail.subparts.is_empty() {
        return if mail.ctype.mimetype.starts_with("text/") {
            mail.get_body()
        } else {
            Ok(String::new())
        };
    }

    for part in &mail.subparts {
        if part.ctype.mimetype == "text/plain" {
            return part.get_body();
        }
    }
    plain_text_body(&mail.subparts[0])
}
