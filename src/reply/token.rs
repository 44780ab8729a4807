//! Correlation tokens.
//!
//! An outbound notification email carries a reply-to address of the
//! shape `directreply+<tenant-id>+<token>@<domain>`, correlating any
//! inbound reply back to the original message without exposing
//! internal ids.

use regex::Regex;
use std::result;
use thiserror::Error;

use crate::Tenant;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot compile reply pattern")]
    CompilePatternError(#[source] regex::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// A parsed correlation address.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReplyAddress {
    pub tenant_id: u32,
    /// Lowercased correlation token.
    pub token: String,
}

/// Compiled patterns for the correlation address and for extracting a
/// sender address from a raw From header.
pub struct ReplyPatterns {
    reply_address: Regex,
    email_address: Regex,
}

impl ReplyPatterns {
    pub fn new() -> Result<Self> {
        let reply_address = Regex::new(r"(?i)directreply\+([0-9]+)\+([a-zA-Z0-9]+)@")
            .map_err(Error::CompilePatternError)?;
        // Permissive RFC 5322 inspired address pattern: dot-atom or
        // quoted-string local part, dotted domain.
        let email_address = Regex::new(
            r#"(?i)([-!#$%&'*+/=?^_`{}|~0-9A-Z]+(\.[-!#$%&'*+/=?^_`{}|~0-9A-Z]+)*|"([\x01-\x08\x0B\x0C\x0E-\x1F!#-\[\]-\x7F]|\\[\x01-\x09\x0B\x0C\x0E-\x7F])*")@(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?"#,
        )
        .map_err(Error::CompilePatternError)?;

        Ok(Self {
            reply_address,
            email_address,
        })
    }

    /// Searches a message body for an embedded correlation address.
    pub fn find_reply_address(&self, text: &str) -> Option<ReplyAddress> {
        let captures = self.reply_address.captures(text)?;
        let tenant_id = captures.get(1)?.as_str().parse().ok()?;
        let token = captures.get(2)?.as_str().to_lowercase();
        Some(ReplyAddress { tenant_id, token })
    }

    /// Extracts the bare sender address from a raw From header.
    pub fn find_sender_email(&self, from_header: &str) -> Option<String> {
        self.email_address
            .find(from_header)
            .map(|m| m.as_str().to_owned())
    }
}

/// Composes the correlation reply-to address for an outbound email.
pub fn compose_reply_address(tenant: &Tenant, token: &str) -> String {
    format!(
        "directreply+{}+{}@{}",
        tenant.id, token, tenant.mail_domain
    )
}

#[cfg(test)]
mod tests {
    use crate::Tenant;

    use super::ReplyPatterns;

    #[test]
    fn finds_reply_address_in_body() {
        let patterns = ReplyPatterns::new().unwrap();
        let body = "please answer to\ndirectreply+3+A1b2C3@mail.site.tld\nthanks";

        let address = patterns.find_reply_address(body).unwrap();
        assert_eq!(address.tenant_id, 3);
        assert_eq!(address.token, "a1b2c3");
    }

    #[test]
    fn reply_address_match_is_case_insensitive() {
        let patterns = ReplyPatterns::new().unwrap();
        let address = patterns
            .find_reply_address("DirectReply+12+deadbeef@x.tld")
            .unwrap();
        assert_eq!(address.tenant_id, 12);
        assert_eq!(address.token, "deadbeef");
    }

    #[test]
    fn missing_or_malformed_address_is_none() {
        let patterns = ReplyPatterns::new().unwrap();
        assert!(patterns.find_reply_address("no token here").is_none());
        assert!(patterns
            .find_reply_address("directreply+notanumber+abc@x.tld")
            .is_none());
    }

    #[test]
    fn extracts_sender_from_from_header() {
        let patterns = ReplyPatterns::new().unwrap();
        assert_eq!(
            patterns.find_sender_email("Alice Example <alice@example.org>"),
            Some("alice@example.org".into())
        );
        assert_eq!(
            patterns.find_sender_email("bob.builder@sub.example.co.uk"),
            Some("bob.builder@sub.example.co.uk".into())
        );
        assert_eq!(patterns.find_sender_email("Undisclosed Recipients"), None);
    }

    #[test]
    fn composed_addresses_round_trip() {
        let patterns = ReplyPatterns::new().unwrap();
        let tenant = Tenant::new(7, "Site", "mail.site.tld");
        let composed = super::compose_reply_address(&tenant, "cafe42");
        assert_eq!(composed, "directreply+7+cafe42@mail.site.tld");

        let parsed = patterns.find_reply_address(&composed).unwrap();
        assert_eq!(parsed.tenant_id, 7);
        assert_eq!(parsed.token, "cafe42");
    }
}
