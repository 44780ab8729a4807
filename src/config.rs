//! Config module.
//!
//! This module contains the representation of the bridge configuration:
//! the external chat service endpoint, the SMTP relay used for failure
//! notices, and a couple of behaviour toggles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SESSION_EXPIRY_SECS: u64 = 600;
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Connection parameters for the external chat service REST API.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL of the chat service, without a trailing slash.
    pub base_url: String,
    /// Admin username used for the service-level login.
    pub user: String,
    /// Admin password used for the service-level login.
    pub password: String,
    /// Per-call timeout in seconds. Expiry is reported as an ordinary
    /// transport failure and handled by the log-and-continue policy.
    pub timeout_secs: Option<u64>,
    /// Expiry of cached per-user sessions in seconds.
    pub session_expiry_secs: Option<u64>,
}

impl ChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_CHAT_TIMEOUT_SECS))
    }

    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(
            self.session_expiry_secs
                .unwrap_or(DEFAULT_SESSION_EXPIRY_SECS),
        )
    }
}

/// SMTP relay parameters for outbound failure notices.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub password: Option<String>,
    /// Sender address for failure notices.
    pub from: String,
}

impl SmtpConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SMTP_PORT)
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub chat: ChatConfig,
    pub smtp: SmtpConfig,
    /// When set, processed inbox items are kept instead of deleted,
    /// which eases manual inspection during local development.
    pub keep_inbox: bool,
}
