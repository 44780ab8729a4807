//! Session cache module.
//!
//! Per-user impersonated connections are expensive to open, so they
//! are cached process-wide, keyed by tenant and username, with a
//! bounded expiry. A cached session is probed before reuse; a failed
//! probe evicts the entry and a fresh session is opened.

use log::debug;
use std::{
    collections::HashMap,
    result,
    sync::Mutex,
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::{
    api::{self, ApiResult, ChatApi, ChatSession},
    Tenant,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot get session cache lock")]
    GetCacheLockError(String),

    #[error(transparent)]
    ApiError(#[from] api::Error),
}

pub type Result<T> = result::Result<T, Error>;

struct CachedSession {
    session: Box<dyn ChatSession + Send>,
    opened_at: Instant,
}

pub struct SessionCache {
    sessions: Mutex<HashMap<(u32, String), CachedSession>>,
    expiry: Duration,
}

impl SessionCache {
    pub fn new(expiry: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    /// Runs `operation` on a live session for the given user, opening
    /// one if the cache has no live entry. The freshly used session is
    /// put back into the cache afterwards.
    pub fn with_session<T>(
        &self,
        api: &dyn ChatApi,
        tenant: &Tenant,
        username: &str,
        operation: impl FnOnce(&dyn ChatSession) -> ApiResult<T>,
    ) -> Result<ApiResult<T>> {
        let key = (tenant.id, username.to_owned());

        let cached = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|err| Error::GetCacheLockError(err.to_string()))?;
            sessions.remove(&key)
        };

        let session = match cached {
            Some(cached) if cached.opened_at.elapsed() < self.expiry && cached.session.probe() => {
                cached.session
            }
            Some(_) => {
                debug!("evicting stale chat session for {}", username);
                api.open_session(username)?
            }
            None => api.open_session(username)?,
        };

        let result = operation(session.as_ref());

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|err| Error::GetCacheLockError(err.to_string()))?;
        sessions.insert(
            key,
            CachedSession {
                session,
                opened_at: Instant::now(),
            },
        );

        Ok(result)
    }

    /// Drops the cached session for the given user, forcing the next
    /// call to open a fresh one (e.g. after a password change).
    pub fn evict(&self, tenant: &Tenant, username: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&(tenant.id, username.to_owned()));
        }
    }

    /// Total unread message count for the given user.
    pub fn unread_total(
        &self,
        api: &dyn ChatApi,
        tenant: &Tenant,
        username: &str,
    ) -> Result<ApiResult<u64>> {
        self.with_session(api, tenant, username, |session| session.unread_total())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{chat::mock::MockChatApi, Tenant};

    use super::SessionCache;

    fn tenant() -> Tenant {
        Tenant::new(1, "Test", "mail.test.tld")
    }

    #[test]
    fn reuses_live_sessions() {
        let api = MockChatApi::new();
        let cache = SessionCache::new(Duration::from_secs(600));

        cache.unread_total(&api, &tenant(), "alice").unwrap();
        cache.unread_total(&api, &tenant(), "alice").unwrap();

        let opens = api
            .recorded()
            .iter()
            .filter(|c| c.starts_with("users.createToken"))
            .count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn expired_sessions_are_reopened() {
        let api = MockChatApi::new();
        let cache = SessionCache::new(Duration::from_secs(0));

        cache.unread_total(&api, &tenant(), "alice").unwrap();
        cache.unread_total(&api, &tenant(), "alice").unwrap();

        let opens = api
            .recorded()
            .iter()
            .filter(|c| c.starts_with("users.createToken"))
            .count();
        assert_eq!(opens, 2);
    }

    #[test]
    fn failed_probe_evicts_and_reopens() {
        let api = MockChatApi::new();
        let cache = SessionCache::new(Duration::from_secs(600));
        let t = tenant();

        cache.unread_total(&api, &t, "alice").unwrap();
        api.kill_sessions();
        cache.unread_total(&api, &t, "alice").unwrap();

        let opens = api
            .recorded()
            .iter()
            .filter(|c| c.starts_with("users.createToken"))
            .count();
        assert_eq!(opens, 2);
    }

    #[test]
    fn eviction_forces_a_fresh_session() {
        let api = MockChatApi::new();
        let cache = SessionCache::new(Duration::from_secs(600));
        let t = tenant();

        cache.unread_total(&api, &t, "alice").unwrap();
        cache.evict(&t, "alice");
        cache.unread_total(&api, &t, "alice").unwrap();

        let opens = api
            .recorded()
            .iter()
            .filter(|c| c.starts_with("users.createToken"))
            .count();
        assert_eq!(opens, 2);
    }

    #[test]
    fn sessions_are_scoped_per_user_and_tenant() {
        let api = MockChatApi::new();
        let cache = SessionCache::new(Duration::from_secs(600));

        cache.unread_total(&api, &tenant(), "alice").unwrap();
        cache.unread_total(&api, &tenant(), "bob").unwrap();
        cache
            .unread_total(&api, &Tenant::new(2, "Other", "mail.other.tld"), "alice")
            .unwrap();

        let opens = api
            .recorded()
            .iter()
            .filter(|c| c.starts_with("users.createToken"))
            .count();
        assert_eq!(opens, 3);
    }
}
