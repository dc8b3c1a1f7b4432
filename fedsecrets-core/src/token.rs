use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

/// Tokens with less validity left than this are treated as expired.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(300);

const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Short-lived bearer token. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: SystemTime,
    pub audience: String,
}

impl AccessToken {
    pub fn new(
        token: impl Into<String>,
        expires_on: SystemTime,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            expires_on,
            audience: audience.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    /// True while the token has more than [`REFRESH_MARGIN`] left at `now`.
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        self.expires_on
            .duration_since(now)
            .map(|left| left > REFRESH_MARGIN)
            .unwrap_or(false)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Lifetime fields show up as numbers or numeric strings depending on the
/// endpoint that issued the token.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Seconds {
    Number(u64),
    Text(String),
}

impl Seconds {
    pub(crate) fn value(&self) -> Option<u64> {
        match self {
            Seconds::Number(value) => Some(*value),
            Seconds::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Resolve the absolute expiry of a token. A relative lifetime wins over an
/// absolute epoch timestamp; one hour is assumed when neither is present.
pub(crate) fn expiry_from(
    expires_in: Option<&Seconds>,
    expires_on: Option<&Seconds>,
    now: SystemTime,
) -> SystemTime {
    if let Some(secs) = expires_in.and_then(Seconds::value) {
        return now + Duration::from_secs(secs);
    }
    if let Some(epoch) = expires_on.and_then(Seconds::value) {
        return UNIX_EPOCH + Duration::from_secs(epoch);
    }
    now + DEFAULT_LIFETIME
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    audience: String,
    client_id: Option<String>,
}

impl CacheKey {
    pub fn new(audience: &str, client_id: Option<&str>) -> Self {
        Self {
            audience: audience.to_string(),
            client_id: client_id.map(ToString::to_string),
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<AccessToken>>>;

/// Expiry-aware token cache.
///
/// Each key owns an async mutex, so concurrent callers asking for the same
/// key wait on a single in-flight fetch instead of issuing their own.
#[derive(Clone, Default)]
pub struct TokenCache {
    slots: Arc<Mutex<HashMap<CacheKey, Slot>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut, E>(&self, key: CacheKey, fetch: F) -> Result<AccessToken, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, E>>,
    {
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;
        if let Some(token) = guard.as_ref().filter(|token| token.is_fresh()) {
            return Ok(token.clone());
        }

        let token = fetch().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Current entry for `key`, fresh or not.
    pub async fn peek(&self, key: &CacheKey) -> Option<AccessToken> {
        let slot = self.slot(key);
        let guard = slot.lock().await;
        guard.clone()
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }
}
