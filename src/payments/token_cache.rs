//! Process-wide cache for provider OAuth access tokens.
//!
//! Entries are keyed by a digest of the credentials, so two adapters built from the same
//! credentials share one token. Refresh is single-flight per key: concurrent callers wait
//! on the slot lock while one of them fetches.

use crate::payments::error::PaymentResult;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are treated as expired this long before the provider says they are
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub access_token: String,
    pub expires_in: Option<Duration>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

#[derive(Default)]
pub struct AccessTokenCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl AccessTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable key for a credential set; the secret itself is never stored.
    pub fn credential_key(base_url: &str, client_id: &str, client_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(base_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(client_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(client_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Return the cached token for `key`, fetching a new one when absent or expired.
    ///
    /// The lifetime is the provider's `expires_in` minus a safety margin, capped at `max_ttl`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        max_ttl: Duration,
        fetch: F,
    ) -> PaymentResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PaymentResult<FetchedToken>>,
    {
        let slot = self.slot(key).await;
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let fetched = fetch().await?;
        let ttl = fetched
            .expires_in
            .map(|expires_in| expires_in.saturating_sub(EXPIRY_MARGIN).min(max_ttl))
            .unwrap_or(max_ttl);
        debug!(ttl_secs = ttl.as_secs(), "access token refreshed");

        *cached = Some(CachedToken {
            access_token: fetched.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(fetched.access_token)
    }

    /// Drop the token for `key`, e.g. after the provider rejected it.
    pub async fn invalidate(&self, key: &str) {
        let slot = self.slot(key).await;
        *slot.lock().await = None;
    }
}
