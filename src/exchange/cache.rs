//! Cache of previously-exchanged downstream tokens.
//!
//! Keyed by `(sha256(subject_token), audience)` so that repeated calls from
//! the same session against the same downstream server reuse a token until
//! it is close to expiry, rather than round-tripping the IdP on every tool
//! call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::client::ExchangedToken;

/// How much of a token's remaining lifetime we're willing to serve from
/// cache before forcing a re-exchange; leaves headroom for clock skew and
/// in-flight requests.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(10);

fn cache_key(subject_token: &str, audience: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_token.as_bytes());
    hasher.update(b"|");
    hasher.update(audience.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct CacheEntry {
    token: ExchangedToken,
    expires_at: Instant,
}

/// Thread-safe cache of exchanged downstream tokens.
#[derive(Clone, Default)]
pub struct ExchangeCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl ExchangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a still-valid cached token for this subject/audience pair.
    pub async fn get(&self, subject_token: &str, audience: &str) -> Option<ExchangedToken> {
        let key = cache_key(subject_token, audience);
        let entries = self.entries.read().await;
        entries.get(&key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.token.clone())
            } else {
                None
            }
        })
    }

    /// Record a freshly-exchanged token, expiring it before the IdP does.
    pub async fn put(&self, subject_token: &str, audience: &str, token: ExchangedToken) {
        let key = cache_key(subject_token, audience);
        let ttl = Duration::from_secs(token.expires_in.max(0) as u64)
            .saturating_sub(EXPIRY_SAFETY_MARGIN);
        let expires_at = Instant::now() + ttl;
        let mut entries = self.entries.write().await;
        entries.insert(key, CacheEntry { token, expires_at });
    }

    /// Drop a cached token, e.g. after the downstream server rejects it with 401.
    pub async fn invalidate(&self, subject_token: &str, audience: &str) {
        let key = cache_key(subject_token, audience);
        let mut entries = self.entries.write().await;
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: i64) -> ExchangedToken {
        ExchangedToken {
            access_token: "downstream-token".to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            issued_token_type: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_the_cached_token() {
        let cache = ExchangeCache::new();
        cache.put("subj", "aud", token(300)).await;
        let cached = cache.get("subj", "aud").await;
        assert_eq!(cached.unwrap().access_token, "downstream-token");
    }

    #[tokio::test]
    async fn distinct_audiences_do_not_share_cache_entries() {
        let cache = ExchangeCache::new();
        cache.put("subj", "aud-a", token(300)).await;
        assert!(cache.get("subj", "aud-b").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = ExchangeCache::new();
        // expires_in smaller than the safety margin yields an already-elapsed TTL.
        cache.put("subj", "aud", token(1)).await;
        assert!(cache.get("subj", "aud").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_the_entry() {
        let cache = ExchangeCache::new();
        cache.put("subj", "aud", token(300)).await;
        cache.invalidate("subj", "aud").await;
        assert!(cache.get("subj", "aud").await.is_none());
    }
}
