use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Single-slot bearer token cache.
///
/// The slot lock is held while a refresh is in flight, so concurrent callers
/// wait for that one request instead of issuing their own.
pub struct TokenCache {
    slot: Mutex<Option<AccessToken>>,
    refresh_margin: Duration,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_margin(Duration::minutes(5))
    }

    /// Tokens are refreshed once they are within `refresh_margin` of expiry.
    pub fn with_margin(refresh_margin: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            refresh_margin,
        }
    }

    /// Returns the cached token, or calls `fetch` for a new `(token, expires_in_secs)`.
    /// A failed fetch leaves the cache empty.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, i64)>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(token) = slot.as_ref() {
            if token.expires_at > Utc::now() + self.refresh_margin {
                tracing::debug!("Using cached access token");
                return Ok(token.value.clone());
            }
        }

        *slot = None;
        let (value, expires_in) = fetch().await?;
        let expires_at = Utc::now() + Duration::seconds(expires_in);
        tracing::debug!("Cached new access token, expires at {}", expires_at.to_rfc3339());

        *slot = Some(AccessToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(TokenCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_refresh(|| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok(("tok-1".to_string(), 3600))
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "tok-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed() {
        let cache = TokenCache::new();
        // expires inside the five minute margin
        let first = cache
            .get_or_refresh(|| async { Ok(("short".to_string(), 60)) })
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(|| async { Ok(("fresh".to_string(), 3600)) })
            .await
            .unwrap();
        let third = cache
            .get_or_refresh(|| async { Ok(("unused".to_string(), 3600)) })
            .await
            .unwrap();

        assert_eq!(first, "short");
        assert_eq!(second, "fresh");
        assert_eq!(third, "fresh");
    }

    #[tokio::test]
    async fn failed_refresh_leaves_cache_empty() {
        let cache = TokenCache::new();
        cache
            .get_or_refresh(|| async { Ok(("old".to_string(), 10)) })
            .await
            .unwrap();

        let err = cache
            .get_or_refresh(|| async { Err(AppError::SpotifyAuth("denied".to_string())) })
            .await;
        assert!(matches!(err, Err(AppError::SpotifyAuth(_))));

        let next = cache
            .get_or_refresh(|| async { Ok(("new".to_string(), 3600)) })
            .await
            .unwrap();
        assert_eq!(next, "new");
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = TokenCache::new();
        cache
            .get_or_refresh(|| async { Ok(("a".to_string(), 3600)) })
            .await
            .unwrap();
        cache.invalidate().await;
        let next = cache
            .get_or_refresh(|| async { Ok(("b".to_string(), 3600)) })
            .await
            .unwrap();
        assert_eq!(next, "b");
    }
}
