//! Subscribing, unsubscribing and browsing a user's subscriptions.

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{FeedItem, Fingerprint, NewSubscription, Source, SubscribeOutcome, Subscription};
use crate::sync::RefreshDriver;

#[derive(Clone)]
pub struct SubscriptionService {
    repo: Repository,
    driver: RefreshDriver,
}

impl SubscriptionService {
    pub fn new(repo: Repository, driver: RefreshDriver) -> Self {
        Self { repo, driver }
    }

    /// Creates the subscription and seeds its catalog data without notifying.
    ///
    /// The watermark starts at zero, so the next refresh pass records the seeded
    /// links silently and only later additions are announced.
    pub async fn subscribe(&self, request: NewSubscription) -> Result<SubscribeOutcome> {
        if self
            .repo
            .find_active_subscription(&request.user_id, &request.keyword, request.source)
            .await?
            .is_some()
        {
            tracing::debug!(
                "User {} already subscribed to {:?} on {}",
                request.user_id,
                request.keyword,
                request.source
            );
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let fingerprint = request.fingerprint();
        let user_id = request.user_id.clone();
        let id = match self.repo.insert_subscription(request).await {
            Ok(id) => id,
            Err(AppError::AlreadyExists { .. }) => return Ok(SubscribeOutcome::AlreadySubscribed),
            Err(e) => return Err(e),
        };
        tracing::info!("User {} subscribed to {}", user_id, fingerprint);

        let seeded = !self.driver.ingest(&fingerprint).await.is_failure();
        if !seeded {
            tracing::warn!("Subscription {} created but not seeded", id);
        }
        Ok(SubscribeOutcome::Created { id, seeded })
    }

    pub async fn unsubscribe(&self, user_id: &str, keyword: &str, source: Source) -> Result<bool> {
        let disabled = self.repo.disable_subscription(user_id, keyword, source).await?;
        if disabled {
            tracing::info!("User {} unsubscribed from {:?} on {}", user_id, keyword, source);
        }
        Ok(disabled)
    }

    pub async fn list_subscriptions(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<Subscription>, i64)> {
        self.repo.list_user_subscriptions(user_id, offset, limit).await
    }

    /// Stored episodes for one of the user's active subscriptions, newest first,
    /// with the fingerprint's total link count.
    pub async fn subscription_items(
        &self,
        user_id: &str,
        fingerprint: &Fingerprint,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<FeedItem>, i64)> {
        self.repo.find_subscription(user_id, fingerprint).await?;
        let (items, total) = tokio::try_join!(
            self.repo.items_beyond(user_id, fingerprint, 0, offset, limit),
            self.repo.count_links(fingerprint, 0),
        )?;
        Ok((items, total))
    }
}
