use crate::db::Repository;
use crate::error::Result;
use crate::models::Fingerprint;
use crate::notify::{DeliveryReport, NotificationDispatcher, UpdateNotice};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing past the watermark, or the user cannot be emailed.
    NoChange,
    /// Watermark moved to `latest_id`.
    Advanced {
        previous: i64,
        latest_id: i64,
        total_count: i64,
        delivery: DeliveryReport,
    },
    /// A delta was found but the watermark stayed where it was.
    Held { delivery: DeliveryReport },
}

impl ReconcileOutcome {
    pub fn delivered(&self) -> bool {
        match self {
            ReconcileOutcome::Advanced { delivery, .. } | ReconcileOutcome::Held { delivery } => {
                delivery.delivered()
            }
            ReconcileOutcome::NoChange => false,
        }
    }
}

/// Computes what a subscriber has not been told about yet, notifies them and
/// moves their watermark past it.
#[derive(Clone)]
pub struct WatermarkEngine {
    repo: Repository,
    dispatcher: NotificationDispatcher,
    page_size: u32,
}

impl WatermarkEngine {
    pub fn new(repo: Repository, dispatcher: NotificationDispatcher, page_size: u32) -> Self {
        Self {
            repo,
            dispatcher,
            page_size,
        }
    }

    /// Fails only when the subscription or user cannot be loaded. Notification
    /// and watermark bookkeeping errors are logged and reported as `Held`.
    pub async fn reconcile_user(
        &self,
        fingerprint: &Fingerprint,
        user_id: &str,
    ) -> Result<ReconcileOutcome> {
        let (subscription, user) = tokio::try_join!(
            self.repo.find_subscription(user_id, fingerprint),
            self.repo.get_user(user_id),
        )?;
        let previous = subscription.latest_id;

        let (recent, total_count) = tokio::try_join!(
            self.repo
                .items_beyond(user_id, fingerprint, previous, 0, self.page_size),
            self.repo.count_links(fingerprint, previous),
        )?;

        let email = match user.email() {
            Some(email) if total_count > 0 && !recent.is_empty() => email.to_string(),
            _ => {
                tracing::debug!(
                    "No update for user {} ({}): {} new links, {} recent items",
                    user_id,
                    fingerprint,
                    total_count,
                    recent.len()
                );
                return Ok(ReconcileOutcome::NoChange);
            }
        };

        let notice = UpdateNotice {
            keyword: fingerprint.keyword.clone(),
            update_count: total_count,
            titles: recent.into_iter().map(|item| item.title).collect(),
            link: self.dispatcher.subscription_link(user_id, &fingerprint.keyword),
        };

        // A zero watermark means the first pass after subscribing; record it silently.
        let notify = async {
            if previous == 0 {
                DeliveryReport::NOT_ATTEMPTED
            } else {
                self.dispatcher.dispatch(&user, &notice).await
            }
        };

        // Links stored by another unit after the delta was read are also passed by
        // the latest link, so they advance without a notice of their own.
        let (delivery, latest, absolute) = tokio::join!(
            notify,
            self.repo.latest_link(fingerprint),
            self.repo.count_links(fingerprint, 0),
        );

        if delivery.attempted() && !delivery.delivered() {
            tracing::warn!(
                "All notifications failed for user {} <{}> ({}, {} new, link {}); keeping watermark {}",
                user_id,
                email,
                fingerprint,
                notice.update_count,
                notice.link,
                previous
            );
            return Ok(ReconcileOutcome::Held { delivery });
        }

        let latest = match latest {
            Ok(Some(link)) => link,
            Ok(None) => {
                tracing::warn!("No links found for {} while advancing user {}", fingerprint, user_id);
                return Ok(ReconcileOutcome::Held { delivery });
            }
            Err(e) => {
                tracing::error!(
                    "Failed to load latest link for user {} <{}> ({}, {} new, notified: {}, link {}): {}",
                    user_id,
                    email,
                    fingerprint,
                    notice.update_count,
                    delivery.delivered(),
                    notice.link,
                    e
                );
                return Ok(ReconcileOutcome::Held { delivery });
            }
        };

        let absolute = match absolute {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    "Failed to count links for user {} <{}> ({}, {} new, notified: {}, link {}): {}",
                    user_id,
                    email,
                    fingerprint,
                    notice.update_count,
                    delivery.delivered(),
                    notice.link,
                    e
                );
                return Ok(ReconcileOutcome::Held { delivery });
            }
        };

        match self
            .repo
            .advance_watermark(&subscription.id, latest.id, latest.create_time, absolute)
            .await
        {
            Ok(true) => {
                tracing::debug!(
                    "Advanced watermark for user {} ({}) from {} to {}",
                    user_id,
                    fingerprint,
                    previous,
                    latest.id
                );
                Ok(ReconcileOutcome::Advanced {
                    previous,
                    latest_id: latest.id,
                    total_count: absolute,
                    delivery,
                })
            }
            Ok(false) => {
                tracing::debug!(
                    "Watermark for user {} ({}) already at or past {}",
                    user_id,
                    fingerprint,
                    latest.id
                );
                Ok(ReconcileOutcome::Held { delivery })
            }
            Err(e) => {
                tracing::error!(
                    "Failed to advance watermark for user {} <{}> ({}, {} new, notified: {}, link {}): {}",
                    user_id,
                    email,
                    fingerprint,
                    notice.update_count,
                    delivery.delivered(),
                    notice.link,
                    e
                );
                Ok(ReconcileOutcome::Held { delivery })
            }
        }
    }
}
