use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::catalog::{format_duration, CatalogFetcher};
use crate::db::Repository;
use crate::error::Result;
use crate::feed::{derive_channel_id, derive_id};
use crate::models::{CatalogEpisode, FeedItem, Fingerprint, NewKeywordLink, Source, Subscription};

use super::{ReconcileOutcome, WatermarkEngine};

/// Result of fetching and storing one fingerprint's candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    NoCandidates,
    FetchFailed,
    StoreFailed,
    Stored { candidates: usize, new_links: usize },
}

impl IngestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, IngestOutcome::FetchFailed | IngestOutcome::StoreFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    NoCandidates,
    FetchFailed,
    StoreFailed,
    ReconcileFailed,
    Reconciled(ReconcileOutcome),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub subscriptions: usize,
    pub notified: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PassReport {
    fn record(&mut self, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::NoCandidates => self.skipped += 1,
            UnitOutcome::FetchFailed | UnitOutcome::StoreFailed | UnitOutcome::ReconcileFailed => {
                self.failed += 1
            }
            UnitOutcome::Reconciled(reconciled) => {
                if reconciled.delivered() {
                    self.notified += 1;
                }
                if matches!(reconciled, ReconcileOutcome::Advanced { .. }) {
                    self.advanced += 1;
                }
            }
        }
    }
}

/// Runs refresh passes over every active subscription.
#[derive(Clone)]
pub struct RefreshDriver {
    repo: Repository,
    catalog: CatalogFetcher,
    engine: WatermarkEngine,
    pool_size: u32,
    max_concurrency: usize,
}

impl RefreshDriver {
    pub fn new(
        repo: Repository,
        catalog: CatalogFetcher,
        engine: WatermarkEngine,
        pool_size: u32,
        max_concurrency: usize,
    ) -> Self {
        Self {
            repo,
            catalog,
            engine,
            pool_size,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// One pass over all active subscriptions. Only failing to load the
    /// subscriptions aborts the pass; each unit's failure stays with that unit.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let subscriptions = self.repo.list_active_subscriptions().await?;
        tracing::debug!("Refreshing {} active subscriptions", subscriptions.len());

        let mut report = PassReport {
            subscriptions: subscriptions.len(),
            ..PassReport::default()
        };

        let outcomes: Vec<UnitOutcome> = stream::iter(subscriptions)
            .map(|subscription| async move { self.run_unit(&subscription).await })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }

        tracing::info!(
            "Refresh pass done: {} subscriptions, {} notified, {} advanced, {} skipped, {} failed",
            report.subscriptions,
            report.notified,
            report.advanced,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn run_unit(&self, subscription: &Subscription) -> UnitOutcome {
        let fingerprint = subscription.fingerprint();

        match self.ingest(&fingerprint).await {
            IngestOutcome::NoCandidates => return UnitOutcome::NoCandidates,
            IngestOutcome::FetchFailed => return UnitOutcome::FetchFailed,
            IngestOutcome::StoreFailed => return UnitOutcome::StoreFailed,
            IngestOutcome::Stored { .. } => {}
        }

        match self
            .engine
            .reconcile_user(&fingerprint, &subscription.user_id)
            .await
        {
            Ok(outcome) => UnitOutcome::Reconciled(outcome),
            Err(e) => {
                tracing::warn!(
                    "Failed to reconcile subscription {} for user {}: {}",
                    subscription.id,
                    subscription.user_id,
                    e
                );
                UnitOutcome::ReconcileFailed
            }
        }
    }

    /// Fetches the fingerprint's full candidate pool and stores it: links are
    /// inserted (existing ones skipped), feed items upserted.
    pub async fn ingest(&self, fingerprint: &Fingerprint) -> IngestOutcome {
        let candidates = match self
            .catalog
            .search_episodes(fingerprint, 0, 0, self.pool_size)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Failed to fetch candidates for {}: {}", fingerprint, e);
                return IngestOutcome::FetchFailed;
            }
        };

        if candidates.is_empty() {
            tracing::debug!("No candidates for {}", fingerprint);
            return IngestOutcome::NoCandidates;
        }

        let now = Utc::now();
        let (items, links): (Vec<FeedItem>, Vec<NewKeywordLink>) = candidates
            .iter()
            .map(|candidate| {
                let item = feed_item_from_candidate(candidate, fingerprint.source, now);
                let link = NewKeywordLink {
                    fingerprint: fingerprint.clone(),
                    feed_channel_id: item.channel_id.clone(),
                    feed_item_id: item.id.clone(),
                    create_time: now,
                };
                (item, link)
            })
            .unzip();

        let attempted = links.len();
        let new_links = match self.repo.insert_keyword_links(links).await {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::warn!("Failed to store links for {}: {}", fingerprint, e);
                return IngestOutcome::StoreFailed;
            }
        };
        if new_links < attempted {
            tracing::warn!(
                "Skipped {} already linked items for {}",
                attempted - new_links,
                fingerprint
            );
        }

        if let Err(e) = self.repo.upsert_feed_items(items).await {
            tracing::warn!("Failed to store feed items for {}: {}", fingerprint, e);
            return IngestOutcome::StoreFailed;
        }

        tracing::debug!(
            "Stored {} candidates ({} new links) for {}",
            candidates.len(),
            new_links,
            fingerprint
        );
        IngestOutcome::Stored {
            candidates: candidates.len(),
            new_links,
        }
    }
}

pub(crate) fn feed_item_from_candidate(
    candidate: &CatalogEpisode,
    source: Source,
    seen_at: chrono::DateTime<Utc>,
) -> FeedItem {
    FeedItem {
        id: derive_id(&candidate.feed_link, &candidate.title),
        feed_id: candidate.channel_id.clone(),
        channel_id: derive_channel_id(&candidate.feed_link, &candidate.channel_title),
        feed_link: candidate.feed_link.clone(),
        channel_title: candidate.channel_title.clone(),
        guid: candidate.external_id.clone(),
        title: candidate.title.clone(),
        link: candidate.link.clone(),
        pub_date: candidate.pub_date,
        author: candidate.author.clone(),
        input_date: seen_at,
        image_url: candidate.image_url.clone(),
        enclosure_url: candidate.audio_url.clone(),
        enclosure_type: candidate.audio_type.clone(),
        enclosure_length: String::new(),
        duration: format_duration(candidate.duration_ms),
        episode: candidate.episode.clone(),
        season: candidate.season.clone(),
        explicit: candidate.explicit.clone(),
        episode_type: candidate.episode_type.clone(),
        description: candidate.description.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::NewSubscription;
    use crate::notify::{ChannelOutcome, DeliveryReport, NotificationDispatcher};
    use crate::testing::{candidate, user, FakeCatalog, RecordingChat, RecordingMailer};

    struct Harness {
        repo: Repository,
        catalog: Arc<FakeCatalog>,
        mailer: Arc<RecordingMailer>,
        driver: RefreshDriver,
    }

    /// A mailer of `None` leaves email unconfigured; `mailer` then records nothing.
    async fn harness_with(
        mailer: Option<RecordingMailer>,
        chat: Option<Arc<RecordingChat>>,
    ) -> Harness {
        let repo = Repository::in_memory().await.unwrap();
        let catalog = Arc::new(FakeCatalog::new(Source::Itunes, Vec::new()));
        let mut dispatcher = NotificationDispatcher::new("https://porkast.com");
        let mailer = match mailer {
            Some(mailer) => {
                let mailer = Arc::new(mailer);
                dispatcher = dispatcher.with_mailer(mailer.clone());
                mailer
            }
            None => Arc::new(RecordingMailer::default()),
        };
        if let Some(chat) = chat {
            dispatcher = dispatcher.with_chat(chat);
        }
        let engine = WatermarkEngine::new(repo.clone(), dispatcher, 10);
        let driver = RefreshDriver::new(
            repo.clone(),
            CatalogFetcher::new().with_source(catalog.clone()),
            engine,
            200,
            4,
        );
        Harness {
            repo,
            catalog,
            mailer,
            driver,
        }
    }

    async fn harness() -> Harness {
        harness_with(Some(RecordingMailer::default()), None).await
    }

    async fn subscribe(repo: &Repository, user_id: &str, keyword: &str) -> String {
        repo.upsert_user(user(user_id, Some(&format!("{}@example.com", user_id))))
            .await
            .unwrap();
        repo.insert_subscription(NewSubscription {
            user_id: user_id.to_string(),
            keyword: keyword.to_string(),
            country: "US".to_string(),
            source: Source::Itunes,
            exclude_feed_id: String::new(),
            order_by_date: 0,
        })
        .await
        .unwrap()
    }

    async fn subscribe_with_chat(repo: &Repository, user_id: &str, keyword: &str) -> String {
        let mut u = user(user_id, Some(&format!("{}@example.com", user_id)));
        u.telegram_id = Some("42".to_string());
        repo.upsert_user(u).await.unwrap();
        repo.insert_subscription(NewSubscription {
            user_id: user_id.to_string(),
            keyword: keyword.to_string(),
            country: "US".to_string(),
            source: Source::Itunes,
            exclude_feed_id: String::new(),
            order_by_date: 0,
        })
        .await
        .unwrap()
    }

    fn startup_fp() -> Fingerprint {
        Fingerprint::new("startup", Source::Itunes, "US", "")
    }

    fn startup_candidates() -> Vec<CatalogEpisode> {
        vec![
            candidate("Day one", "c1", Some("2024-03-01")),
            candidate("Day three", "c2", Some("2024-03-03")),
            candidate("Day two", "c3", Some("2024-03-02")),
        ]
    }

    /// Puts five links for another fingerprint ahead of anything `startup` gets.
    async fn seed_unrelated_links(h: &Harness) {
        h.catalog.set_results(
            "history",
            (0..5)
                .map(|i| candidate(&format!("History {}", i), "h1", Some("2023-01-01")))
                .collect(),
        );
        let fp = Fingerprint::new("history", Source::Itunes, "US", "");
        assert!(matches!(
            h.driver.ingest(&fp).await,
            IngestOutcome::Stored { new_links: 5, .. }
        ));
    }

    #[tokio::test]
    async fn startup_scenario_notifies_newest_first() {
        let h = harness().await;
        seed_unrelated_links(&h).await;
        let sub_id = subscribe(&h.repo, "u1", "startup").await;
        h.repo
            .advance_watermark(&sub_id, 5, Utc::now(), 5)
            .await
            .unwrap();
        h.catalog.set_results("startup", startup_candidates());

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.subscriptions, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(report.advanced, 1);
        assert_eq!(report.failed, 0);

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "#startup has new podcasts update");
        assert!(sent[0].html.contains("3 new episodes"));
        let three = sent[0].html.find("Day three").unwrap();
        let two = sent[0].html.find("Day two").unwrap();
        let one = sent[0].html.find("Day one").unwrap();
        assert!(three < two && two < one);

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 8);
        assert_eq!(sub.total_count, 3);
        assert!(sub.update_time.is_some());
    }

    #[tokio::test]
    async fn first_pass_records_watermark_without_sending() {
        let h = harness().await;
        subscribe(&h.repo, "u1", "startup").await;
        h.catalog.set_results("startup", startup_candidates());

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.notified, 0);
        assert_eq!(report.advanced, 1);
        assert!(h.mailer.sent().is_empty());

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 3);
    }

    #[tokio::test]
    async fn second_identical_pass_is_quiet() {
        let h = harness().await;
        subscribe(&h.repo, "u1", "startup").await;
        h.catalog.set_results("startup", startup_candidates());

        h.driver.run_pass().await.unwrap();
        let report = h.driver.run_pass().await.unwrap();

        assert_eq!(report.notified, 0);
        assert_eq!(report.advanced, 0);
        assert!(h.mailer.sent().is_empty());
        assert_eq!(h.repo.count_rows("keyword_subscriptions").await.unwrap(), 3);
        assert_eq!(h.repo.count_rows("feed_items").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn new_episode_after_first_pass_is_announced() {
        let h = harness().await;
        subscribe(&h.repo, "u1", "startup").await;
        h.catalog.set_results("startup", startup_candidates());
        h.driver.run_pass().await.unwrap();

        let mut more = startup_candidates();
        more.push(candidate("Day four", "c1", Some("2024-03-04")));
        h.catalog.set_results("startup", more);
        let report = h.driver.run_pass().await.unwrap();

        assert_eq!(report.notified, 1);
        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("1 new episodes"));
        assert!(sent[0].html.contains("Day four"));
        assert!(!sent[0].html.contains("Day two"));

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 4);
        assert_eq!(sub.total_count, 4);
    }

    #[tokio::test]
    async fn empty_fetch_writes_nothing() {
        let h = harness().await;
        subscribe(&h.repo, "u1", "nothing").await;

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(h.repo.count_rows("keyword_subscriptions").await.unwrap(), 0);
        assert_eq!(h.repo.count_rows("feed_items").await.unwrap(), 0);

        let fp = Fingerprint::new("nothing", Source::Itunes, "US", "");
        let sub = h.repo.find_subscription("u1", &fp).await.unwrap();
        assert_eq!(sub.latest_id, 0);
    }

    #[tokio::test]
    async fn one_failing_unit_does_not_stop_others() {
        let h = harness().await;
        subscribe(&h.repo, "u1", "startup").await;
        subscribe(&h.repo, "u2", "broken").await;
        h.catalog.set_results("startup", startup_candidates());
        h.catalog.fail_keyword("broken");

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.subscriptions, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.advanced, 1);

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 3);
    }

    #[tokio::test]
    async fn failed_delivery_keeps_watermark() {
        let h = harness_with(Some(RecordingMailer::failing()), None).await;
        seed_unrelated_links(&h).await;
        let sub_id = subscribe(&h.repo, "u1", "startup").await;
        h.repo
            .advance_watermark(&sub_id, 5, Utc::now(), 5)
            .await
            .unwrap();
        h.catalog.set_results("startup", startup_candidates());

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.notified, 0);
        assert_eq!(report.advanced, 0);

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 5);
    }

    #[tokio::test]
    async fn one_delivered_channel_is_enough_to_advance() {
        let chat = Arc::new(RecordingChat::default());
        let h = harness_with(Some(RecordingMailer::failing()), Some(chat.clone())).await;
        seed_unrelated_links(&h).await;
        let sub_id = subscribe_with_chat(&h.repo, "u1", "startup").await;
        h.repo
            .advance_watermark(&sub_id, 5, Utc::now(), 5)
            .await
            .unwrap();
        h.catalog.set_results("startup", startup_candidates());

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(chat.sent().len(), 1);

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 8);
    }

    #[tokio::test]
    async fn failed_chat_without_email_channel_keeps_watermark() {
        let chat = Arc::new(RecordingChat::failing());
        let h = harness_with(None, Some(chat.clone())).await;
        seed_unrelated_links(&h).await;
        let sub_id = subscribe_with_chat(&h.repo, "u1", "startup").await;
        h.repo
            .advance_watermark(&sub_id, 5, Utc::now(), 5)
            .await
            .unwrap();
        h.catalog.set_results("startup", startup_candidates());

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.notified, 0);
        assert_eq!(report.advanced, 0);
        assert_eq!(report.failed, 0);
        assert!(chat.sent().is_empty());
        assert!(h.mailer.sent().is_empty());

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 5);
        assert_eq!(sub.total_count, 5);
    }

    #[tokio::test]
    async fn repeated_candidate_is_linked_once() {
        let h = harness().await;
        let episode = candidate("Day one", "c1", Some("2024-03-01"));
        h.catalog
            .set_results("startup", vec![episode.clone(), episode.clone(), episode]);

        let outcome = h.driver.ingest(&startup_fp()).await;
        assert_eq!(
            outcome,
            IngestOutcome::Stored {
                candidates: 3,
                new_links: 1
            }
        );
        assert_eq!(h.repo.count_rows("keyword_subscriptions").await.unwrap(), 1);
        assert_eq!(h.repo.count_rows("feed_items").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_failure_stays_with_its_unit() {
        let h = harness().await;
        let broken_id = subscribe(&h.repo, "u2", "broken").await;
        h.repo
            .advance_watermark(&broken_id, 2, Utc::now(), 2)
            .await
            .unwrap();
        subscribe(&h.repo, "u1", "startup").await;
        h.repo
            .execute_batch(
                "CREATE TRIGGER fail_broken_items BEFORE INSERT ON feed_items
                 WHEN NEW.title LIKE 'Broken%'
                 BEGIN SELECT RAISE(FAIL, 'storage unavailable'); END;",
            )
            .await
            .unwrap();
        h.catalog.set_results("startup", startup_candidates());
        h.catalog.set_results(
            "broken",
            vec![
                candidate("Broken one", "b1", Some("2024-03-01")),
                candidate("Broken two", "b1", Some("2024-03-02")),
            ],
        );

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.subscriptions, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.advanced, 1);

        let broken = Fingerprint::new("broken", Source::Itunes, "US", "");
        let sub = h.repo.find_subscription("u2", &broken).await.unwrap();
        assert_eq!(sub.latest_id, 2);
        assert_eq!(sub.total_count, 2);

        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert!(sub.latest_id > 0);
        assert_eq!(sub.total_count, 3);
    }

    #[tokio::test]
    async fn user_without_email_is_not_advanced() {
        let h = harness().await;
        h.repo.upsert_user(user("u1", None)).await.unwrap();
        h.repo
            .insert_subscription(NewSubscription {
                user_id: "u1".to_string(),
                keyword: "startup".to_string(),
                country: "US".to_string(),
                source: Source::Itunes,
                exclude_feed_id: String::new(),
                order_by_date: 0,
            })
            .await
            .unwrap();
        h.catalog.set_results("startup", startup_candidates());

        let report = h.driver.run_pass().await.unwrap();
        assert_eq!(report.advanced, 0);
        let sub = h.repo.find_subscription("u1", &startup_fp()).await.unwrap();
        assert_eq!(sub.latest_id, 0);
    }

    #[test]
    fn feed_item_identity_is_derived() {
        let c = candidate("Day one", "c1", Some("2024-03-01"));
        let item = feed_item_from_candidate(&c, Source::Itunes, Utc::now());
        assert_eq!(item.id, derive_id(&c.feed_link, "Day one"));
        assert_eq!(item.channel_id, derive_channel_id(&c.feed_link, "Channel c1"));
        assert_eq!(item.feed_id, "c1");
        assert_eq!(item.duration, "00:30:00");
        assert_eq!(item.source, Source::Itunes);
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = PassReport::default();
        report.record(&UnitOutcome::NoCandidates);
        report.record(&UnitOutcome::FetchFailed);
        report.record(&UnitOutcome::Reconciled(ReconcileOutcome::Advanced {
            previous: 1,
            latest_id: 2,
            total_count: 2,
            delivery: DeliveryReport {
                email: ChannelOutcome::Sent,
                chat: ChannelOutcome::Skipped,
            },
        }));
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(report.advanced, 1);
    }
}
