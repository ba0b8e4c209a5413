use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::catalog::{CatalogFetcher, ITunesClient, SpotifyClient, SpotifyCredentials, TokenCache};
use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::models::{EpisodeDetail, Source};
use crate::notify::{NotificationDispatcher, ResendMailer, TelegramBot};
use crate::subscriptions::SubscriptionService;
use crate::sync::{feed_item_from_candidate, PassReport, RefreshDriver, WatermarkEngine};

pub struct App {
    pub repository: Repository,
    pub subscriptions: SubscriptionService,
    catalog: CatalogFetcher,
    driver: RefreshDriver,
    refresh_interval: Duration,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;

        let mut catalog = CatalogFetcher::new().with_source(Arc::new(ITunesClient::new()?));
        match (&config.spotify_client_id, &config.spotify_client_secret) {
            (Some(client_id), Some(client_secret)) => {
                let credentials = SpotifyCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                };
                let spotify = SpotifyClient::new(credentials, Arc::new(TokenCache::new()))?;
                catalog = catalog.with_source(Arc::new(spotify));
            }
            _ => tracing::info!("Spotify credentials not configured, spotify subscriptions will fail"),
        }

        let mut dispatcher = NotificationDispatcher::new(config.site_url.clone());
        if let Some(key) = &config.resend_api_key {
            dispatcher = dispatcher.with_mailer(Arc::new(ResendMailer::new(
                key.clone(),
                config.email_from.clone(),
            )?));
        } else {
            tracing::warn!("No Resend API key configured, email notifications disabled");
        }
        if let Some(token) = &config.telegram_bot_token {
            dispatcher = dispatcher.with_chat(Arc::new(TelegramBot::new(token.clone())?));
        }

        let engine = WatermarkEngine::new(repository.clone(), dispatcher, config.notify_page_size);
        let driver = RefreshDriver::new(
            repository.clone(),
            catalog.clone(),
            engine,
            config.search_pool_size,
            config.max_concurrency,
        );
        let subscriptions = SubscriptionService::new(repository.clone(), driver.clone());

        Ok(Self {
            repository,
            subscriptions,
            catalog,
            driver,
            refresh_interval: Duration::from_secs(u64::from(config.refresh_interval_minutes.max(1)) * 60),
        })
    }

    pub async fn refresh_once(&self) -> Result<PassReport> {
        self.driver.run_pass().await
    }

    /// Runs a pass now and then on every interval tick. A pass that fails to
    /// start is logged and retried at the next tick.
    pub async fn run_scheduler(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Refreshing subscriptions every {} minutes",
            self.refresh_interval.as_secs() / 60
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.driver.run_pass().await {
                tracing::error!("Refresh pass failed: {}", e);
            }
        }
    }

    /// Looks an episode up in its catalog and stores it. Returns the detail and
    /// whether the feed item was new.
    pub async fn lookup_episode(
        &self,
        source: Source,
        podcast_id: &str,
        episode_id: &str,
        country: &str,
    ) -> Result<(EpisodeDetail, bool)> {
        let detail = self
            .catalog
            .episode_detail(source, podcast_id, episode_id, country)
            .await?;
        let item = feed_item_from_candidate(&detail.episode, source, Utc::now());
        let created = self.repository.upsert_feed_item(item).await?;
        Ok((detail, created))
    }
}
