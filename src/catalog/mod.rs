//! Podcast catalog search.
//!
//! Each catalog (iTunes, Spotify) implements [`CatalogSource`]. The
//! [`CatalogFetcher`] picks the provider for a subscription's [`Source`], fetches
//! one over-sized candidate pool and pages through it client-side, since neither
//! provider offers pagination that stays stable across calls.

mod itunes;
mod spotify;
mod token;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{AppError, Result};
use crate::models::{CatalogEpisode, EpisodeDetail, Fingerprint, Source};

pub use itunes::ITunesClient;
pub use spotify::{SpotifyClient, SpotifyCredentials};
pub use token::TokenCache;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn source(&self) -> Source;

    /// Up to `limit` raw episode hits for `keyword` in `country`.
    async fn search(&self, keyword: &str, country: &str, limit: u32) -> Result<Vec<CatalogEpisode>>;

    /// Channel and episode metadata for a single episode.
    async fn episode_detail(
        &self,
        podcast_id: &str,
        episode_id: &str,
        country: &str,
    ) -> Result<EpisodeDetail>;
}

#[derive(Clone, Default)]
pub struct CatalogFetcher {
    sources: HashMap<Source, Arc<dyn CatalogSource>>,
}

impl CatalogFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, provider: Arc<dyn CatalogSource>) -> Self {
        self.sources.insert(provider.source(), provider);
        self
    }

    fn provider(&self, source: Source) -> Result<&Arc<dyn CatalogSource>> {
        self.sources
            .get(&source)
            .ok_or_else(|| AppError::CatalogApi(format!("no catalog configured for {}", source)))
    }

    /// Ranked candidates for a fingerprint's query.
    ///
    /// Fetches `pool_size` hits in one call, drops excluded channels, stamps the
    /// filtered count on every hit, sorts by publish date (newest first) and
    /// slices `offset..offset + limit`. `limit == 0` returns the whole pool.
    pub async fn search_episodes(
        &self,
        fingerprint: &Fingerprint,
        offset: usize,
        limit: usize,
        pool_size: u32,
    ) -> Result<Vec<CatalogEpisode>> {
        let provider = self.provider(fingerprint.source)?;
        let raw = provider
            .search(&fingerprint.keyword, &fingerprint.country, pool_size)
            .await?;

        tracing::debug!(
            "Catalog {} returned {} hits for {:?}",
            fingerprint.source,
            raw.len(),
            fingerprint.keyword
        );

        Ok(rank_candidates(
            raw,
            &fingerprint.excluded_channels(),
            offset,
            limit,
        ))
    }

    pub async fn episode_detail(
        &self,
        source: Source,
        podcast_id: &str,
        episode_id: &str,
        country: &str,
    ) -> Result<EpisodeDetail> {
        self.provider(source)?
            .episode_detail(podcast_id, episode_id, country)
            .await
    }
}

pub fn rank_candidates(
    raw: Vec<CatalogEpisode>,
    excluded_channels: &[&str],
    offset: usize,
    limit: usize,
) -> Vec<CatalogEpisode> {
    let mut items: Vec<CatalogEpisode> = raw
        .into_iter()
        .filter(|item| !excluded_channels.contains(&item.channel_id.as_str()))
        .collect();

    let count = items.len();
    for item in &mut items {
        item.count = count;
    }

    // Stable sort: equal dates keep the provider's relevance order.
    items.sort_by_key(|item| Reverse(item.pub_date));

    if limit == 0 {
        return items;
    }
    items.into_iter().skip(offset).take(limit).collect()
}

/// Formats a duration in milliseconds as `HH:MM:SS`.
///
/// Values in `[1000, 10000)` are seconds reported in the wrong unit and are
/// scaled up first.
pub fn format_duration(mut millis: u64) -> String {
    if (1000..10000).contains(&millis) {
        millis *= 1000;
    }
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let seconds = (millis % 60_000) / 1000;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Parses catalog release dates: RFC 3339 timestamps or `YYYY-MM-DD`,
/// `YYYY-MM` and `YYYY` day/month/year precision dates.
pub fn parse_release_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let padded = match raw.len() {
        4 => format!("{}-01-01", raw),
        7 => format!("{}-01", raw),
        _ => raw.to_string(),
    };
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
