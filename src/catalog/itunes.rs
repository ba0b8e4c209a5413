use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CatalogEpisode, EpisodeDetail, FeedChannel, Source};

use super::{format_duration, parse_release_date, CatalogSource};

const ITUNES_API_URL: &str = "https://itunes.apple.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchResult {
    collection_id: Option<serde_json::Value>,
    collection_name: String,
    release_date: String,
    track_name: String,
    track_view_url: String,
    artist_ids: Vec<serde_json::Value>,
    artwork_url160: String,
    artwork_url600: String,
    episode_url: String,
    episode_file_extension: String,
    track_time_millis: u64,
    description: String,
    feed_url: String,
    episode_guid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LookupResult {
    collection_id: Option<serde_json::Value>,
    collection_name: String,
    artist_name: String,
    artwork_url600: String,
    feed_url: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    results: Vec<LookupResult>,
}

/// iTunes Search API client. Episode lookups go through the podcast's RSS feed.
pub struct ITunesClient {
    client: Client,
    base_url: String,
}

impl ITunesClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(ITUNES_API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("porkast-sync/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::CatalogApi(format!(
                "iTunes request failed: HTTP {}",
                response.status()
            )));
        }

        // iTunes answers with text/javascript, so decode the body ourselves.
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn fetch_rss(&self, feed_url: &str) -> Result<feed_rs::model::Feed> {
        let response = self.client.get(feed_url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        Ok(parser::parse(&bytes[..])?)
    }
}

#[async_trait]
impl CatalogSource for ITunesClient {
    fn source(&self) -> Source {
        Source::Itunes
    }

    async fn search(&self, keyword: &str, country: &str, limit: u32) -> Result<Vec<CatalogEpisode>> {
        let limit = limit.to_string();
        let url = Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[
                ("term", keyword),
                ("entity", "podcastEpisode"),
                ("media", "podcast"),
                ("country", country),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| AppError::CatalogApi(e.to_string()))?;

        let response: SearchResponse = self.get_json(url).await?;
        Ok(response.results.into_iter().map(episode_from_search).collect())
    }

    async fn episode_detail(
        &self,
        podcast_id: &str,
        episode_id: &str,
        _country: &str,
    ) -> Result<EpisodeDetail> {
        let url = Url::parse_with_params(
            &format!("{}/lookup", self.base_url),
            &[("id", podcast_id), ("entity", "podcast")],
        )
        .map_err(|e| AppError::CatalogApi(e.to_string()))?;

        let lookup: LookupResponse = self.get_json(url).await?;
        let podcast = lookup
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found("Podcast", podcast_id))?;

        if podcast.feed_url.is_empty() {
            return Err(AppError::CatalogApi(format!(
                "podcast {} has no feed url",
                podcast_id
            )));
        }

        let feed = self.fetch_rss(&podcast.feed_url).await?;
        detail_from_feed(feed, &podcast, podcast_id, episode_id)
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn episode_from_search(result: SearchResult) -> CatalogEpisode {
    let channel_id = result
        .collection_id
        .as_ref()
        .map(value_to_string)
        .unwrap_or_default();

    CatalogEpisode {
        external_id: result.episode_guid,
        channel_id,
        title: result.track_name,
        link: result.track_view_url,
        pub_date: parse_release_date(&result.release_date),
        author: result
            .artist_ids
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        image_url: result.artwork_url160,
        audio_url: result.episode_url,
        audio_type: result.episode_file_extension,
        duration_ms: result.track_time_millis,
        description: result.description,
        channel_title: result.collection_name,
        channel_image_url: result.artwork_url600,
        feed_link: result.feed_url,
        ..CatalogEpisode::default()
    }
}

fn entry_matches(entry: &Entry, episode_id: &str) -> bool {
    entry.id == episode_id || urlencoding::encode(&entry.id) == episode_id
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 80)
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|_| html.to_string())
}

fn detail_from_feed(
    feed: feed_rs::model::Feed,
    podcast: &LookupResult,
    podcast_id: &str,
    episode_id: &str,
) -> Result<EpisodeDetail> {
    let channel_title = feed
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_else(|| podcast.collection_name.clone());
    let channel_image = feed
        .logo
        .as_ref()
        .map(|img| img.uri.clone())
        .unwrap_or_else(|| podcast.artwork_url600.clone());
    let author = feed
        .authors
        .first()
        .map(|a| a.name.clone())
        .unwrap_or_else(|| podcast.artist_name.clone());

    let channel = FeedChannel {
        id: podcast
            .collection_id
            .as_ref()
            .map(value_to_string)
            .unwrap_or_else(|| podcast_id.to_string()),
        title: channel_title.clone(),
        description: feed
            .description
            .as_ref()
            .map(|d| html_to_text(&d.content))
            .unwrap_or_default(),
        image_url: channel_image.clone(),
        link: feed.links.first().map(|l| l.href.clone()).unwrap_or_default(),
        feed_link: podcast.feed_url.clone(),
        author: author.clone(),
        owner_name: author.clone(),
        owner_email: feed
            .authors
            .first()
            .and_then(|a| a.email.clone())
            .unwrap_or_default(),
        language: feed.language.clone().unwrap_or_default(),
        copyright: feed.rights.as_ref().map(|r| r.content.clone()).unwrap_or_default(),
        episode_count: feed.entries.len(),
    };

    let entry = feed
        .entries
        .into_iter()
        .find(|entry| entry_matches(entry, episode_id))
        .ok_or_else(|| AppError::not_found("Episode", episode_id))?;

    let media = entry.media.first();
    let content = media.and_then(|m| m.content.first());
    let duration_ms = content
        .and_then(|c| c.duration)
        .or_else(|| media.and_then(|m| m.duration))
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let description = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();

    let episode = CatalogEpisode {
        external_id: entry.id.clone(),
        channel_id: channel.id.clone(),
        title: entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string()),
        link: entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        pub_date: entry.published.or(entry.updated),
        author: entry
            .authors
            .first()
            .map(|a| a.name.clone())
            .unwrap_or(author),
        image_url: media
            .and_then(|m| m.thumbnails.first())
            .map(|t| t.image.uri.clone())
            .unwrap_or_else(|| channel_image.clone()),
        audio_url: content
            .and_then(|c| c.url.as_ref())
            .map(|u| u.to_string())
            .unwrap_or_default(),
        audio_type: content
            .and_then(|c| c.content_type.as_ref())
            .map(|m| m.to_string())
            .unwrap_or_default(),
        duration_ms,
        description,
        channel_title,
        channel_image_url: channel_image,
        feed_link: podcast.feed_url.clone(),
        ..CatalogEpisode::default()
    };

    tracing::debug!(
        "Resolved episode {:?} ({}) from {}",
        episode.title,
        format_duration(episode.duration_ms),
        podcast.feed_url
    );

    Ok(EpisodeDetail { channel, episode })
}
